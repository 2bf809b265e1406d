use serde_json::{Map, Value};

use kb_domain::sql_guard::{GuardMode, SqlGuard, SqlRejection};
use kb_storage::query::QueryRows;

use crate::{
	Error, KbService, Result,
	tool::{DatabaseQueryRequest, ToolOutput},
};

pub const DISPLAY_TYPE: &str = "database_query";

/// Row count above which the text dump suggests adding a LIMIT.
const LARGE_RESULT_ROWS: usize = 10;

impl KbService {
	/// Validates and tenant-scopes `request.sql`, then runs it read-only.
	pub async fn database_query(
		&self,
		tenant_id: u64,
		request: DatabaseQueryRequest,
	) -> Result<ToolOutput> {
		let security = &self.cfg.security;
		let guard = SqlGuard::new(tenant_id)
			.with_limits(security.sql_min_chars as usize, security.sql_max_chars as usize);
		let secured = match guard.validate_and_secure(&request.sql) {
			Ok(secured) => secured,
			Err(rejection) => {
				tracing::warn!(tenant_id, reason = %rejection, "SQL rejected.");

				return Err(rejection.into());
			},
		};

		admit(secured.mode, security.allow_unsafe_sql_fallback)?;

		if secured.mode == GuardMode::Unsafe {
			tracing::warn!(tenant_id, "Running SQL without tenant scoping.");
		}

		let rows = self.backends.query.execute_read_only(&secured.sql, security.query_timeout_ms).await?;

		tracing::info!(tenant_id, rows = rows.rows.len(), "Database query finished.");

		Ok(build_query_output(tenant_id, &secured.sql, rows))
	}
}

/// Unscoped SQL from a parser-less build only runs when the operator opted in.
fn admit(mode: GuardMode, allow_unsafe: bool) -> Result<()> {
	match mode {
		GuardMode::Parsed => Ok(()),
		GuardMode::Unsafe if allow_unsafe => Ok(()),
		GuardMode::Unsafe => Err(Error::SqlRejected(SqlRejection::ParserUnavailable)),
	}
}

fn build_query_output(tenant_id: u64, sql: &str, rows: QueryRows) -> ToolOutput {
	let output = format_rows(sql, &rows);
	let QueryRows { columns, rows } = rows;
	let mut data = Map::new();

	data.insert("columns".to_string(), serde_json::json!(columns));
	data.insert("row_count".to_string(), serde_json::json!(rows.len()));
	data.insert(
		"rows".to_string(),
		Value::Array(rows.into_iter().map(Value::Object).collect()),
	);
	data.insert("query".to_string(), serde_json::json!(sql));
	data.insert("tenant_id".to_string(), serde_json::json!(tenant_id));
	data.insert("display_type".to_string(), serde_json::json!(DISPLAY_TYPE));

	ToolOutput { output, data: Value::Object(data) }
}

fn format_rows(sql: &str, rows: &QueryRows) -> String {
	let mut output = String::from("=== Query Results ===\n\n");

	output.push_str(&format!("Executed SQL: {sql}\n\n{} rows returned\n\n", rows.rows.len()));

	if rows.rows.is_empty() {
		output.push_str("No matching records found.\n");

		return output;
	}

	output.push_str("=== Rows ===\n\n");

	for (idx, row) in rows.rows.iter().enumerate() {
		output.push_str(&format!("--- Row #{} ---\n", idx + 1));

		for column in &rows.columns {
			output.push_str(&format!("  {column}: {}\n", format_value(row.get(column))));
		}

		output.push('\n');
	}

	if rows.rows.len() > LARGE_RESULT_ROWS {
		output.push_str(&format!(
			"Note: {} rows were returned. Add a LIMIT clause to narrow the result.\n",
			rows.rows.len()
		));
	}

	output
}

fn format_value(value: Option<&Value>) -> String {
	match value {
		None | Some(Value::Null) => "<NULL>".to_string(),
		Some(Value::String(raw)) => raw.clone(),
		Some(other) => other.to_string(),
	}
}
