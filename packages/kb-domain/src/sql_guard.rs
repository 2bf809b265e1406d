//! Validation and tenant scoping for agent-authored read-only SQL.
//!
//! A query is accepted only if it is a single plain `SELECT` over allow-listed tables that calls
//! allow-listed functions. Accepted queries are re-rendered from the parse tree with a tenant
//! predicate for every tenant-scoped table reference.

#[cfg(feature = "sql-parser")]
mod parsed;
#[cfg(not(feature = "sql-parser"))]
mod prefix;

pub const ALLOWED_TABLES: [&str; 8] = [
	"tenants",
	"knowledge_bases",
	"knowledges",
	"sessions",
	"messages",
	"chunks",
	"embeddings",
	"models",
];

/// Tables filtered by `tenant_id`; `tenants` itself is filtered by `id`.
pub const TENANT_SCOPED_TABLES: [&str; 5] =
	["tenants", "knowledge_bases", "knowledges", "sessions", "chunks"];

pub const ALLOWED_FUNCTIONS: [&str; 43] = [
	"count",
	"sum",
	"avg",
	"min",
	"max",
	"array_agg",
	"string_agg",
	"bool_and",
	"bool_or",
	"json_agg",
	"jsonb_agg",
	"json_object_agg",
	"jsonb_object_agg",
	"coalesce",
	"nullif",
	"greatest",
	"least",
	"abs",
	"ceil",
	"floor",
	"round",
	"length",
	"lower",
	"upper",
	"trim",
	"ltrim",
	"rtrim",
	"substring",
	"concat",
	"concat_ws",
	"replace",
	"left",
	"right",
	"now",
	"current_date",
	"current_timestamp",
	"date_trunc",
	"extract",
	"to_char",
	"to_date",
	"to_timestamp",
	"date_part",
	"age",
];

pub const BLOCKED_FUNCTIONS: [&str; 6] =
	["current_setting", "set_config", "query_to_xml", "xpath", "xmlparse", "txid_current"];

pub const BLOCKED_FUNCTION_PREFIXES: [&str; 5] = ["pg_", "lo_", "dblink", "file_", "copy_"];

pub const SYSTEM_COLUMNS: [&str; 6] = ["xmin", "xmax", "cmin", "cmax", "ctid", "tableoid"];

pub const DEFAULT_MIN_CHARS: usize = 6;
pub const DEFAULT_MAX_CHARS: usize = 4_096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlRejection {
	#[error("Invalid character in SQL query.")]
	InvalidCharacter,
	#[error("SQL query too short (min {min} characters).")]
	TooShort { min: usize },
	#[error("SQL query too long (max {max} characters).")]
	TooLong { max: usize },
	#[error("SQL parse error: {message}")]
	Parse { message: String },
	#[error("Empty query.")]
	Empty,
	#[error("Multiple statements are not allowed.")]
	MultipleStatements,
	#[error("Only SELECT queries are allowed.")]
	NotSelect,
	#[error("Compound queries (UNION/INTERSECT/EXCEPT) are not allowed.")]
	CompoundQuery,
	#[error("WITH clause (CTEs) is not allowed.")]
	CommonTableExpression,
	#[error("SELECT INTO is not allowed.")]
	SelectInto,
	#[error("Locking clauses (FOR UPDATE, etc.) are not allowed.")]
	LockingClause,
	#[error("Access to schema '{schema}' is not allowed.")]
	SchemaNotAllowed { schema: String },
	#[error("Table not allowed: {table}.")]
	TableNotAllowed { table: String },
	#[error("Column aliases on table references are not allowed: {alias}.")]
	ColumnAlias { alias: String },
	#[error("Subqueries in FROM clause are not allowed.")]
	SubqueryInFrom,
	#[error("Functions in FROM clause are not allowed.")]
	FunctionInFrom,
	#[error("Unsupported FROM item.")]
	UnsupportedFrom,
	#[error("Subqueries are not allowed.")]
	Subquery,
	#[error("Schema-qualified function calls are not allowed: {schema}.")]
	SchemaQualifiedFunction { schema: String },
	#[error("Function '{name}' is not allowed.")]
	DangerousFunction { name: String },
	#[error("Function not allowed: {name}.")]
	FunctionNotAllowed { name: String },
	#[error("Access to system column '{column}' is not allowed.")]
	SystemColumn { column: String },
	#[error("Casting to system type '{type_name}' is not allowed.")]
	SystemCast { type_name: String },
	#[error("No valid table found in query.")]
	NoTable,
	#[error("SQL parser is unavailable in this build; unscoped queries are refused.")]
	ParserUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
	/// Full parse, allow-list walk and tenant predicate injection.
	Parsed,
	/// Prefix check only. No tenant predicates were added.
	Unsafe,
}

/// A table referenced in FROM and the name it is addressed by in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
	pub table: String,
	pub qualifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredQuery {
	pub sql: String,
	pub mode: GuardMode,
	pub tables: Vec<TableRef>,
}

#[derive(Debug, Clone)]
pub struct SqlGuard {
	tenant_id: u64,
	min_chars: usize,
	max_chars: usize,
}
impl SqlGuard {
	pub fn new(tenant_id: u64) -> Self {
		Self { tenant_id, min_chars: DEFAULT_MIN_CHARS, max_chars: DEFAULT_MAX_CHARS }
	}

	pub fn with_limits(mut self, min_chars: usize, max_chars: usize) -> Self {
		self.min_chars = min_chars;
		self.max_chars = max_chars;

		self
	}

	pub fn tenant_id(&self) -> u64 {
		self.tenant_id
	}

	pub fn validate_and_secure(&self, sql: &str) -> Result<SecuredQuery, SqlRejection> {
		self.validate_input(sql)?;

		#[cfg(feature = "sql-parser")]
		{
			parsed::secure(sql, self.tenant_id)
		}
		#[cfg(not(feature = "sql-parser"))]
		{
			prefix::secure(sql)
		}
	}

	fn validate_input(&self, sql: &str) -> Result<(), SqlRejection> {
		if sql.contains('\0') {
			return Err(SqlRejection::InvalidCharacter);
		}

		let chars = sql.chars().count();

		if chars < self.min_chars {
			return Err(SqlRejection::TooShort { min: self.min_chars });
		}
		if chars > self.max_chars {
			return Err(SqlRejection::TooLong { max: self.max_chars });
		}

		Ok(())
	}
}

/// Whether this build carries the SQL parser.
pub const fn parser_available() -> bool {
	cfg!(feature = "sql-parser")
}

pub fn is_allowed_table(table: &str) -> bool {
	ALLOWED_TABLES.contains(&table)
}

pub fn is_tenant_scoped(table: &str) -> bool {
	TENANT_SCOPED_TABLES.contains(&table)
}

/// Checks a lowercased function name against the deny rules and the allow-list.
pub fn check_function_name(name: &str) -> Result<(), SqlRejection> {
	if BLOCKED_FUNCTION_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
		return Err(SqlRejection::DangerousFunction { name: name.to_string() });
	}
	if BLOCKED_FUNCTIONS.contains(&name) {
		return Err(SqlRejection::DangerousFunction { name: name.to_string() });
	}
	if !ALLOWED_FUNCTIONS.contains(&name) {
		return Err(SqlRejection::FunctionNotAllowed { name: name.to_string() });
	}

	Ok(())
}

/// Checks a lowercased column name part.
pub fn check_column_name(column: &str) -> Result<(), SqlRejection> {
	if SYSTEM_COLUMNS.contains(&column) || column.starts_with("pg_") {
		return Err(SqlRejection::SystemColumn { column: column.to_string() });
	}

	Ok(())
}
