//! Execution of already-secured read-only SQL.

use std::{collections::HashSet, fmt};

use serde::{
	Deserialize, Deserializer,
	de::{MapAccess, Visitor},
};
use serde_json::{Map, Value};

use crate::{Error, Result, db::Db};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
	/// Column names in select-list order, taken from the first row. A repeated name gets a `_2`,
	/// `_3`, ... suffix so no value is lost.
	pub columns: Vec<String>,
	pub rows: Vec<Map<String, Value>>,
}

/// Runs `sql` in a read-only transaction bounded by `timeout_ms`, then rolls the transaction back.
///
/// The statement is wrapped in `row_to_json` so every column type comes back as JSON.
pub async fn execute_read_only(db: &Db, sql: &str, timeout_ms: u64) -> Result<QueryRows> {
	if timeout_ms == 0 {
		return Err(Error::InvalidArgument("timeout_ms must be greater than zero.".to_string()));
	}

	let mut tx = db.pool.begin().await?;

	sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
	// SET does not take bind parameters.
	sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}")).execute(&mut *tx).await?;

	let wrapped = format!("SELECT row_to_json(q)::text FROM ({sql}) AS q");
	let raw_rows: Vec<String> = sqlx::query_scalar(&wrapped).fetch_all(&mut *tx).await?;

	tx.rollback().await?;

	let rows = parse_rows(&raw_rows)?;

	tracing::debug!(rows = rows.rows.len(), "Read-only query finished.");

	Ok(rows)
}

/// One `row_to_json` object with its keys in order, duplicates included.
struct OrderedRow(Vec<(String, Value)>);
impl<'de> Deserialize<'de> for OrderedRow {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		deserializer.deserialize_map(OrderedRowVisitor)
	}
}

struct OrderedRowVisitor;
impl<'de> Visitor<'de> for OrderedRowVisitor {
	type Value = OrderedRow;

	fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
		formatter.write_str("a JSON object")
	}

	fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
	where
		A: MapAccess<'de>,
	{
		let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));

		while let Some(entry) = access.next_entry::<String, Value>()? {
			entries.push(entry);
		}

		Ok(OrderedRow(entries))
	}
}

fn parse_rows(raw_rows: &[String]) -> Result<QueryRows> {
	let mut rows = Vec::with_capacity(raw_rows.len());

	for raw in raw_rows {
		let OrderedRow(entries) = serde_json::from_str(raw)
			.map_err(|err| Error::InvalidArgument(format!("Malformed row JSON: {err}.")))?;

		rows.push(unique_columns(entries));
	}

	let columns = rows.first().map(|row| row.keys().cloned().collect()).unwrap_or_default();

	Ok(QueryRows { columns, rows })
}

fn unique_columns(entries: Vec<(String, Value)>) -> Map<String, Value> {
	let mut seen = HashSet::with_capacity(entries.len());
	let mut row = Map::new();

	for (name, value) in entries {
		let mut column = name.clone();
		let mut n = 2;

		while !seen.insert(column.clone()) {
			column = format!("{name}_{n}");
			n += 1;
		}

		row.insert(column, value);
	}

	row
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keeps_select_list_order() {
		let parsed = parse_rows(&[
			r#"{"name":"Docs","id":"kb1","doc_count":3}"#.to_string(),
			r#"{"name":"FAQ","id":"kb2","doc_count":null}"#.to_string(),
		])
		.expect("Rows must parse.");

		assert_eq!(parsed.columns, vec!["name", "id", "doc_count"]);
		assert_eq!(parsed.rows.len(), 2);
		assert_eq!(parsed.rows[1]["doc_count"], Value::Null);
	}

	#[test]
	fn empty_result_has_no_columns() {
		let parsed = parse_rows(&[]).expect("Empty rows must parse.");

		assert!(parsed.columns.is_empty());
		assert!(parsed.rows.is_empty());
	}

	#[test]
	fn repeated_column_names_keep_every_value() {
		let parsed = parse_rows(&[
			r#"{"id":"k1","id":"c1","title":"Guide","id":"kb1"}"#.to_string(),
			r#"{"id":"k2","id":"c2","title":"FAQ","id":"kb2"}"#.to_string(),
		])
		.expect("Rows must parse.");

		assert_eq!(parsed.columns, vec!["id", "id_2", "title", "id_3"]);
		assert_eq!(parsed.rows[0]["id"], "k1");
		assert_eq!(parsed.rows[0]["id_2"], "c1");
		assert_eq!(parsed.rows[1]["id_3"], "kb2");
	}

	#[test]
	fn suffixed_names_do_not_collide_with_real_columns() {
		let parsed = parse_rows(&[r#"{"id_2":1,"id":2,"id":3}"#.to_string()])
			.expect("Rows must parse.");

		assert_eq!(parsed.columns, vec!["id_2", "id", "id_3"]);
		assert_eq!(parsed.rows[0]["id_3"], 3);
	}

	#[test]
	fn rejects_non_object_rows() {
		assert!(parse_rows(&["[1,2]".to_string()]).is_err());
	}
}
