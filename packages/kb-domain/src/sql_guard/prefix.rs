use crate::sql_guard::{GuardMode, SecuredQuery, SqlRejection};

/// Prefix-only check used when the crate is built without the SQL parser. Nothing is scoped, so the
/// result is marked [`GuardMode::Unsafe`].
pub(super) fn secure(sql: &str) -> Result<SecuredQuery, SqlRejection> {
	if !sql.trim_start().to_uppercase().starts_with("SELECT") {
		return Err(SqlRejection::NotSelect);
	}

	Ok(SecuredQuery { sql: sql.to_string(), mode: GuardMode::Unsafe, tables: Vec::new() })
}
