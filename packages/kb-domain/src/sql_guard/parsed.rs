use std::ops::ControlFlow;

use sqlparser::{
	ast::{
		BinaryOperator, Expr, Ident, Query, SetExpr, Statement, TableAlias, TableFactor,
		TableWithJoins, Value, visit_expressions,
	},
	dialect::PostgreSqlDialect,
	parser::Parser,
};

use crate::sql_guard::{
	GuardMode, SecuredQuery, SqlRejection, TableRef, check_column_name, check_function_name,
	is_allowed_table, is_tenant_scoped,
};

struct ScopedTable {
	table: String,
	qualifier: Ident,
}

pub(super) fn secure(sql: &str, tenant_id: u64) -> Result<SecuredQuery, SqlRejection> {
	let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
		.map_err(|err| SqlRejection::Parse { message: err.to_string() })?;

	match statements.len() {
		0 => return Err(SqlRejection::Empty),
		1 => {},
		_ => return Err(SqlRejection::MultipleStatements),
	}

	let Some(Statement::Query(mut query)) = statements.pop() else {
		return Err(SqlRejection::NotSelect);
	};

	check_query_shape(&query)?;

	let tables = match query.body.as_ref() {
		SetExpr::Select(select) => {
			if select.into.is_some() {
				return Err(SqlRejection::SelectInto);
			}

			collect_tables(&select.from)?
		},
		SetExpr::SetOperation { .. } => return Err(SqlRejection::CompoundQuery),
		_ => return Err(SqlRejection::NotSelect),
	};

	check_expressions(&query)?;

	if tables.is_empty() {
		return Err(SqlRejection::NoTable);
	}

	inject_tenant_predicates(&mut query, &tables, tenant_id);

	Ok(SecuredQuery {
		sql: query.to_string(),
		mode: GuardMode::Parsed,
		tables: tables
			.into_iter()
			.map(|scoped| TableRef { table: scoped.table, qualifier: scoped.qualifier.value })
			.collect(),
	})
}

fn check_query_shape(query: &Query) -> Result<(), SqlRejection> {
	if query.with.is_some() {
		return Err(SqlRejection::CommonTableExpression);
	}
	if !query.locks.is_empty() {
		return Err(SqlRejection::LockingClause);
	}

	Ok(())
}

fn collect_tables(from: &[TableWithJoins]) -> Result<Vec<ScopedTable>, SqlRejection> {
	let mut tables = Vec::new();

	for item in from {
		collect_factor(&item.relation, &mut tables)?;

		for join in &item.joins {
			collect_factor(&join.relation, &mut tables)?;
		}
	}

	Ok(tables)
}

/// A column list renames the columns the tenant predicate is written against.
fn reject_column_alias(alias: Option<&TableAlias>) -> Result<(), SqlRejection> {
	match alias {
		Some(alias) if !alias.columns.is_empty() =>
			Err(SqlRejection::ColumnAlias { alias: alias.name.value.clone() }),
		_ => Ok(()),
	}
}

fn collect_factor(factor: &TableFactor, tables: &mut Vec<ScopedTable>) -> Result<(), SqlRejection> {
	match factor {
		TableFactor::Table { name, alias, args, .. } => {
			if args.is_some() {
				return Err(SqlRejection::FunctionInFrom);
			}

			let parts = &name.0;
			let Some(last) = parts.last() else { return Err(SqlRejection::UnsupportedFrom) };

			if parts.len() > 1 {
				let schema = parts[parts.len() - 2].value.to_lowercase();

				if parts.len() > 2 || schema != "public" {
					return Err(SqlRejection::SchemaNotAllowed {
						schema: parts[..parts.len() - 1]
							.iter()
							.map(|ident| ident.value.as_str())
							.collect::<Vec<_>>()
							.join("."),
					});
				}
			}

			let table = last.value.to_lowercase();

			if !is_allowed_table(&table) {
				return Err(SqlRejection::TableNotAllowed { table: last.value.clone() });
			}

			reject_column_alias(alias.as_ref())?;

			let qualifier = match alias {
				Some(alias) => alias.name.clone(),
				None => last.clone(),
			};

			tables.push(ScopedTable { table, qualifier });

			Ok(())
		},
		TableFactor::NestedJoin { table_with_joins, alias } => {
			reject_column_alias(alias.as_ref())?;
			collect_factor(&table_with_joins.relation, tables)?;

			for join in &table_with_joins.joins {
				collect_factor(&join.relation, tables)?;
			}

			Ok(())
		},
		TableFactor::Derived { .. } => Err(SqlRejection::SubqueryInFrom),
		TableFactor::TableFunction { .. }
		| TableFactor::Function { .. }
		| TableFactor::UNNEST { .. } => Err(SqlRejection::FunctionInFrom),
		_ => Err(SqlRejection::UnsupportedFrom),
	}
}

/// Walks every expression in the statement: targets, WHERE, GROUP BY, HAVING, ORDER BY and join
/// conditions.
fn check_expressions(query: &Query) -> Result<(), SqlRejection> {
	let flow = visit_expressions(query, |expr| match check_expr(expr) {
		Ok(()) => ControlFlow::Continue(()),
		Err(rejection) => ControlFlow::Break(rejection),
	});

	match flow {
		ControlFlow::Break(rejection) => Err(rejection),
		ControlFlow::Continue(()) => Ok(()),
	}
}

fn check_expr(expr: &Expr) -> Result<(), SqlRejection> {
	match expr {
		Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } =>
			Err(SqlRejection::Subquery),
		Expr::Function(function) => {
			let parts: Vec<String> =
				function.name.0.iter().map(|ident| ident.value.to_lowercase()).collect();
			let Some(name) = parts.last() else {
				return Err(SqlRejection::FunctionNotAllowed { name: String::new() });
			};

			if parts.len() > 1 {
				let schema = parts[..parts.len() - 1].join(".");

				if schema != "pg_catalog" {
					return Err(SqlRejection::SchemaQualifiedFunction { schema });
				}
			}

			check_function_name(name)
		},
		Expr::Identifier(ident) => check_column_name(&ident.value.to_lowercase()),
		Expr::CompoundIdentifier(idents) => {
			for ident in idents {
				check_column_name(&ident.value.to_lowercase())?;
			}

			Ok(())
		},
		Expr::Cast { data_type, .. } | Expr::TypedString { data_type, .. } => {
			let type_name = data_type.to_string();

			if type_name.to_lowercase().starts_with("pg_") {
				return Err(SqlRejection::SystemCast { type_name });
			}

			Ok(())
		},
		_ => Ok(()),
	}
}

fn inject_tenant_predicates(query: &mut Query, tables: &[ScopedTable], tenant_id: u64) {
	let filter = tables
		.iter()
		.filter(|scoped| is_tenant_scoped(&scoped.table))
		.map(|scoped| tenant_predicate(scoped, tenant_id))
		.reduce(and);
	let Some(filter) = filter else { return };
	let SetExpr::Select(select) = query.body.as_mut() else { return };

	select.selection = Some(match select.selection.take() {
		Some(existing) => and(filter, Expr::Nested(Box::new(existing))),
		None => filter,
	});
}

fn tenant_predicate(scoped: &ScopedTable, tenant_id: u64) -> Expr {
	let column = if scoped.table == "tenants" { "id" } else { "tenant_id" };

	Expr::BinaryOp {
		left: Box::new(Expr::CompoundIdentifier(vec![scoped.qualifier.clone(), Ident::new(column)])),
		op: BinaryOperator::Eq,
		right: Box::new(Expr::Value(Value::Number(tenant_id.to_string(), false))),
	}
}

fn and(left: Expr, right: Expr) -> Expr {
	Expr::BinaryOp { left: Box::new(left), op: BinaryOperator::And, right: Box::new(right) }
}
