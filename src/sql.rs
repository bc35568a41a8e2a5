use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertAssignment {
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
    },
    UpdateAssignment {
        id: Ulid,
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
    },
    DeleteAssignment {
        id: Ulid,
    },
    SelectAssignment {
        id: Ulid,
    },
    SelectAssignments,
    SelectResourceHistory {
        resource_id: Ulid,
    },
    SelectHoldings {
        assignee_id: Ulid,
    },
    RegisterItem {
        id: Ulid,
    },
    RetireItem {
        id: Ulid,
    },
    SelectItems,
    RegisterPerson {
        id: Ulid,
    },
    RetirePerson {
        id: Ulid,
    },
    SelectPersons,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if !columns.is_empty() && columns.len() != values.len() {
        return Err(SqlError::WrongArity("columns", columns.len(), values.len()));
    }

    match table.as_str() {
        "assignments" => {
            let row = assignment_row(&columns, &values)?;
            let value = |column: &'static str| {
                row[column_slot(column)].ok_or(SqlError::MissingColumn(column))
            };
            let valid_until = match row[column_slot("valid_until")] {
                Some(expr) => parse_i64_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertAssignment {
                resource_id: parse_ulid(value("resource_id")?)?,
                assignee_id: parse_ulid(value("assignee_id")?)?,
                valid_from: parse_i64(value("valid_from")?)?,
                valid_until,
            })
        }
        "items" | "persons" => {
            if values.len() != 1 {
                return Err(SqlError::WrongArity("catalog", 1, values.len()));
            }
            if let Some(column) = columns.first()
                && column != "id"
            {
                return Err(SqlError::Unsupported(format!("column {column}")));
            }
            let id = parse_ulid(&values[0])?;
            Ok(if table == "items" {
                Command::RegisterItem { id }
            } else {
                Command::RegisterPerson { id }
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

const ASSIGNMENT_COLUMNS: [&str; 4] = ["resource_id", "assignee_id", "valid_from", "valid_until"];

fn column_slot(column: &str) -> usize {
    ASSIGNMENT_COLUMNS
        .iter()
        .position(|c| *c == column)
        .unwrap_or(ASSIGNMENT_COLUMNS.len())
}

/// Line the VALUES up with the assignment columns. Without a column list the
/// values are positional and `valid_until` may be left off.
fn assignment_row<'a>(
    columns: &[String],
    values: &'a [Expr],
) -> Result<[Option<&'a Expr>; 4], SqlError> {
    let mut row = [None; 4];
    if columns.is_empty() {
        if !(3..=4).contains(&values.len()) {
            return Err(SqlError::WrongArity("assignments", 4, values.len()));
        }
        for (slot, expr) in row.iter_mut().zip(values) {
            *slot = Some(expr);
        }
        return Ok(row);
    }
    for (column, expr) in columns.iter().zip(values) {
        let slot = row
            .get_mut(column_slot(column))
            .ok_or_else(|| SqlError::Unsupported(format!("column {column}")))?;
        if slot.replace(expr).is_some() {
            return Err(SqlError::Unsupported(format!("duplicate column {column}")));
        }
    }
    Ok(row)
}

/// `UPDATE assignments SET ... WHERE id = ..` replaces the whole record,
/// so every column must be assigned.
fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "assignments" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let (mut resource_id, mut assignee_id, mut valid_from, mut valid_until) =
        (None, None, None, None);
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match column.as_str() {
            "resource_id" => resource_id = Some(parse_ulid(&assignment.value)?),
            "assignee_id" => assignee_id = Some(parse_ulid(&assignment.value)?),
            "valid_from" => valid_from = Some(parse_i64(&assignment.value)?),
            "valid_until" => valid_until = Some(parse_i64_or_null(&assignment.value)?),
            other => return Err(SqlError::Unsupported(format!("column {other}"))),
        }
    }

    Ok(Command::UpdateAssignment {
        id,
        resource_id: resource_id.ok_or(SqlError::MissingColumn("resource_id"))?,
        assignee_id: assignee_id.ok_or(SqlError::MissingColumn("assignee_id"))?,
        valid_from: valid_from.ok_or(SqlError::MissingColumn("valid_from"))?,
        valid_until: valid_until.ok_or(SqlError::MissingColumn("valid_until"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "assignments" => Ok(Command::DeleteAssignment { id }),
        "items" => Ok(Command::RetireItem { id }),
        "persons" => Ok(Command::RetirePerson { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filter = select.selection.as_ref().map(extract_eq_filter).transpose()?;

    match (table.as_str(), filter) {
        ("assignments", None) => Ok(Command::SelectAssignments),
        ("assignments", Some((column, value))) => match column.as_str() {
            "id" => Ok(Command::SelectAssignment {
                id: parse_ulid(value)?,
            }),
            "resource_id" => Ok(Command::SelectResourceHistory {
                resource_id: parse_ulid(value)?,
            }),
            _ => Err(SqlError::Unsupported(format!("filter on {column}"))),
        },
        ("holdings", Some((column, value))) if column == "assignee_id" => {
            Ok(Command::SelectHoldings {
                assignee_id: parse_ulid(value)?,
            })
        }
        ("holdings", _) => Err(SqlError::MissingFilter("assignee_id")),
        ("items", None) => Ok(Command::SelectItems),
        ("persons", None) => Ok(Command::SelectPersons),
        ("items" | "persons", Some((column, _))) => {
            Err(SqlError::Unsupported(format!("filter on {column}")))
        }
        _ => Err(SqlError::UnknownTable(table.clone())),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// A single `column = value` predicate.
fn extract_eq_filter(expr: &Expr) -> Result<(String, &Expr), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            Ok((column, right.as_ref()))
        }
        Expr::Nested(inner) => extract_eq_filter(inner),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match extract_eq_filter(sel) {
        Ok((column, value)) if column == "id" => parse_ulid(value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64(expr)?)),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
