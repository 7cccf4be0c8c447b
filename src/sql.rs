use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterClinic {
        id: ClinicId,
        surgery_type: SurgeryType,
    },
    RegisterPatient {
        id: PatientId,
        clinic_id: ClinicId,
    },
    RegisterDoctor {
        id: DoctorId,
    },
    AddBooking(AddBookingRequest),
    DeleteBooking {
        id: Ulid,
    },
    SelectNextBooking {
        patient_id: PatientId,
    },
}

const CLINIC_COLUMNS: &[&str] = &["id", "surgery_type"];
const PATIENT_COLUMNS: &[&str] = &["id", "clinic_id"];
const DOCTOR_COLUMNS: &[&str] = &["id"];
const BOOKING_COLUMNS: &[&str] = &["patient_id", "doctor_id", "start", "end"];

/// Parse a single statement. Anything after the first is ignored.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    parse_statement(&stmts[0])
}

/// Parse every `;`-separated statement, as a simple-query string may carry several.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    parse_statements(sql)?.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts)
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "clinics" => {
            let values = insert_row(insert, "clinics", CLINIC_COLUMNS)?;
            let code = parse_i64(&values[1])?;
            let surgery_type = SurgeryType::try_from(code)
                .map_err(|c| SqlError::Parse(format!("unknown surgery_type {c}")))?;
            Ok(Command::RegisterClinic {
                id: parse_i64(&values[0])?,
                surgery_type,
            })
        }
        "patients" => {
            let values = insert_row(insert, "patients", PATIENT_COLUMNS)?;
            Ok(Command::RegisterPatient {
                id: parse_i64(&values[0])?,
                clinic_id: parse_i64(&values[1])?,
            })
        }
        "doctors" => {
            let values = insert_row(insert, "doctors", DOCTOR_COLUMNS)?;
            Ok(Command::RegisterDoctor {
                id: parse_i64(&values[0])?,
            })
        }
        "bookings" => {
            let values = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            Ok(Command::AddBooking(AddBookingRequest {
                patient_id: parse_i64(&values[0])?,
                doctor_id: parse_i64(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking {
            id: extract_where_id(&delete.selection)?,
        }),
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
    if table != "next_booking" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut patient_id = None;
    if let Some(selection) = &select.selection {
        extract_next_booking_filters(selection, &mut patient_id)?;
    }

    Ok(Command::SelectNextBooking {
        patient_id: patient_id.ok_or(SqlError::MissingFilter("patient_id"))?,
    })
}

fn extract_next_booking_filters(expr: &Expr, patient_id: &mut Option<PatientId>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_next_booking_filters(left, patient_id)?;
            extract_next_booking_filters(right, patient_id)?;
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("patient_id") => {
            *patient_id = Some(parse_i64(right)?);
        }
        Expr::Nested(inner) => extract_next_booking_filters(inner, patient_id)?,
        _ => {}
    }
    Ok(())
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

/// The single VALUES row of an INSERT, arranged in `expected` column order.
/// With no column list the values are taken positionally.
fn insert_row(insert: &ast::Insert, table: &'static str, expected: &[&'static str]) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if row.len() != expected.len() {
        return Err(SqlError::WrongArity(table, expected.len(), row.len()));
    }
    if insert.columns.is_empty() {
        return Ok(row.clone());
    }

    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, columns.len(), row.len()));
    }
    expected
        .iter()
        .map(|&want| {
            columns
                .iter()
                .position(|c| c == want)
                .map(|i| row[i].clone())
                .ok_or(SqlError::MissingColumn(table, want))
        })
        .collect()
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// Integers arrive bare, or quoted when bound through the extended protocol.
fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64 {s:?}: {e}"))),
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
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
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
