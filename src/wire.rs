use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::error;

use crate::backend::{Backend, Outcome};
use crate::booking::BookingError;
use crate::model::BookingView;
use crate::observability;
use crate::sql::{self, Command};

pub struct ClinicBookingHandler {
    backend: Arc<Backend>,
    query_parser: Arc<ClinicBookingQueryParser>,
}

impl ClinicBookingHandler {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            query_parser: Arc::new(ClinicBookingQueryParser),
        }
    }

    /// Execute off the async runtime: every write fsyncs the log.
    async fn execute_command(&self, cmd: Command, format: Option<&Format>) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let backend = self.backend.clone();
        let result = tokio::task::spawn_blocking(move || backend.execute(cmd)).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => "error")
                    .increment(1);
                if !e.is_client_error() {
                    error!("{label} failed: {e}");
                }
                return Err(booking_err(e));
            }
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => "error")
                    .increment(1);
                error!("{label} task failed: {e}");
                return Err(user_error("XX000", format!("internal error: {e}")));
            }
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => "ok").increment(1);

        match outcome {
            Outcome::Inserted => Ok(Response::Execution(Tag::new("INSERT").with_rows(1))),
            Outcome::Deleted => Ok(Response::Execution(Tag::new("DELETE").with_rows(1))),
            Outcome::NextBooking(view) => next_booking_response(view, format),
        }
    }
}

fn next_booking_schema(format: Option<&Format>) -> Vec<FieldInfo> {
    let columns = [
        ("id", Type::VARCHAR),
        ("start", Type::INT8),
        ("end", Type::INT8),
        ("patient_id", Type::INT8),
        ("doctor_id", Type::INT8),
        ("surgery_type", Type::INT4),
    ];
    columns
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(i));
            FieldInfo::new(name.into(), None, None, ty, field_format)
        })
        .collect()
}

/// Zero or one row: the patient's next booking.
fn next_booking_response(view: Option<BookingView>, format: Option<&Format>) -> PgWireResult<Response> {
    let schema = Arc::new(next_booking_schema(format));
    let rows: Vec<PgWireResult<_>> = view
        .into_iter()
        .map(|booking| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&booking.id.to_string())?;
            encoder.encode_field(&booking.start)?;
            encoder.encode_field(&booking.end)?;
            encoder.encode_field(&booking.patient_id)?;
            encoder.encode_field(&booking.doctor_id)?;
            encoder.encode_field(&booking.surgery_type.code())?;
            Ok(encoder.take_row())
        })
        .collect();

    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn is_next_booking_query(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.contains("SELECT") && upper.contains("NEXT_BOOKING")
}

#[async_trait]
impl SimpleQueryHandler for ClinicBookingHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmds = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.execute_command(cmd, None).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClinicBookingQueryParser;

#[async_trait]
impl QueryParser for ClinicBookingQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        if is_next_booking_query(stmt) {
            Ok(next_booking_schema(column_format))
        } else {
            Ok(vec![])
        }
    }
}

#[async_trait]
impl ExtendedQueryHandler for ClinicBookingHandler {
    type Statement = String;
    type QueryParser = ClinicBookingQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute_command(cmd, Some(&portal.result_column_format)).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = if is_next_booking_query(&target.statement) {
            next_booking_schema(None)
        } else {
            vec![]
        };
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        if is_next_booking_query(&target.statement.statement) {
            Ok(DescribePortalResponse::new(next_booking_schema(Some(
                &target.result_column_format,
            ))))
        } else {
            Ok(DescribePortalResponse::new(vec![]))
        }
    }
}

/// Byte range and index of every `$N` placeholder outside quoted text.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            None => i += 1,
        }
    }
    found
}

/// The highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<String> = portal
        .parameters
        .iter()
        .map(|param| match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        })
        .collect();
    substitute_placeholders(&portal.statement.statement, &values)
}

/// One pass over `sql`: bound values are never rescanned, quoted text is
/// left alone, and placeholders without a value stay as written.
fn substitute_placeholders(sql: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (range, n) in placeholders(sql) {
        let Some(value) = n.checked_sub(1).and_then(|i| values.get(i)) else {
            continue;
        };
        out.push_str(&sql[last..range.start]);
        out.push_str(value);
        last = range.end;
    }
    out.push_str(&sql[last..]);
    out
}

// ── Auth ─────────────────────────────────────────────────────────

/// A single shared password for every user.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ClinicBookingFactory {
    handler: Arc<ClinicBookingHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ClinicBookingFactory {
    pub fn new(backend: Arc<Backend>, password: String) -> Self {
        let auth_source = PasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ClinicBookingHandler::new(backend)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClinicBookingFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    backend: Arc<Backend>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ClinicBookingFactory::new(backend, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// Validation failures are `22023` (invalid_parameter_value) with the
/// message verbatim; anything from the store is `XX000`.
fn booking_sqlstate(e: &BookingError) -> &'static str {
    if e.is_client_error() { "22023" } else { "XX000" }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(booking_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM next_booking"), 0);
        assert_eq!(count_params("SELECT * FROM next_booking WHERE patient_id = $1"), 1);
        assert_eq!(
            count_params(r#"INSERT INTO bookings (patient_id, doctor_id, start, "end") VALUES ($1, $2, $4, $3)"#),
            4
        );
        assert_eq!(count_params("SELECT '$' FROM next_booking"), 0);
        assert_eq!(count_params("DELETE FROM bookings WHERE id = '$7'"), 0);
    }

    fn values(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "SELECT * FROM next_booking WHERE patient_id = $1 AND x = $2";
        assert_eq!(
            substitute_placeholders(sql, &values(&["'$2'", "'7'"])),
            "SELECT * FROM next_booking WHERE patient_id = '$2' AND x = '7'"
        );
    }

    #[test]
    fn quoted_placeholders_are_left_alone() {
        let sql = r#"DELETE FROM bookings WHERE id = '$1' AND "$1" = $1"#;
        assert_eq!(
            substitute_placeholders(sql, &values(&["'x'"])),
            r#"DELETE FROM bookings WHERE id = '$1' AND "$1" = 'x'"#
        );
        // A doubled quote stays inside the literal.
        assert_eq!(
            substitute_placeholders("SELECT 'it''s $1', $1", &values(&["'v'"])),
            "SELECT 'it''s $1', 'v'"
        );
    }

    #[test]
    fn multi_digit_and_unbound_placeholders() {
        let vals: Vec<String> = (1..=10).map(|n| format!("'v{n}'")).collect();
        assert_eq!(substitute_placeholders("$10, $1", &vals), "'v10', 'v1'");
        assert_eq!(substitute_placeholders("$1, $3, $0", &values(&["'a'"])), "'a', $3, $0");
    }

    #[test]
    fn next_booking_queries_detected() {
        assert!(is_next_booking_query("select * from next_booking where patient_id = $1"));
        assert!(!is_next_booking_query("INSERT INTO bookings VALUES (1, 2, 3, 4)"));
    }

    #[test]
    fn next_booking_schema_columns() {
        let names: Vec<String> = next_booking_schema(None)
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(
            names,
            ["id", "start", "end", "patient_id", "doctor_id", "surgery_type"]
        );
    }

    #[test]
    fn validation_errors_map_to_invalid_parameter_value() {
        let e = BookingError::InvalidArgument("A doctor with that ID could not be found".into());
        assert_eq!(booking_sqlstate(&e), "22023");
        assert_eq!(e.to_string(), "A doctor with that ID could not be found");
    }

    #[test]
    fn store_errors_map_to_internal_error() {
        let e = BookingError::Store(StoreError::Poisoned);
        assert_eq!(booking_sqlstate(&e), "XX000");
    }
}
