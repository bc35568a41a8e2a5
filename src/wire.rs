use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::auth::CustodyAuthSource;
use crate::engine::{EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::{Tenant, TenantManager};

pub struct CustodyHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CustodyQueryParser>,
    statement_timeout: Duration,
}

impl CustodyHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, statement_timeout: Duration) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CustodyQueryParser),
            statement_timeout,
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Run one statement under a per-statement cancellation token that fires
    /// after the configured timeout, recording RED metrics for it.
    async fn run_statement(&self, tenant: &Tenant, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let cancel = CancellationToken::new();
        let timer = {
            let cancel = cancel.clone();
            let timeout = self.statement_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let result = self.execute_command(tenant, cmd, &cancel).await;
        timer.abort();

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        tenant: &Tenant,
        cmd: Command,
        cancel: &CancellationToken,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &tenant.engine;
        match cmd {
            Command::InsertAssignment {
                resource_id,
                assignee_id,
                valid_from,
                valid_until,
            } => {
                let created = engine
                    .create_assignment(resource_id, assignee_id, valid_from, valid_until, cancel)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![assignment_rows(vec![created])])
            }
            Command::UpdateAssignment {
                id,
                resource_id,
                assignee_id,
                valid_from,
                valid_until,
            } => {
                let updated = engine
                    .update_assignment(id, resource_id, assignee_id, valid_from, valid_until, cancel)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("UPDATE").with_rows(usize::from(updated)),
                )])
            }
            Command::DeleteAssignment { id } => {
                let deleted = engine
                    .delete_assignment(id, cancel)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(deleted)),
                )])
            }
            Command::SelectAssignment { id } => {
                let found = engine.get_assignment(id, cancel).await.map_err(engine_err)?;
                Ok(vec![assignment_rows(found.into_iter().collect())])
            }
            Command::SelectAssignments => {
                let all = engine.list_all(cancel).await.map_err(engine_err)?;
                Ok(vec![assignment_rows(all)])
            }
            Command::SelectResourceHistory { resource_id } => {
                let history = engine
                    .list_for_resource(resource_id, cancel)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![assignment_rows(history)])
            }
            Command::SelectHoldings { assignee_id } => {
                let held = engine
                    .list_resources_for_assignee(assignee_id, cancel)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![holding_rows(held)])
            }
            Command::RegisterItem { id } => {
                let added = tenant.catalog.register_item(id).await.map_err(engine_err)?;
                Ok(vec![catalog_tag("INSERT", added)])
            }
            Command::RetireItem { id } => {
                let removed = tenant.catalog.retire_item(id).await.map_err(engine_err)?;
                Ok(vec![catalog_tag("DELETE", removed)])
            }
            Command::RegisterPerson { id } => {
                let added = tenant.catalog.register_person(id).await.map_err(engine_err)?;
                Ok(vec![catalog_tag("INSERT", added)])
            }
            Command::RetirePerson { id } => {
                let removed = tenant.catalog.retire_person(id).await.map_err(engine_err)?;
                Ok(vec![catalog_tag("DELETE", removed)])
            }
            Command::SelectItems => Ok(vec![id_rows(tenant.catalog.list_items())]),
            Command::SelectPersons => Ok(vec![id_rows(tenant.catalog.list_persons())]),
        }
    }
}

fn catalog_tag(verb: &str, changed: bool) -> Response {
    Response::Execution(Tag::new(verb).with_rows(usize::from(changed)))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn assignments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("resource_id", Type::VARCHAR),
        text_field("assignee_id", Type::VARCHAR),
        text_field("valid_from", Type::INT8),
        text_field("valid_until", Type::INT8),
    ]
}

fn holdings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("resource_id", Type::VARCHAR),
        text_field("last_assigned_from", Type::INT8),
    ]
}

fn ids_schema() -> Vec<FieldInfo> {
    vec![text_field("id", Type::VARCHAR)]
}

fn assignment_rows(assignments: Vec<Assignment>) -> Response {
    let schema = Arc::new(assignments_schema());
    let rows: Vec<PgWireResult<_>> = assignments
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.resource_id.to_string())?;
            encoder.encode_field(&a.assignee_id.to_string())?;
            encoder.encode_field(&a.valid_from)?;
            encoder.encode_field(&a.valid_until)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn holding_rows(held: Vec<HeldResource>) -> Response {
    let schema = Arc::new(holdings_schema());
    let rows: Vec<PgWireResult<_>> = held
        .into_iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.resource_id.to_string())?;
            encoder.encode_field(&h.last_assigned_from)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn id_rows(ids: Vec<Ulid>) -> Response {
    let schema = Arc::new(ids_schema());
    let rows: Vec<PgWireResult<_>> = ids
        .into_iter()
        .map(|id| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&id.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns for a not-yet-bound statement, judged from its text.
fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let is_select = upper.trim_start().starts_with("SELECT");
    let is_insert = upper.trim_start().starts_with("INSERT");
    if is_select && upper.contains("HOLDINGS") {
        holdings_schema()
    } else if (is_select || is_insert) && upper.contains("ASSIGNMENTS") {
        assignments_schema()
    } else if is_select && (upper.contains("ITEMS") || upper.contains("PERSONS")) {
        ids_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CustodyHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_statement(&tenant, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CustodyQueryParser;

#[async_trait]
impl QueryParser for CustodyQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CustodyHandler {
    type Statement = String;
    type QueryParser = CustodyQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_statement(&tenant, cmd).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    // Highest index first so $1 never clobbers the prefix of $10.
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CustodyFactory {
    handler: Arc<CustodyHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CustodyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CustodyFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        password: String,
        statement_timeout: Duration,
    ) -> Self {
        let auth_source = CustodyAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CustodyHandler::new(tenant_manager, statement_timeout)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CustodyFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
    statement_timeout: Duration,
) -> std::io::Result<()> {
    let factory = CustodyFactory::new(tenant_manager, password, statement_timeout);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match (e.kind(), e) {
        (ErrorKind::NotFound, _) => "P0002",
        (ErrorKind::BadRequest, EngineError::ResourceNotFound(_) | EngineError::AssigneeNotFound(_)) => {
            "23503"
        }
        (ErrorKind::BadRequest, _) => "22023",
        (ErrorKind::Conflict, _) => "23P01",
        (ErrorKind::Cancelled, _) => "57014",
        (ErrorKind::Internal, _) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
