use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{self, ParkspaceAuthSource};
use crate::engine::{Engine, EngineError, ErrorKind, NewReservation};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct ParkspaceHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ParkspaceQueryParser>,
}

impl ParkspaceHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ParkspaceQueryParser),
        }
    }

    /// The startup `user` was vetted by the auth source; parse it again
    /// per query rather than keeping per-connection state.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        auth::parse_identity(client.metadata().get("user").map(String::as_str))
            .map_err(auth::identity_err)
    }

    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let start = Instant::now();
        let result = self.execute_command(&actor, cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        actor: &Actor,
        cmd: Command,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertReservation {
                listing_id,
                booking_date,
                start_time,
                end_time,
                vehicle_info,
                notes,
            } => {
                let reservation = engine
                    .create_reservation(
                        actor,
                        NewReservation {
                            listing_id,
                            booking_date,
                            start_time,
                            end_time,
                            vehicle_info,
                            notes,
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Reservations, format, [reservation], encode_reservation))
            }
            Command::UpdateReservationStatus { id, status } => {
                let reservation = engine
                    .transition_reservation(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Reservations, format, [reservation], encode_reservation))
            }
            Command::UpdatePaymentStatus { id, payment_status } => {
                let reservation = engine
                    .set_payment_status(actor, id, payment_status)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Reservations, format, [reservation], encode_reservation))
            }
            Command::SelectReservations { filter } => {
                // A lookup by id reports why the row is missing.
                let found = match filter.id {
                    Some(id) => {
                        let r = engine.get_reservation(actor, id).map_err(engine_err)?;
                        filter.matches(&r).then_some(r).into_iter().collect()
                    }
                    None => engine.list_reservations(actor, &filter),
                };
                Ok(rows(Shape::Reservations, format, found, encode_reservation))
            }
            Command::SelectAvailability {
                listing_id,
                booking_date,
                start_time,
                end_time,
            } => {
                let info = engine
                    .check_availability(listing_id, booking_date, start_time, end_time)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Availability, format, [info], encode_availability))
            }
            Command::SelectBookedSlots {
                listing_id,
                booking_date,
            } => {
                let slots = engine
                    .booked_slots(listing_id, booking_date)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::BookedSlots, format, slots, encode_slot))
            }
            Command::SelectNearbyListings {
                center,
                radius_km,
                include_inactive,
            } => {
                let hits = engine
                    .nearby_listings(actor, center, radius_km, include_inactive)
                    .map_err(engine_err)?;
                Ok(rows(Shape::NearbyListings, format, hits, encode_nearby))
            }
            Command::SelectLocationSuggestions { prefix, limit } => {
                let suggestions = engine.location_suggestions(&prefix, limit);
                Ok(rows(Shape::LocationSuggestions, format, suggestions, encode_suggestion))
            }
            Command::InsertListing { lister_id, draft } => {
                let listing = engine
                    .create_listing(actor, lister_id, draft)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Listings, format, [listing], encode_listing))
            }
            Command::UpdateListing { id, patch } => {
                let listing = engine
                    .update_listing(actor, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::Listings, format, [listing], encode_listing))
            }
            Command::SelectListings { id } => {
                let listings = match id {
                    Some(id) => vec![engine.get_listing(actor, id).map_err(engine_err)?],
                    None => engine.list_listings(actor),
                };
                Ok(rows(Shape::Listings, format, listings, encode_listing))
            }
            Command::InsertParkingRequest { draft } => {
                let request = engine
                    .submit_parking_request(actor, draft)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::ParkingRequests, format, [request], encode_request))
            }
            Command::ReviewParkingRequest { id, status } => {
                let request = engine
                    .review_parking_request(actor, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(Shape::ParkingRequests, format, [request], encode_request))
            }
            Command::SelectParkingRequests { status } => {
                let mut requests = engine.list_parking_requests(actor).map_err(engine_err)?;
                if let Some(status) = status {
                    requests.retain(|r| r.status == status);
                }
                Ok(rows(Shape::ParkingRequests, format, requests, encode_request))
            }
        }
    }
}

// ── Result shapes ────────────────────────────────────────────────

/// Row layout of each queryable table. Every statement returns rows,
/// mutations included (the affected record, like `RETURNING *`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Reservations,
    Availability,
    BookedSlots,
    NearbyListings,
    LocationSuggestions,
    Listings,
    ParkingRequests,
}

impl Shape {
    fn for_table(table: &str) -> Option<Self> {
        Some(match table {
            "reservations" => Shape::Reservations,
            "availability" => Shape::Availability,
            "booked_slots" => Shape::BookedSlots,
            "nearby_listings" => Shape::NearbyListings,
            "location_suggestions" => Shape::LocationSuggestions,
            "listings" => Shape::Listings,
            "parking_requests" => Shape::ParkingRequests,
            _ => return None,
        })
    }

    fn for_sql(sql: &str) -> Option<Self> {
        sql::target_table(sql).and_then(|t| Self::for_table(&t))
    }

    fn columns(self) -> Vec<(&'static str, Type)> {
        let listing = || {
            vec![
                ("id", Type::VARCHAR),
                ("lister_id", Type::VARCHAR),
                ("label", Type::VARCHAR),
                ("lat", Type::FLOAT8),
                ("lng", Type::FLOAT8),
                ("rate", Type::VARCHAR),
                ("availability", Type::VARCHAR),
                ("is_active", Type::BOOL),
            ]
        };
        match self {
            Shape::Reservations => vec![
                ("id", Type::VARCHAR),
                ("listing_id", Type::VARCHAR),
                ("user_id", Type::VARCHAR),
                ("lister_id", Type::VARCHAR),
                ("booking_date", Type::VARCHAR),
                ("start_time", Type::VARCHAR),
                ("end_time", Type::VARCHAR),
                ("status", Type::VARCHAR),
                ("payment_status", Type::VARCHAR),
                ("total_amount", Type::VARCHAR),
                ("vehicle_info", Type::VARCHAR),
                ("notes", Type::VARCHAR),
                ("created_at", Type::INT8),
            ],
            Shape::Availability => vec![("available", Type::BOOL), ("conflict_count", Type::INT8)],
            Shape::BookedSlots => vec![("start_time", Type::VARCHAR), ("end_time", Type::VARCHAR)],
            Shape::NearbyListings => {
                let mut cols = listing();
                cols.push(("distance_km", Type::FLOAT8));
                cols
            }
            Shape::LocationSuggestions => vec![
                ("listing_id", Type::VARCHAR),
                ("label", Type::VARCHAR),
                ("lat", Type::FLOAT8),
                ("lng", Type::FLOAT8),
            ],
            Shape::Listings => listing(),
            Shape::ParkingRequests => vec![
                ("id", Type::VARCHAR),
                ("lister_id", Type::VARCHAR),
                ("label", Type::VARCHAR),
                ("lat", Type::FLOAT8),
                ("lng", Type::FLOAT8),
                ("rate", Type::VARCHAR),
                ("availability", Type::VARCHAR),
                ("status", Type::VARCHAR),
                ("listing_id", Type::VARCHAR),
            ],
        }
    }

    /// Field descriptions in the client's requested result formats
    /// (text when none were requested).
    fn schema(self, format: Option<&Format>) -> Vec<FieldInfo> {
        self.columns()
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| {
                let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
                FieldInfo::new(name.into(), None, None, ty, field_format)
            })
            .collect()
    }
}

fn rows<T>(
    shape: Shape,
    format: Option<&Format>,
    items: impl IntoIterator<Item = T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(shape.schema(format));
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn date_text(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn time_text(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.listing_id.to_string())?;
    enc.encode_field(&r.user_id.to_string())?;
    enc.encode_field(&r.lister_id.to_string())?;
    enc.encode_field(&date_text(r.booking_date))?;
    enc.encode_field(&time_text(r.start_time))?;
    enc.encode_field(&time_text(r.end_time))?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.payment_status.to_string())?;
    enc.encode_field(&format!("{:.2}", r.total_amount))?;
    enc.encode_field(&r.vehicle_info)?;
    enc.encode_field(&r.notes)?;
    enc.encode_field(&r.created_at)
}

fn encode_availability(enc: &mut DataRowEncoder, info: &AvailabilityInfo) -> PgWireResult<()> {
    enc.encode_field(&info.available)?;
    enc.encode_field(&(info.conflict_count as i64))
}

fn encode_slot(enc: &mut DataRowEncoder, slot: &TimeSlot) -> PgWireResult<()> {
    enc.encode_field(&time_text(slot.start))?;
    enc.encode_field(&time_text(slot.end))
}

fn encode_listing(enc: &mut DataRowEncoder, l: &Listing) -> PgWireResult<()> {
    enc.encode_field(&l.id.to_string())?;
    enc.encode_field(&l.lister_id.to_string())?;
    enc.encode_field(&l.label)?;
    enc.encode_field(&l.coordinate.lat)?;
    enc.encode_field(&l.coordinate.lng)?;
    enc.encode_field(&l.rate)?;
    enc.encode_field(&l.availability)?;
    enc.encode_field(&l.is_active)
}

fn encode_nearby(enc: &mut DataRowEncoder, hit: &NearbyListing) -> PgWireResult<()> {
    encode_listing(enc, &hit.listing)?;
    enc.encode_field(&hit.distance_km)
}

fn encode_suggestion(enc: &mut DataRowEncoder, s: &LocationSuggestion) -> PgWireResult<()> {
    enc.encode_field(&s.listing_id.to_string())?;
    enc.encode_field(&s.label)?;
    enc.encode_field(&s.lat)?;
    enc.encode_field(&s.lng)
}

fn encode_request(enc: &mut DataRowEncoder, r: &ParkingRequest) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.lister_id.to_string())?;
    enc.encode_field(&r.draft.label)?;
    enc.encode_field(&r.draft.coordinate.lat)?;
    enc.encode_field(&r.draft.coordinate.lng)?;
    enc.encode_field(&r.draft.rate)?;
    enc.encode_field(&r.draft.availability)?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.listing_id.map(|id| id.to_string()))
}

#[async_trait]
impl SimpleQueryHandler for ParkspaceHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkspaceQueryParser;

#[async_trait]
impl QueryParser for ParkspaceQueryParser {
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
        Ok(Shape::for_sql(stmt).map_or_else(Vec::new, |s| s.schema(column_format)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkspaceHandler {
    type Statement = String;
    type QueryParser = ParkspaceQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql, Some(&portal.result_column_format))
            .await
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
        let fields = Shape::for_sql(&target.statement).map_or_else(Vec::new, |s| s.schema(None));
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
        let fields = Shape::for_sql(&target.statement.statement)
            .map_or_else(Vec::new, |s| s.schema(Some(&target.result_column_format)));
        Ok(DescribePortalResponse::new(fields))
    }
}

/// `(start, end, index)` of every `$N` placeholder outside quoted literals
/// and quoted identifiers.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote closes and reopens, which is the same scan.
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                let digits = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[digits..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    bind_text_params(&portal.statement.statement, &params)
}

/// One pass over the statement text; bound values are never rescanned.
/// Placeholders without a bound value are left as written.
fn bind_text_params(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                result.push('\'');
                result.push_str(&String::from_utf8_lossy(bytes).replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ParkspaceFactory {
    handler: Arc<ParkspaceHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ParkspaceAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ParkspaceFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ParkspaceAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ParkspaceHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkspaceFactory {
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
    factory: ParkspaceFactory,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let kind = e.kind();
    if kind == ErrorKind::Internal {
        tracing::error!("engine failure: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        kind.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}
