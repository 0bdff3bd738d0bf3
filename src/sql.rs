use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_SUGGESTION_LIMIT;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        listing_id: Ulid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        vehicle_info: Option<String>,
        notes: Option<String>,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    UpdatePaymentStatus {
        id: Ulid,
        payment_status: PaymentStatus,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        listing_id: Ulid,
        booking_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    SelectBookedSlots {
        listing_id: Ulid,
        booking_date: NaiveDate,
    },
    SelectNearbyListings {
        center: Coordinate,
        radius_km: f64,
        include_inactive: bool,
    },
    SelectLocationSuggestions {
        prefix: String,
        limit: usize,
    },
    InsertListing {
        lister_id: Option<Ulid>,
        draft: ListingDraft,
    },
    UpdateListing {
        id: Ulid,
        patch: ListingPatch,
    },
    SelectListings {
        id: Option<Ulid>,
    },
    InsertParkingRequest {
        draft: ListingDraft,
    },
    ReviewParkingRequest {
        id: Ulid,
        status: RequestStatus,
    },
    SelectParkingRequests {
        status: Option<RequestStatus>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a statement reads or writes, without validating the rest of it.
/// Works on unbound statements, so `$n` placeholders are fine.
pub fn target_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => insert_table_name(insert).ok(),
        Statement::Update { table, .. } => table_factor_name(&table.relation).ok(),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        _ => None,
    }
}

/// `column = value` pairs from an INSERT column list, a SET list, or a
/// WHERE conjunction, each checked against the columns a table accepts.
struct Columns {
    table: &'static str,
    pairs: Vec<(String, Expr)>,
}

impl Columns {
    fn new(
        table: &'static str,
        allowed: &[&str],
        pairs: Vec<(String, Expr)>,
    ) -> Result<Self, SqlError> {
        for (i, (column, _)) in pairs.iter().enumerate() {
            if !allowed.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn {
                    table,
                    column: column.clone(),
                });
            }
            if pairs[..i].iter().any(|(c, _)| c == column) {
                return Err(SqlError::Parse(format!("column {column} given twice")));
            }
        }
        Ok(Self { table, pairs })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.pairs.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn {
            table: self.table,
            column,
        })
    }

    fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

const RESERVATION_INSERT_COLUMNS: &[&str] = &[
    "listing_id",
    "booking_date",
    "start_time",
    "end_time",
    "vehicle_info",
    "notes",
];
const LISTING_INSERT_COLUMNS: &[&str] =
    &["label", "lat", "lng", "rate", "availability", "lister_id"];
const REQUEST_INSERT_COLUMNS: &[&str] = &["label", "lat", "lng", "rate", "availability"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let pairs = insert_pairs(insert)?;

    match table.as_str() {
        "reservations" => {
            let cols = Columns::new("reservations", RESERVATION_INSERT_COLUMNS, pairs)?;
            Ok(Command::InsertReservation {
                listing_id: parse_ulid("listing_id", cols.required("listing_id")?)?,
                booking_date: parse_date("booking_date", cols.required("booking_date")?)?,
                start_time: parse_time("start_time", cols.required("start_time")?)?,
                end_time: parse_time("end_time", cols.required("end_time")?)?,
                vehicle_info: optional(&cols, "vehicle_info", parse_text_or_null)?.flatten(),
                notes: optional(&cols, "notes", parse_text_or_null)?.flatten(),
            })
        }
        "listings" => {
            let cols = Columns::new("listings", LISTING_INSERT_COLUMNS, pairs)?;
            Ok(Command::InsertListing {
                lister_id: optional(&cols, "lister_id", parse_ulid_or_null)?.flatten(),
                draft: parse_draft(&cols)?,
            })
        }
        "parking_requests" => {
            let cols = Columns::new("parking_requests", REQUEST_INSERT_COLUMNS, pairs)?;
            Ok(Command::InsertParkingRequest {
                draft: parse_draft(&cols)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_draft(cols: &Columns) -> Result<ListingDraft, SqlError> {
    Ok(ListingDraft {
        label: parse_text("label", cols.required("label")?)?,
        coordinate: Coordinate::new(
            parse_f64("lat", cols.required("lat")?)?,
            parse_f64("lng", cols.required("lng")?)?,
        ),
        rate: parse_text("rate", cols.required("rate")?)?,
        availability: optional(cols, "availability", parse_text)?.unwrap_or_default(),
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, assignment.value.clone()));
    }
    let id = where_id(selection)?;

    match table.as_str() {
        "reservations" => {
            let cols = Columns::new("reservations", &["status", "payment_status"], set)?;
            match (cols.get("status"), cols.get("payment_status")) {
                (Some(status), None) => Ok(Command::UpdateReservationStatus {
                    id,
                    status: parse_enum("status", status)?,
                }),
                (None, Some(payment)) => Ok(Command::UpdatePaymentStatus {
                    id,
                    payment_status: parse_enum("payment_status", payment)?,
                }),
                (Some(_), Some(_)) => Err(SqlError::Unsupported(
                    "update status and payment_status in separate statements".into(),
                )),
                (None, None) => Err(SqlError::MissingColumn {
                    table: "reservations",
                    column: "status",
                }),
            }
        }
        "listings" => {
            let cols = Columns::new(
                "listings",
                &["label", "rate", "availability", "is_active"],
                set,
            )?;
            Ok(Command::UpdateListing {
                id,
                patch: ListingPatch {
                    label: optional(&cols, "label", parse_text)?,
                    rate: optional(&cols, "rate", parse_text)?,
                    availability: optional(&cols, "availability", parse_text)?,
                    is_active: optional(&cols, "is_active", parse_bool)?,
                },
            })
        }
        "parking_requests" => {
            let cols = Columns::new("parking_requests", &["status"], set)?;
            Ok(Command::ReviewParkingRequest {
                id,
                status: parse_enum("status", cols.required("status")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let [from] = select.from.as_slice() else {
        return Err(SqlError::Parse("SELECT needs exactly one table".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut pairs = Vec::new();
    if let Some(selection) = &select.selection {
        collect_equalities(selection, &mut pairs)?;
    }

    match table.as_str() {
        "reservations" => {
            let cols = Columns::new(
                "reservations",
                &["id", "listing_id", "booking_date", "status"],
                pairs,
            )?;
            Ok(Command::SelectReservations {
                filter: ReservationFilter {
                    id: optional(&cols, "id", |c, e| parse_ulid(c, e))?,
                    listing_id: optional(&cols, "listing_id", |c, e| parse_ulid(c, e))?,
                    booking_date: optional(&cols, "booking_date", |c, e| parse_date(c, e))?,
                    status: optional(&cols, "status", |c, e| parse_enum(c, e))?,
                },
            })
        }
        "availability" => {
            let cols = Columns::new(
                "availability",
                &["listing_id", "booking_date", "start_time", "end_time"],
                pairs,
            )?;
            Ok(Command::SelectAvailability {
                listing_id: parse_ulid("listing_id", filter(&cols, "listing_id")?)?,
                booking_date: parse_date("booking_date", filter(&cols, "booking_date")?)?,
                start_time: parse_time("start_time", filter(&cols, "start_time")?)?,
                end_time: parse_time("end_time", filter(&cols, "end_time")?)?,
            })
        }
        "booked_slots" => {
            let cols = Columns::new("booked_slots", &["listing_id", "booking_date"], pairs)?;
            Ok(Command::SelectBookedSlots {
                listing_id: parse_ulid("listing_id", filter(&cols, "listing_id")?)?,
                booking_date: parse_date("booking_date", filter(&cols, "booking_date")?)?,
            })
        }
        "nearby_listings" => {
            let cols = Columns::new(
                "nearby_listings",
                &["lat", "lng", "radius_km", "include_inactive"],
                pairs,
            )?;
            Ok(Command::SelectNearbyListings {
                center: Coordinate::new(
                    parse_f64("lat", filter(&cols, "lat")?)?,
                    parse_f64("lng", filter(&cols, "lng")?)?,
                ),
                radius_km: parse_f64("radius_km", filter(&cols, "radius_km")?)?,
                include_inactive: optional(&cols, "include_inactive", parse_bool)?.unwrap_or(false),
            })
        }
        "location_suggestions" => {
            let cols = Columns::new("location_suggestions", &["prefix", "limit"], pairs)?;
            Ok(Command::SelectLocationSuggestions {
                prefix: parse_text("prefix", filter(&cols, "prefix")?)?,
                limit: optional(&cols, "limit", parse_usize)?.unwrap_or(DEFAULT_SUGGESTION_LIMIT),
            })
        }
        "listings" => {
            let cols = Columns::new("listings", &["id"], pairs)?;
            Ok(Command::SelectListings {
                id: optional(&cols, "id", |c, e| parse_ulid(c, e))?,
            })
        }
        "parking_requests" => {
            let cols = Columns::new("parking_requests", &["status"], pairs)?;
            Ok(Command::SelectParkingRequests {
                status: optional(&cols, "status", |c, e| parse_enum(c, e))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND (b = 2 AND c = 3)` into column/value pairs.
fn collect_equalities(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!(
            "filter {other}: only AND-ed column = value comparisons"
        ))),
    }
}

fn where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut pairs = Vec::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut pairs)?;
    }
    match pairs.as_slice() {
        [(column, value)] if column == "id" => parse_ulid("id", value),
        [] => Err(SqlError::MissingFilter("id")),
        _ => Err(SqlError::Unsupported("UPDATE must filter on id alone".into())),
    }
}

fn filter<'a>(cols: &'a Columns, column: &'static str) -> Result<&'a Expr, SqlError> {
    cols.get(column).ok_or(SqlError::MissingFilter(column))
}

fn optional<T>(
    cols: &Columns,
    column: &'static str,
    parse: impl Fn(&str, &Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    cols.get(column).map(|e| parse(column, e)).transpose()
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// Pair the explicit column list with the single VALUES row.
fn insert_pairs(insert: &ast::Insert) -> Result<Vec<(String, Expr)>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let body = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    let row = match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => row,
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    if row.len() != insert.columns.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            insert.columns.len(),
            row.len()
        )));
    }
    Ok(insert
        .columns
        .iter()
        .map(|ident| ident.value.to_lowercase())
        .zip(row.iter().cloned())
        .collect())
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

fn invalid(column: &str, reason: impl Into<String>) -> SqlError {
    SqlError::InvalidValue {
        column: column.to_string(),
        reason: reason.into(),
    }
}

/// Quoted strings and bare numbers both read as text, so bound `$n`
/// parameters (always substituted quoted) parse the same as literals.
fn literal_text<'a>(column: &str, expr: &'a Expr) -> Result<&'a str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(other) => Err(invalid(column, format!("expected a string, got {other}"))),
        None => Err(invalid(column, format!("expected a literal, got {expr}"))),
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(column: &str, expr: &Expr) -> Result<String, SqlError> {
    literal_text(column, expr).map(str::to_string)
}

fn parse_text_or_null(column: &str, expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(column, expr).map(Some)
}

fn parse_ulid(column: &str, expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(column, expr)?;
    Ulid::from_string(s.trim()).map_err(|e| invalid(column, format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(column: &str, expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(column, expr).map(Some)
}

fn parse_date(column: &str, expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(column, expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| invalid(column, format!("expected YYYY-MM-DD: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(column: &str, expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = literal_text(column, expr)?.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| invalid(column, format!("expected HH:MM: {e}")))
}

fn parse_f64(column: &str, expr: &Expr) -> Result<f64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_f64(column, expr)?);
    }
    let s = literal_text(column, expr)?;
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|e| invalid(column, format!("bad number: {e}")))?;
    if !v.is_finite() {
        return Err(invalid(column, "must be finite"));
    }
    Ok(v)
}

fn parse_usize(column: &str, expr: &Expr) -> Result<usize, SqlError> {
    literal_text(column, expr)?
        .trim()
        .parse()
        .map_err(|e| invalid(column, format!("bad count: {e}")))
}

fn parse_bool(column: &str, expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(invalid(column, format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(invalid(column, format!("expected bool, got {expr}"))),
    }
}

fn parse_enum<T>(column: &str, expr: &Expr) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    literal_text(column, expr)?
        .parse()
        .map_err(|e: UnknownVariant| invalid(column, e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} for {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("missing column {column} for {table}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid {column}: {reason}")]
    InvalidValue { column: String, reason: String },
}

impl SqlError {
    /// Statement shape problems are syntax errors; well-formed statements
    /// with bad values are invalid input.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::Parse(_)
            | SqlError::Empty
            | SqlError::Unsupported(_)
            | SqlError::UnknownTable(_)
            | SqlError::UnknownColumn { .. } => "42601",
            SqlError::MissingColumn { .. }
            | SqlError::MissingFilter(_)
            | SqlError::InvalidValue { .. } => "22023",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (listing_id, booking_date, start_time, end_time) \
             VALUES ('{ID}', '2025-05-01', '09:00', '11:00:00')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                listing_id: id(),
                booking_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
                start_time: t(9, 0),
                end_time: t(11, 0),
                vehicle_info: None,
                notes: None,
            }
        );
    }

    #[test]
    fn parse_insert_reservation_with_extras_in_any_order() {
        let sql = format!(
            "INSERT INTO reservations (notes, end_time, listing_id, start_time, booking_date, vehicle_info) \
             VALUES ('gate code 42', '10:00', '{ID}', '09:30', '2025-05-01', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation {
                start_time,
                end_time,
                vehicle_info,
                notes,
                ..
            } => {
                assert_eq!((start_time, end_time), (t(9, 30), t(10, 0)));
                assert_eq!(vehicle_info, None);
                assert_eq!(notes.as_deref(), Some("gate code 42"));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_reservation_missing_column() {
        let sql = format!(
            "INSERT INTO reservations (listing_id, booking_date, start_time) VALUES ('{ID}', '2025-05-01', '09:00')"
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn { column: "end_time", .. }));
        assert_eq!(err.sqlstate(), "22023");
    }

    #[test]
    fn insert_bad_date_is_invalid_value() {
        let sql = format!(
            "INSERT INTO reservations (listing_id, booking_date, start_time, end_time) \
             VALUES ('{ID}', '2025-02-30', '09:00', '10:00')"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidValue { ref column, .. }) if column == "booking_date"
        ));
    }

    #[test]
    fn insert_without_column_list_rejected() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{ID}', '2025-05-01', '09:00', '10:00')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_status() {
        let sql = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservationStatus {
                id: id(),
                status: ReservationStatus::Cancelled
            }
        );
    }

    #[test]
    fn parse_update_payment() {
        let sql = format!("UPDATE reservations SET payment_status = 'paid' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdatePaymentStatus {
                id: id(),
                payment_status: PaymentStatus::Paid
            }
        );
    }

    #[test]
    fn update_unknown_status_is_invalid() {
        let sql = format!("UPDATE reservations SET status = 'archived' WHERE id = '{ID}'");
        let err = parse_sql(&sql).unwrap_err();
        assert_eq!(err.to_string(), "invalid status: unknown reservation status: \"archived\"");
    }

    #[test]
    fn update_needs_id_filter() {
        let sql = "UPDATE reservations SET status = 'confirmed'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        let sql = format!(
            "UPDATE reservations SET status = 'confirmed' WHERE id = '{ID}' AND status = 'pending'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn update_both_statuses_rejected() {
        let sql = format!(
            "UPDATE reservations SET status = 'cancelled', payment_status = 'refunded' WHERE id = '{ID}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_reservations_filters() {
        let sql = format!(
            "SELECT * FROM reservations WHERE listing_id = '{ID}' AND (booking_date = '2025-05-01' AND status = 'pending')"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectReservations { filter } => {
                assert_eq!(filter.listing_id, Some(id()));
                assert_eq!(filter.booking_date, NaiveDate::from_ymd_opt(2025, 5, 1));
                assert_eq!(filter.status, Some(ReservationStatus::Pending));
                assert_eq!(filter.id, None);
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::default()
            }
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE listing_id = '{ID}' AND booking_date = '2025-05-01' \
             AND start_time = '10:00' AND end_time = '12:00'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                listing_id: id(),
                booking_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
                start_time: t(10, 0),
                end_time: t(12, 0),
            }
        );
    }

    #[test]
    fn availability_requires_every_filter() {
        let sql = format!(
            "SELECT * FROM availability WHERE listing_id = '{ID}' AND booking_date = '2025-05-01'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start_time"))));
    }

    #[test]
    fn range_filters_unsupported() {
        let sql = format!(
            "SELECT * FROM reservations WHERE listing_id = '{ID}' OR status = 'pending'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_nearby() {
        let sql = "SELECT * FROM nearby_listings WHERE lat = 18.5204 AND lng = 73.8567 AND radius_km = 2.5";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectNearbyListings {
                center: Coordinate::new(18.5204, 73.8567),
                radius_km: 2.5,
                include_inactive: false,
            }
        );
        let sql = "SELECT * FROM nearby_listings WHERE lat = -33.86 AND lng = '151.2' AND radius_km = 1 AND include_inactive = true";
        match parse_sql(sql).unwrap() {
            Command::SelectNearbyListings { center, include_inactive, .. } => {
                assert_eq!(center, Coordinate::new(-33.86, 151.2));
                assert!(include_inactive);
            }
            cmd => panic!("expected SelectNearbyListings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_suggestions() {
        let sql = r#"SELECT * FROM location_suggestions WHERE prefix = 'Kor' AND "limit" = 3"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectLocationSuggestions {
                prefix: "Kor".into(),
                limit: 3
            }
        );
        let sql = "SELECT * FROM location_suggestions WHERE prefix = 'Kor'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectLocationSuggestions {
                prefix: "Kor".into(),
                limit: DEFAULT_SUGGESTION_LIMIT
            }
        );
    }

    #[test]
    fn parse_insert_listing() {
        let sql = "INSERT INTO listings (label, lat, lng, rate, availability) \
                   VALUES ('FC Road, Pune', 18.5236, 73.8478, '150/hour', '9am-9pm')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertListing {
                lister_id: None,
                draft: ListingDraft {
                    label: "FC Road, Pune".into(),
                    coordinate: Coordinate::new(18.5236, 73.8478),
                    rate: "150/hour".into(),
                    availability: "9am-9pm".into(),
                },
            }
        );
    }

    #[test]
    fn parse_update_listing() {
        let sql = format!(
            "UPDATE listings SET is_active = false, rate = '90/hour' WHERE id = '{ID}'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateListing {
                id: id(),
                patch: ListingPatch {
                    rate: Some("90/hour".into()),
                    is_active: Some(false),
                    ..Default::default()
                },
            }
        );
        let sql = format!("UPDATE listings SET lister_id = '{ID}' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn { .. })));
    }

    #[test]
    fn parse_parking_requests() {
        let sql = "INSERT INTO parking_requests (label, lat, lng, rate) VALUES ('Baner', 18.56, 73.78, '40/hour')";
        match parse_sql(sql).unwrap() {
            Command::InsertParkingRequest { draft } => {
                assert_eq!(draft.label, "Baner");
                assert_eq!(draft.availability, "");
            }
            cmd => panic!("expected InsertParkingRequest, got {cmd:?}"),
        }

        let sql = format!("UPDATE parking_requests SET status = 'approved' WHERE id = '{ID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ReviewParkingRequest {
                id: id(),
                status: RequestStatus::Approved
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM parking_requests WHERE status = 'pending'").unwrap(),
            Command::SelectParkingRequests {
                status: Some(RequestStatus::Pending)
            }
        );
    }

    #[test]
    fn unknown_table_and_column() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        let sql = "SELECT * FROM listings WHERE lister_id = 'x'";
        let err = parse_sql(sql).unwrap_err();
        assert_eq!(err.to_string(), "unknown column lister_id for listings");
        assert_eq!(err.sqlstate(), "42601");
    }

    #[test]
    fn duplicate_column_rejected() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{ID}' AND id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn target_table_of_unbound_statements() {
        assert_eq!(
            target_table("SELECT * FROM availability WHERE listing_id = $1 AND booking_date = $2").as_deref(),
            Some("availability")
        );
        assert_eq!(
            target_table("UPDATE Reservations SET status = $1 WHERE id = $2").as_deref(),
            Some("reservations")
        );
        assert_eq!(
            target_table("INSERT INTO listings (label) VALUES ($1)").as_deref(),
            Some("listings")
        );
        assert_eq!(target_table("SELEC nonsense"), None);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("DELETE FROM reservations"), Err(SqlError::Unsupported(_))));
    }
}
