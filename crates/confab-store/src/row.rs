//! Column conversion helpers shared by the query modules.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

use confab_shared::types::MessageKind;

/// Current time at the precision timestamps are stored with, so a value
/// handed back to callers equals the one read from the database later.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored with a fixed width so that text comparison in SQL
/// matches chronological order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn id_col<T>(row: &Row<'_>, idx: usize, wrap: fn(Uuid) -> T) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map(wrap).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_id_col<T>(
    row: &Row<'_>,
    idx: usize,
    wrap: fn(Uuid) -> T,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map(wrap).map_err(|e| conversion(idx, e)))
        .transpose()
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion(idx, e))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

pub(crate) fn kind_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<MessageKind> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|reason: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
