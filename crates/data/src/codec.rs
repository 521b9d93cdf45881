//! Column conversions shared by the `SQLite` repositories.

use std::str::FromStr;

use anchor_risk_core::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn store_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(e.to_string())
}

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> EngineResult<Decimal> {
    let raw: String = row.try_get(column).map_err(store_err)?;
    Decimal::from_str(&raw).map_err(|e| store_err(format!("{column}: {e}")))
}

pub(crate) fn parsed<T>(row: &SqliteRow, column: &str) -> EngineResult<T>
where
    T: FromStr<Err = EngineError>,
{
    let raw: String = row.try_get(column).map_err(store_err)?;
    raw.parse()
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> EngineResult<DateTime<Utc>> {
    let millis: i64 = row.try_get(column).map_err(store_err)?;
    from_millis(millis)
}

pub(crate) fn optional_timestamp(row: &SqliteRow, column: &str) -> EngineResult<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.try_get(column).map_err(store_err)?;
    millis.map(from_millis).transpose()
}

pub(crate) fn from_millis(millis: i64) -> EngineResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| store_err(format!("bad timestamp {millis}")))
}

pub(crate) fn date(row: &SqliteRow, column: &str) -> EngineResult<NaiveDate> {
    let raw: String = row.try_get(column).map_err(store_err)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| store_err(format!("{column}: {e}")))
}

pub(crate) fn flag(row: &SqliteRow, column: &str) -> EngineResult<bool> {
    let raw: i64 = row.try_get(column).map_err(store_err)?;
    Ok(raw != 0)
}

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
