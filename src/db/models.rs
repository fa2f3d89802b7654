//! Diesel row structs for the state store.
//!
//! SQLite has no timezone-aware timestamp type; every `NaiveDateTime` here is UTC.

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

pub mod app_keys {
    /// Local date (YYYY-MM-DD) of the most recent daily summary.
    pub const LAST_SUMMARY_DATE: &str = "last_summary_date";
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Snapshot {
    pub id: i32,
    pub run_id: String,
    pub run_at: NaiveDateTime,
    pub local_date: NaiveDate,
    pub inverter: String,
    pub serial: Option<String>,
    pub status: Option<i32>,
    pub vendor_status: Option<i32>,
    pub pac_w: Option<f64>,
    pub vdc_v: Option<f64>,
    pub idc_a: Option<f64>,
    pub total_wh: Option<f64>,
    pub inverter_ok: bool,
    pub reason: String,
    pub detail: Option<String>,
    pub expected_ac_w: Option<f64>,
    pub expectation: String,
    pub consecutive_failures: i32,
    pub alert_emitted: bool,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::snapshots)]
pub struct NewSnapshot {
    pub run_id: String,
    pub run_at: NaiveDateTime,
    pub local_date: NaiveDate,
    pub inverter: String,
    pub serial: Option<String>,
    pub status: Option<i32>,
    pub vendor_status: Option<i32>,
    pub pac_w: Option<f64>,
    pub vdc_v: Option<f64>,
    pub idc_a: Option<f64>,
    pub total_wh: Option<f64>,
    pub inverter_ok: bool,
    pub reason: String,
    pub detail: Option<String>,
    pub expected_ac_w: Option<f64>,
    /// JSON of the expectation, including the "unavailable" marker.
    pub expectation: String,
    pub consecutive_failures: i32,
    pub alert_emitted: bool,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::alert_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AlertStateRow {
    pub subject: String,
    pub consecutive_failures: i32,
    pub last_alert_at: Option<NaiveDateTime>,
    pub last_reason: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::daily_summary)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailySummaryRow {
    pub date: NaiveDate,
    pub recorded_at: NaiveDateTime,
    pub sample_count: i32,
    pub inverter_count: i32,
    pub min_pac_w: Option<f64>,
    pub max_pac_w: Option<f64>,
    pub avg_pac_w: Option<f64>,
    pub energy_wh: Option<f64>,
    pub alert_count: i32,
    /// JSON object keyed by inverter name.
    pub per_inverter: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::app_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppStateRow {
    pub key: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}
