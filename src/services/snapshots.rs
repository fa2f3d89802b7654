//! Append-only run history and the once-per-date daily summary built from it.

use crate::db::models::{app_keys, AppStateRow, DailySummaryRow, NewSnapshot, Snapshot};
use crate::error::PersistenceError;
use crate::models::health::HealthVerdict;
use crate::models::weather::Expectation;
use crate::schema;
use crate::services::alert_state::Transition;
use crate::services::daylight::DaylightInfo;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

/// Identity of the run every snapshot row belongs to.
#[derive(Debug, Clone)]
pub struct RunStamp {
    pub run_id: String,
    pub run_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

pub fn snapshot_row(
    run: &RunStamp,
    verdict: &HealthVerdict,
    expectation: &Expectation,
    transition: Option<&Transition>,
) -> Result<NewSnapshot, PersistenceError> {
    let reading = verdict.reading.as_ref();
    let expectation_json =
        serde_json::to_string(expectation).map_err(|e| PersistenceError::Corrupt(format!("expectation: {}", e)))?;

    Ok(NewSnapshot {
        run_id: run.run_id.clone(),
        run_at: run.run_at.naive_utc(),
        local_date: run.local_date,
        inverter: verdict.inverter.clone(),
        serial: reading.map(|r| r.serial.clone()),
        status: reading.and_then(|r| r.status).map(i32::from),
        vendor_status: reading.and_then(|r| r.vendor_status).map(i32::from),
        pac_w: reading.and_then(|r| r.pac_w),
        vdc_v: reading.and_then(|r| r.vdc_v),
        idc_a: reading.and_then(|r| r.idc_a),
        total_wh: reading.and_then(|r| r.total_wh),
        inverter_ok: verdict.inverter_ok,
        reason: verdict.reason.as_str().to_string(),
        detail: verdict.detail.clone(),
        expected_ac_w: expectation.expected_ac_w(),
        expectation: expectation_json,
        consecutive_failures: transition.map(|t| t.state.consecutive_failures).unwrap_or(0),
        alert_emitted: transition.is_some_and(|t| t.emit_alert),
    })
}

pub fn insert_snapshots(conn: &mut SqliteConnection, rows: &[NewSnapshot]) -> Result<usize, PersistenceError> {
    if rows.is_empty() {
        return Ok(0);
    }

    use schema::snapshots::dsl as S;

    let count = diesel::insert_into(S::snapshots).values(rows).execute(conn)?;
    debug!("Inserted {} snapshot row(s)", count);
    Ok(count)
}

pub fn snapshots_for_date(conn: &mut SqliteConnection, date: NaiveDate) -> Result<Vec<Snapshot>, PersistenceError> {
    use schema::snapshots::dsl as S;

    Ok(S::snapshots
        .filter(S::local_date.eq(date))
        .order((S::run_at.asc(), S::id.asc()))
        .select(Snapshot::as_select())
        .load(conn)?)
}

/// The date a summary is owed for: today once production is over, else yesterday.
pub fn summary_due_date(local_date: NaiveDate, production_day_over: bool) -> NaiveDate {
    if production_day_over {
        local_date
    } else {
        local_date.checked_sub_days(Days::new(1)).unwrap_or(local_date)
    }
}

pub fn last_summary_date(conn: &mut SqliteConnection) -> Result<Option<NaiveDate>, PersistenceError> {
    use schema::app_state::dsl as K;

    let raw: Option<String> = K::app_state
        .filter(K::key.eq(app_keys::LAST_SUMMARY_DATE))
        .select(K::value)
        .first(conn)
        .optional()?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|e| PersistenceError::Corrupt(format!("{} = '{}': {}", app_keys::LAST_SUMMARY_DATE, s, e)))
    })
    .transpose()
}

fn set_last_summary_date(conn: &mut SqliteConnection, date: NaiveDate, now: NaiveDateTime) -> Result<(), PersistenceError> {
    use schema::app_state::dsl as K;

    let row = AppStateRow {
        key: app_keys::LAST_SUMMARY_DATE.to_string(),
        value: date.format("%Y-%m-%d").to_string(),
        updated_at: now,
    };
    diesel::insert_into(K::app_state)
        .values(&row)
        .on_conflict(K::key)
        .do_update()
        .set((K::value.eq(&row.value), K::updated_at.eq(row.updated_at)))
        .execute(conn)?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InverterDay {
    pub samples: u32,
    pub max_pac_w: Option<f64>,
    pub energy_wh: Option<f64>,
    pub alerts: u32,
}

/// Aggregate one date's snapshots. `None` when there is nothing to summarize.
pub fn summarize(date: NaiveDate, rows: &[Snapshot], now: DateTime<Utc>) -> Result<Option<DailySummaryRow>, PersistenceError> {
    if rows.is_empty() {
        return Ok(None);
    }

    let pacs: Vec<f64> = rows.iter().filter_map(|r| r.pac_w).collect();
    let mut per_inverter: BTreeMap<String, InverterDay> = BTreeMap::new();
    let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

    for row in rows {
        let day = per_inverter.entry(row.inverter.clone()).or_default();
        if let Some(pac) = row.pac_w {
            day.samples += 1;
            day.max_pac_w = Some(day.max_pac_w.map_or(pac, |m| m.max(pac)));
        }
        if row.alert_emitted {
            day.alerts += 1;
        }
        // rows are ordered by run_at, so the first total seen is the first of the day
        if let Some(total) = row.total_wh {
            totals
                .entry(row.inverter.as_str())
                .and_modify(|(_, last)| *last = total)
                .or_insert((total, total));
        }
    }

    let mut energy_wh = None;
    for (name, (first, last)) in &totals {
        let delta = (last - first).max(0.0);
        if let Some(day) = per_inverter.get_mut(*name) {
            day.energy_wh = Some(delta);
        }
        energy_wh = Some(energy_wh.unwrap_or(0.0) + delta);
    }

    let per_inverter_json =
        serde_json::to_string(&per_inverter).map_err(|e| PersistenceError::Corrupt(format!("per_inverter: {}", e)))?;

    Ok(Some(DailySummaryRow {
        date,
        recorded_at: now.naive_utc(),
        sample_count: pacs.len() as i32,
        inverter_count: per_inverter.len() as i32,
        min_pac_w: pacs.iter().copied().reduce(f64::min),
        max_pac_w: pacs.iter().copied().reduce(f64::max),
        avg_pac_w: if pacs.is_empty() {
            None
        } else {
            Some(pacs.iter().sum::<f64>() / pacs.len() as f64)
        },
        energy_wh,
        alert_count: rows.iter().filter(|r| r.alert_emitted).count() as i32,
        per_inverter: per_inverter_json,
    }))
}

/// Summarize `date` unless the marker already covers it. The summary row and the
/// marker commit together; a date without snapshots only advances the marker.
pub fn generate_for(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<DailySummaryRow>, PersistenceError> {
    conn.immediate_transaction(|conn| {
        if let Some(last) = last_summary_date(conn)?
            && date <= last
        {
            debug!("Summary for {} already covered (last {})", date, last);
            return Ok(None);
        }

        let rows = snapshots_for_date(conn, date)?;
        let summary = summarize(date, &rows, now)?;
        if let Some(row) = &summary {
            use schema::daily_summary::dsl as D;

            diesel::insert_into(D::daily_summary)
                .values(row)
                .on_conflict(D::date)
                .do_nothing()
                .execute(conn)?;
            info!(
                "Daily summary {}: {} sample(s) from {} inverter(s), energy {} Wh, {} alert(s)",
                date,
                row.sample_count,
                row.inverter_count,
                row.energy_wh.map_or("-".to_string(), |e| format!("{:.0}", e)),
                row.alert_count
            );
        } else {
            debug!("No snapshots for {}; advancing summary marker only", date);
        }
        set_last_summary_date(conn, date, now.naive_utc())?;
        Ok(summary)
    })
}

pub fn generate_if_due(
    conn: &mut SqliteConnection,
    daylight: &DaylightInfo,
    now: DateTime<Utc>,
) -> Result<Option<DailySummaryRow>, PersistenceError> {
    let date = summary_due_date(daylight.local_date, daylight.production_day_over);
    generate_for(conn, date, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::open_in_memory;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn row(inverter: &str, hour: u32, pac: Option<f64>, total: Option<f64>, alert: bool) -> NewSnapshot {
        NewSnapshot {
            run_id: format!("run-{hour}"),
            run_at: Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap().naive_utc(),
            local_date: day(),
            inverter: inverter.to_string(),
            serial: Some(format!("SN-{inverter}")),
            status: Some(4),
            vendor_status: None,
            pac_w: pac,
            vdc_v: Some(380.0),
            idc_a: None,
            total_wh: total,
            inverter_ok: !alert,
            reason: if alert { "low_pac" } else { "ok" }.to_string(),
            detail: None,
            expected_ac_w: None,
            expectation: r#"{"status":"unavailable","cause":"no_weather_sample"}"#.to_string(),
            consecutive_failures: 0,
            alert_emitted: alert,
        }
    }

    fn evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 21, 0, 0).unwrap()
    }

    #[test]
    fn due_date_follows_production_day() {
        assert_eq!(summary_due_date(day(), true), day());
        assert_eq!(summary_due_date(day(), false), NaiveDate::from_ymd_opt(2025, 5, 31).unwrap());
    }

    #[test]
    fn aggregates_pac_and_energy() {
        let mut conn = open_in_memory().expect("open");
        insert_snapshots(
            &mut conn,
            &[
                row("A", 8, Some(500.0), Some(10_000.0), false),
                row("B", 8, None, None, false),
                row("A", 12, Some(3_500.0), Some(12_000.0), false),
                row("B", 12, Some(0.0), Some(7_000.0), true),
                row("A", 16, Some(1_000.0), Some(15_000.0), false),
                // a counter reset must not produce negative energy
                row("B", 16, Some(200.0), Some(6_500.0), false),
            ],
        )
        .expect("insert");

        let summary = generate_for(&mut conn, day(), evening()).expect("generate").expect("summary");
        assert_eq!(summary.sample_count, 5);
        assert_eq!(summary.inverter_count, 2);
        assert_eq!(summary.min_pac_w, Some(0.0));
        assert_eq!(summary.max_pac_w, Some(3_500.0));
        assert_eq!(summary.avg_pac_w, Some(1_040.0));
        assert_eq!(summary.energy_wh, Some(5_000.0));
        assert_eq!(summary.alert_count, 1);

        let per: serde_json::Value = serde_json::from_str(&summary.per_inverter).unwrap();
        assert_eq!(per["A"]["energy_wh"], 5_000.0);
        assert_eq!(per["B"]["energy_wh"], 0.0);
        assert_eq!(per["B"]["alerts"], 1);
    }

    #[test]
    fn each_date_is_summarized_once() {
        let mut conn = open_in_memory().expect("open");
        insert_snapshots(&mut conn, &[row("A", 12, Some(2_000.0), Some(1_000.0), false)]).expect("insert");

        assert!(generate_for(&mut conn, day(), evening()).expect("first").is_some());
        assert!(generate_for(&mut conn, day(), evening()).expect("second").is_none());

        // an older date is covered by the marker as well
        let earlier = NaiveDate::from_ymd_opt(2025, 5, 30).unwrap();
        assert!(generate_for(&mut conn, earlier, evening()).expect("earlier").is_none());

        use crate::schema::daily_summary::dsl as D;
        let count: i64 = D::daily_summary.count().get_result(&mut conn).expect("count");
        assert_eq!(count, 1);
        assert_eq!(last_summary_date(&mut conn).expect("marker"), Some(day()));
    }

    #[test]
    fn empty_date_advances_marker_without_a_row() {
        let mut conn = open_in_memory().expect("open");
        assert!(generate_for(&mut conn, day(), evening()).expect("generate").is_none());
        assert_eq!(last_summary_date(&mut conn).expect("marker"), Some(day()));
    }

    #[test]
    fn corrupt_marker_is_reported() {
        let mut conn = open_in_memory().expect("open");
        set_last_summary_date(&mut conn, day(), evening().naive_utc()).expect("set");
        {
            use crate::schema::app_state::dsl as K;
            diesel::update(K::app_state.filter(K::key.eq(app_keys::LAST_SUMMARY_DATE)))
                .set(K::value.eq("yesterday"))
                .execute(&mut conn)
                .expect("update");
        }
        assert!(matches!(last_summary_date(&mut conn), Err(PersistenceError::Corrupt(_))));
    }
}
