//! One health run: decide, read, evaluate, persist, then notify.
//!
//! Notifications go out only after the alert-state transaction committed. A
//! persistence failure aborts the run before anything is sent.

use crate::config::Config;
use crate::error::PersistenceError;
use crate::models::cloud::CloudInventory;
use crate::models::health::{Alert, HealthVerdict};
use crate::models::inverter::InverterReading;
use crate::models::weather::{Expectation, WeatherSample};
use crate::report::{summary_text, InverterRecord, RunRecord};
use crate::services::alert_state::{self, AlertPolicy, Observation, Transition};
use crate::services::daylight::{self, DaylightInfo, Phase};
use crate::services::expectation::expected_output;
use crate::services::health::{self, EvaluationContext, InverterInput};
use crate::services::notify::{NotificationEvent, NotificationManager};
use crate::services::optimizers::{self, OptimizerCheck};
use crate::services::snapshots::{self, RunStamp};
use crate::solar;
use crate::sources::{CloudSource, InverterReader, WeatherSource};
use chrono::{DateTime, Utc};
use diesel::SqliteConnection;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Collaborators for one run, chosen at startup.
pub struct Sources<'a> {
    pub reader: &'a dyn InverterReader,
    pub cloud: Option<&'a dyn CloudSource>,
    pub weather: Option<&'a dyn WeatherSource>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Treat the run as broad daylight regardless of the clock (simulations).
    pub ignore_daylight: bool,
}

type ReadResult = Result<InverterReading, String>;

/// Read every inverter on its own scoped thread and wait for all of them.
fn read_all(config: &Config, reader: &dyn InverterReader) -> Vec<ReadResult> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = config
            .inverters
            .iter()
            .map(|inv| scope.spawn(move || reader.read(inv).map_err(|e| e.to_string())))
            .collect();
        handles
            .into_iter()
            .zip(&config.inverters)
            .map(|(handle, inv)| {
                let result = handle.join().unwrap_or_else(|_| Err("reader panicked".to_string()));
                match &result {
                    Ok(r) => debug!("[{}] read ok: pac={:?} vdc={:?}", inv.name, r.pac_w, r.vdc_v),
                    Err(e) => warn!("[{}] read failed: {}", inv.name, e),
                }
                result
            })
            .collect()
    })
}

type OptimizerCounts = BTreeMap<String, u32>;

fn fetch_cloud(cloud: Option<&dyn CloudSource>, daylight: &DaylightInfo) -> Option<(CloudInventory, OptimizerCounts)> {
    let cloud = cloud?;
    if daylight.skip_cloud {
        debug!("Cloud fetch skipped outside the cloud window");
        return None;
    }
    let inventory = cloud
        .fetch_inventory()
        .map_err(|e| warn!("Cloud inventory unavailable: {}", e))
        .ok()?;
    let counts = cloud
        .fetch_optimizer_counts(Some(&inventory))
        .map_err(|e| warn!("Optimizer counts unavailable: {}", e))
        .ok()?;
    Some((inventory, counts))
}

fn fetch_weather(weather: Option<&dyn WeatherSource>, config: &Config, now: DateTime<Utc>) -> Option<WeatherSample> {
    match weather?.fetch(&config.site, now) {
        Ok(sample) => Some(sample),
        Err(e) => {
            warn!("Weather unavailable: {}", e);
            None
        }
    }
}

fn effective_daylight(config: &Config, now: DateTime<Utc>, opts: &RunOptions) -> DaylightInfo {
    let mut info = daylight::evaluate(now, &config.site, &config.daylight);
    if opts.ignore_daylight {
        info.phase = Phase::Day;
        info.is_daylight = true;
        info.in_grace_window = false;
        info.skip_modbus = false;
        info.skip_cloud = false;
        info.production_day_over = false;
    }
    info
}

fn run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

fn failing_subjects(conn: &mut SqliteConnection, policy: &AlertPolicy) -> Result<Vec<String>, PersistenceError> {
    Ok(alert_state::active_alarms(conn, policy.threshold)?
        .into_iter()
        .map(|row| row.subject)
        .collect())
}

/// Generate a due daily summary and announce it.
fn close_out_day(
    conn: &mut SqliteConnection,
    daylight: &DaylightInfo,
    notifier: &NotificationManager,
    now: DateTime<Utc>,
) -> Result<Option<crate::db::models::DailySummaryRow>, PersistenceError> {
    let summary = snapshots::generate_if_due(conn, daylight, now)?;
    if let Some(row) = &summary {
        notifier.dispatch(&NotificationEvent::DailySummary {
            date: row.date,
            energy_wh: row.energy_wh,
            text: summary_text(row),
        });
    }
    Ok(summary)
}

pub fn run_once(
    conn: &mut SqliteConnection,
    config: &Config,
    sources: &Sources<'_>,
    notifier: &NotificationManager,
    now: DateTime<Utc>,
    opts: RunOptions,
) -> Result<RunRecord, PersistenceError> {
    let run_id = run_id(now);
    let policy = AlertPolicy::from(&config.alerts);
    let daylight = effective_daylight(config, now, &opts);
    info!(
        "Run {}: phase={:?} local_date={} skip_modbus={} skip_cloud={}",
        run_id, daylight.phase, daylight.local_date, daylight.skip_modbus, daylight.skip_cloud
    );

    if daylight.skip_modbus {
        info!("Outside the production window; no devices polled");
        let failing = failing_subjects(conn, &policy)?;
        notifier.dispatch(&NotificationEvent::RunStatus { failing });
        let summary = close_out_day(conn, &daylight, notifier, now)?;
        return Ok(RunRecord {
            timestamp: now,
            run_id,
            skipped: true,
            daylight,
            sun_elevation_deg: None,
            weather: None,
            inverters: Vec::new(),
            system_ok: None,
            alerts: Vec::new(),
            cloud_inventory: None,
            optimizer_checks: Vec::new(),
            summary,
        });
    }

    let reads = read_all(config, sources.reader);
    let weather = fetch_weather(sources.weather, config, now);
    let cloud = fetch_cloud(sources.cloud, &daylight);

    let sun_elevation_deg = weather
        .as_ref()
        .and_then(|w| w.sun_elevation_deg)
        .or_else(|| {
            config
                .site
                .coordinates()
                .and_then(|(lat, lon)| solar::solar_position(now, lat, lon).ok())
                .map(|pos| pos.elevation_deg)
        });

    let expectations: Vec<Expectation> = config
        .inverters
        .iter()
        .map(|inv| expected_output(weather.as_ref(), &inv.params))
        .collect();

    let inputs: Vec<InverterInput<'_>> = config
        .inverters
        .iter()
        .zip(&reads)
        .zip(&expectations)
        .map(|((inverter, reading), expectation)| InverterInput {
            inverter,
            reading: reading.as_ref().map_err(|e| e.clone()),
            expectation,
        })
        .collect();
    let ctx = EvaluationContext {
        health: &config.health,
        sun_elevation_deg,
        weather: weather.as_ref(),
        in_grace_window: daylight.in_grace_window,
    };
    let system = health::evaluate(&inputs, &ctx);

    let readings_by_name: BTreeMap<String, InverterReading> = reads
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|r| (r.name.clone(), r.clone()))
        .collect();
    let optimizer_checks: Vec<OptimizerCheck> = match &cloud {
        Some((inv, counts)) => optimizers::check(&config.inverters, &readings_by_name, inv, counts),
        None => Vec::new(),
    };

    let mut observations: Vec<Observation> = system
        .verdicts
        .iter()
        .map(|v| Observation {
            subject: v.inverter.clone(),
            healthy: v.inverter_ok,
            reason: v.reason.as_str().to_string(),
        })
        .collect();
    observations.extend(optimizer_checks.iter().map(|c| Observation {
        subject: c.subject(),
        healthy: c.ok,
        reason: c.reason().to_string(),
    }));

    let stamp = RunStamp {
        run_id: run_id.clone(),
        run_at: now,
        local_date: daylight.local_date,
    };

    // counters and snapshots commit together or not at all
    let transitions: BTreeMap<String, Transition> = conn.immediate_transaction(|conn| {
        let transitions = alert_state::update_all(conn, &observations, now, &policy)?;
        let by_subject: BTreeMap<String, Transition> =
            transitions.into_iter().map(|t| (t.subject.clone(), t)).collect();
        let rows = system
            .verdicts
            .iter()
            .zip(&expectations)
            .map(|(verdict, expectation)| {
                snapshots::snapshot_row(&stamp, verdict, expectation, by_subject.get(&verdict.inverter))
            })
            .collect::<Result<Vec<_>, _>>()?;
        snapshots::insert_snapshots(conn, &rows)?;
        Ok::<_, PersistenceError>(by_subject)
    })?;

    let alerts = collect_alerts(&system.verdicts, &optimizer_checks, &transitions, now);
    for alert in &alerts {
        warn!("[{}] ALERT {}: {}", alert.subject, alert.reason, alert.message);
        notifier.dispatch(&NotificationEvent::Alert(alert.clone()));
    }
    let failing = failing_subjects(conn, &policy)?;
    notifier.dispatch(&NotificationEvent::RunStatus { failing });

    let summary = close_out_day(conn, &daylight, notifier, now)?;

    let inverters = system
        .verdicts
        .iter()
        .zip(&reads)
        .zip(&expectations)
        .map(|((verdict, read), expectation)| {
            let transition = transitions.get(&verdict.inverter);
            let reading = read.as_ref().ok().cloned();
            InverterRecord {
                name: verdict.inverter.clone(),
                residual_w: reading
                    .as_ref()
                    .and_then(|r| r.pac_w)
                    .zip(expectation.expected_ac_w())
                    .map(|(pac, expected)| pac - expected),
                reading,
                read_error: read.as_ref().err().cloned(),
                expectation: *expectation,
                reason: verdict.reason,
                inverter_ok: verdict.inverter_ok,
                detail: verdict.detail.clone(),
                suppressed_by: verdict.suppressed_by,
                consecutive_failures: transition.map(|t| t.consecutive_failures()).unwrap_or(0),
                alert_emitted: transition.is_some_and(|t| t.emit_alert),
            }
        })
        .collect();

    info!(
        "Run {} done: system_ok={} alerts={}",
        run_id,
        system.system_ok,
        alerts.len()
    );

    Ok(RunRecord {
        timestamp: now,
        run_id,
        skipped: false,
        daylight,
        sun_elevation_deg,
        weather,
        inverters,
        system_ok: Some(system.system_ok),
        alerts,
        cloud_inventory: cloud.map(|(inv, _)| inv),
        optimizer_checks,
        summary,
    })
}

fn collect_alerts(
    verdicts: &[HealthVerdict],
    checks: &[OptimizerCheck],
    transitions: &BTreeMap<String, Transition>,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    for verdict in verdicts {
        let Some(t) = transitions.get(&verdict.inverter).filter(|t| t.emit_alert) else {
            continue;
        };
        let reading = verdict.reading.as_ref();
        alerts.push(Alert {
            subject: t.subject.clone(),
            inverter: verdict.inverter.clone(),
            serial: reading.map(|r| r.serial.clone()),
            reason: verdict.reason.as_str().to_string(),
            message: verdict.detail.clone().unwrap_or_else(|| verdict.reason.to_string()),
            consecutive_failures: t.consecutive_failures(),
            pac_w: reading.and_then(|r| r.pac_w),
            at: now,
        });
    }
    for check in checks {
        let Some(t) = transitions.get(&check.subject()).filter(|t| t.emit_alert) else {
            continue;
        };
        alerts.push(Alert {
            subject: t.subject.clone(),
            inverter: check.inverter.clone(),
            serial: check.serial.clone(),
            reason: check.reason().to_string(),
            message: check.message(),
            consecutive_failures: t.consecutive_failures(),
            pac_w: None,
            at: now,
        });
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InverterConfig;
    use crate::db::store::open_in_memory;
    use crate::error::ConnectivityError;
    use crate::models::health::Reason;
    use crate::models::inverter::status;
    use diesel::prelude::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Mutex;

    const CONFIG: &str = r#"
        [site]
        timezone = "Europe/Ljubljana"
        latitude = 46.0569
        longitude = 14.5058
        ac_capacity_kw = 15.0

        [health]
        pac_floor_pct = 1.0

        [alerts]
        consecutive_health_alerts = 3

        [[inverters]]
        name = "A"
        host = "10.0.0.11"
        ac_capacity_kw = 5.0

        [[inverters]]
        name = "B"
        host = "10.0.0.12"
        ac_capacity_kw = 5.0
        expected_optimizers = 12

        [[inverters]]
        name = "C"
        host = "10.0.0.13"
        ac_capacity_kw = 5.0
    "#;

    fn config() -> Config {
        Config::from_toml_str(CONFIG, std::path::Path::new("test.toml"), |_| None).expect("config")
    }

    /// Readings keyed by name; a missing entry times out.
    struct ScriptedReader(Mutex<BTreeMap<String, f64>>);

    impl ScriptedReader {
        fn set(&self, pacs: &[(&str, f64)]) {
            let mut map = self.0.lock().unwrap();
            map.clear();
            for (name, pac) in pacs {
                map.insert(name.to_string(), *pac);
            }
        }
    }

    impl InverterReader for ScriptedReader {
        fn read(&self, inverter: &InverterConfig) -> Result<InverterReading, ConnectivityError> {
            let pac = self
                .0
                .lock()
                .unwrap()
                .get(&inverter.name)
                .copied()
                .ok_or(ConnectivityError::Timeout { source_name: "modbus" })?;
            Ok(InverterReading {
                name: inverter.name.clone(),
                serial: format!("7E00000{}", inverter.name),
                model: None,
                timestamp: Utc.with_ymd_and_hms(2025, 6, 21, 10, 0, 0).unwrap(),
                pac_w: Some(pac),
                vdc_v: Some(380.0),
                idc_a: Some(pac / 380.0),
                total_wh: Some(1_000_000.0),
                status: Some(status::PRODUCING),
                vendor_status: Some(0),
            })
        }
    }

    struct FixedCloud(u32);

    impl CloudSource for FixedCloud {
        fn fetch_inventory(&self) -> Result<CloudInventory, ConnectivityError> {
            Ok(CloudInventory {
                inverters: vec![crate::models::cloud::CloudInverter {
                    serial: "7E00000B-1F".to_string(),
                    name: Some("B".to_string()),
                    model: None,
                    status: None,
                    connected_optimizers: Some(self.0),
                }],
            })
        }
    }

    struct Recorder(Rc<RefCell<Vec<NotificationEvent>>>);

    impl crate::services::notify::Notify for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn notify(&self, event: &NotificationEvent) -> Result<bool, ConnectivityError> {
            self.0.borrow_mut().push(event.clone());
            Ok(true)
        }
    }

    /// Local noon on the solstice in Ljubljana, well inside the production window.
    fn run_at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 21, 10, minute, 0).unwrap()
    }

    #[test]
    fn debounced_low_pac_alert_end_to_end() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        let sources = Sources {
            reader: &reader,
            cloud: None,
            weather: None,
        };
        let events = Rc::new(RefCell::new(Vec::new()));
        let notifier = NotificationManager::new(vec![Box::new(Recorder(events.clone()))]);

        let mut counters = Vec::new();
        let mut alert_runs = Vec::new();
        for run in 0..3 {
            reader.set(&[("A", 2_000.0), ("B", 0.0), ("C", 1_900.0)]);
            let record = run_once(&mut conn, &config, &sources, &notifier, run_at(run * 5), RunOptions::default())
                .expect("run");
            let b = record.inverters.iter().find(|i| i.name == "B").unwrap();
            assert_eq!(b.reason, Reason::LowPac);
            counters.push(b.consecutive_failures);
            if !record.alerts.is_empty() {
                alert_runs.push(run);
                assert_eq!(record.alerts.len(), 1);
                assert_eq!(record.alerts[0].subject, "B");
                assert_eq!(record.alerts[0].reason, "low_pac");
            }
        }
        assert_eq!(counters, vec![1, 2, 3]);
        assert_eq!(alert_runs, vec![2]);

        reader.set(&[("A", 2_000.0), ("B", 1_200.0), ("C", 1_900.0)]);
        let record = run_once(&mut conn, &config, &sources, &notifier, run_at(15), RunOptions::default()).expect("run");
        let b = record.inverters.iter().find(|i| i.name == "B").unwrap();
        assert_eq!(b.reason, Reason::Ok);
        assert_eq!(b.consecutive_failures, 0);
        assert!(record.alerts.is_empty());
        assert_eq!(record.system_ok, Some(true));

        let events = events.borrow();
        let alerts = events.iter().filter(|e| matches!(e, NotificationEvent::Alert(_))).count();
        assert_eq!(alerts, 1);
        let statuses: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::RunStatus { failing } => Some(failing.is_empty()),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![true, true, false, true]);

        use crate::schema::snapshots::dsl as S;
        let rows: i64 = S::snapshots.count().get_result(&mut conn).expect("count");
        assert_eq!(rows, 12);
    }

    fn failing_store_run(table: &str) -> (SqliteConnection, Result<RunRecord, PersistenceError>, Vec<NotificationEvent>) {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        diesel::sql_query(format!("DROP TABLE {table}")).execute(&mut conn).expect("drop");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        reader.set(&[("A", 2_000.0), ("B", 0.0), ("C", 1_900.0)]);
        let sources = Sources {
            reader: &reader,
            cloud: None,
            weather: None,
        };
        let events = Rc::new(RefCell::new(Vec::new()));
        let notifier = NotificationManager::new(vec![Box::new(Recorder(events.clone()))]);
        let result = run_once(&mut conn, &config, &sources, &notifier, run_at(0), RunOptions::default());
        let events = events.borrow().clone();
        (conn, result, events)
    }

    #[test]
    fn counter_write_failure_aborts_before_notifying() {
        let (mut conn, result, events) = failing_store_run("alert_state");
        assert!(matches!(result, Err(PersistenceError::Query(_))), "{result:?}");
        assert!(events.is_empty(), "{events:?}");

        use crate::schema::snapshots::dsl as S;
        let rows: i64 = S::snapshots.count().get_result(&mut conn).expect("count");
        assert_eq!(rows, 0);
    }

    #[test]
    fn snapshot_write_failure_rolls_back_counters() {
        let (mut conn, result, events) = failing_store_run("snapshots");
        assert!(matches!(result, Err(PersistenceError::Query(_))), "{result:?}");
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, NotificationEvent::Alert(_) | NotificationEvent::RunStatus { .. })),
            "{events:?}"
        );

        use crate::schema::alert_state::dsl as A;
        let rows: i64 = A::alert_state.count().get_result(&mut conn).expect("count");
        assert_eq!(rows, 0);
    }

    #[test]
    fn unreadable_inverter_is_insufficient_data_only_for_itself() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        reader.set(&[("A", 3_200.0), ("C", 3_100.0)]);
        let sources = Sources {
            reader: &reader,
            cloud: None,
            weather: None,
        };
        let record = run_once(
            &mut conn,
            &config,
            &sources,
            &NotificationManager::default(),
            run_at(0),
            RunOptions::default(),
        )
        .expect("run");
        let reasons: Vec<Reason> = record.inverters.iter().map(|i| i.reason).collect();
        assert_eq!(reasons, vec![Reason::Ok, Reason::InsufficientData, Reason::Ok]);
        assert!(record.inverters[1].read_error.as_deref().unwrap().contains("timed out"));
        assert!(record.inverters[0].expectation.available().is_none());
    }

    #[test]
    fn optimizer_mismatch_is_debounced_separately() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        reader.set(&[("A", 3_200.0), ("B", 3_000.0), ("C", 3_100.0)]);
        let cloud = FixedCloud(10);
        let sources = Sources {
            reader: &reader,
            cloud: Some(&cloud),
            weather: None,
        };
        let mut last = None;
        for run in 0..3 {
            last = Some(
                run_once(
                    &mut conn,
                    &config,
                    &sources,
                    &NotificationManager::default(),
                    run_at(run * 5),
                    RunOptions::default(),
                )
                .expect("run"),
            );
        }
        let record = last.unwrap();
        assert_eq!(record.system_ok, Some(true));
        assert_eq!(record.optimizer_checks.len(), 1);
        assert_eq!(record.optimizer_checks[0].reported, Some(10));
        assert_eq!(record.alerts.len(), 1);
        assert_eq!(record.alerts[0].subject, "B/optimizers");
        assert_eq!(record.alerts[0].reason, optimizers::MISMATCH);
    }

    /// Inventory without counts; counts come from a separate lookup.
    struct SplitCloud;

    impl CloudSource for SplitCloud {
        fn fetch_inventory(&self) -> Result<CloudInventory, ConnectivityError> {
            FixedCloud(0).fetch_inventory().map(|mut inv| {
                inv.inverters[0].connected_optimizers = None;
                inv
            })
        }

        fn fetch_optimizer_counts(
            &self,
            _inventory: Option<&CloudInventory>,
        ) -> Result<BTreeMap<String, u32>, ConnectivityError> {
            Ok(BTreeMap::from([("7E00000B".to_string(), 12)]))
        }
    }

    #[test]
    fn optimizer_counts_come_from_the_cloud_source() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        reader.set(&[("A", 3_200.0), ("B", 3_000.0), ("C", 3_100.0)]);
        let sources = Sources {
            reader: &reader,
            cloud: Some(&SplitCloud),
            weather: None,
        };
        let record = run_once(
            &mut conn,
            &config,
            &sources,
            &NotificationManager::default(),
            run_at(0),
            RunOptions::default(),
        )
        .expect("run");
        assert_eq!(record.optimizer_checks.len(), 1);
        assert_eq!(record.optimizer_checks[0].reported, Some(12));
        assert!(record.optimizer_checks[0].ok);
        assert!(record.cloud_inventory.is_some());
    }

    #[test]
    fn night_run_polls_nothing_and_records_nothing() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        let sources = Sources {
            reader: &reader,
            cloud: None,
            weather: None,
        };
        // 02:00 local
        let night = Utc.with_ymd_and_hms(2025, 6, 21, 0, 0, 0).unwrap();
        let record = run_once(
            &mut conn,
            &config,
            &sources,
            &NotificationManager::default(),
            night,
            RunOptions::default(),
        )
        .expect("run");
        assert!(record.skipped);
        assert!(record.inverters.is_empty());
        assert_eq!(record.system_ok, None);

        use crate::schema::snapshots::dsl as S;
        let rows: i64 = S::snapshots.count().get_result(&mut conn).expect("count");
        assert_eq!(rows, 0);
    }

    #[test]
    fn summary_is_generated_once_after_production_day() {
        let config = config();
        let mut conn = open_in_memory().expect("open");
        let reader = ScriptedReader(Mutex::new(BTreeMap::new()));
        reader.set(&[("A", 3_200.0), ("B", 3_000.0), ("C", 3_100.0)]);
        let sources = Sources {
            reader: &reader,
            cloud: None,
            weather: None,
        };
        let notifier = NotificationManager::default();
        run_once(&mut conn, &config, &sources, &notifier, run_at(0), RunOptions::default()).expect("day run");

        // 23:30 local, past sunset plus grace
        let late = Utc.with_ymd_and_hms(2025, 6, 21, 21, 30, 0).unwrap();
        let first = run_once(&mut conn, &config, &sources, &notifier, late, RunOptions::default()).expect("late run");
        let summary = first.summary.expect("summary generated");
        assert_eq!(summary.date, chrono::NaiveDate::from_ymd_opt(2025, 6, 21).unwrap());
        assert_eq!(summary.inverter_count, 3);

        let again = Utc.with_ymd_and_hms(2025, 6, 21, 21, 45, 0).unwrap();
        let second = run_once(&mut conn, &config, &sources, &notifier, again, RunOptions::default()).expect("rerun");
        assert!(second.summary.is_none());
    }
}
