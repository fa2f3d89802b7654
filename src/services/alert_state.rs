//! Debounced alert state: one persisted failure counter per alert subject.
//!
//! Subjects are inverter names, plus `<name>/optimizers` for the optimizer-count
//! check. Counters only move through [`update`]; callers run all updates of a run
//! in one transaction together with the run's snapshots.

use crate::config::AlertConfig;
use crate::db::models::AlertStateRow;
use crate::error::PersistenceError;
use crate::schema;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub enabled: bool,
    /// Consecutive unhealthy observations before the alert fires.
    pub threshold: u32,
    pub realert_every: Option<u32>,
}

impl From<&AlertConfig> for AlertPolicy {
    fn from(cfg: &AlertConfig) -> Self {
        AlertPolicy {
            enabled: cfg.enabled,
            threshold: cfg.consecutive_health_alerts,
            realert_every: cfg.realert_every,
        }
    }
}

impl AlertPolicy {
    fn fires_at(&self, counter: u32) -> bool {
        if !self.enabled || counter < self.threshold {
            return false;
        }
        if counter == self.threshold {
            return true;
        }
        match self.realert_every {
            Some(k) if k > 0 => (counter - self.threshold) % k == 0,
            _ => false,
        }
    }
}

/// One health observation for one subject in the current run.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub subject: String,
    pub healthy: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub subject: String,
    pub state: AlertStateRow,
    pub emit_alert: bool,
}

impl Transition {
    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures.max(0) as u32
    }
}

/// Next state for one subject. Healthy resets the counter and leaves the
/// last-alert fields alone; unhealthy increments and may emit.
pub fn advance(
    previous: Option<&AlertStateRow>,
    observation: &Observation,
    now: DateTime<Utc>,
    policy: &AlertPolicy,
) -> (AlertStateRow, bool) {
    let prev_count = previous.map(|p| p.consecutive_failures.max(0) as u32).unwrap_or(0);
    let mut state = AlertStateRow {
        subject: observation.subject.clone(),
        consecutive_failures: 0,
        last_alert_at: previous.and_then(|p| p.last_alert_at),
        last_reason: previous.and_then(|p| p.last_reason.clone()),
        updated_at: now.naive_utc(),
    };

    if observation.healthy {
        return (state, false);
    }

    let counter = prev_count.saturating_add(1);
    state.consecutive_failures = i32::try_from(counter).unwrap_or(i32::MAX);
    let emit = policy.fires_at(counter);
    if emit {
        state.last_alert_at = Some(now.naive_utc());
        state.last_reason = Some(observation.reason.clone());
    }
    (state, emit)
}

pub fn load_all(conn: &mut SqliteConnection) -> Result<BTreeMap<String, AlertStateRow>, PersistenceError> {
    use schema::alert_state::dsl as A;

    let rows: Vec<AlertStateRow> = A::alert_state.select(AlertStateRow::as_select()).load(conn)?;
    Ok(rows.into_iter().map(|r| (r.subject.clone(), r)).collect())
}

/// Apply one observation and persist the result.
pub fn update(
    conn: &mut SqliteConnection,
    observation: &Observation,
    now: DateTime<Utc>,
    policy: &AlertPolicy,
) -> Result<Transition, PersistenceError> {
    use schema::alert_state::dsl as A;

    let previous: Option<AlertStateRow> = A::alert_state
        .filter(A::subject.eq(&observation.subject))
        .select(AlertStateRow::as_select())
        .first(conn)
        .optional()?;
    let (state, emit_alert) = advance(previous.as_ref(), observation, now, policy);

    diesel::insert_into(A::alert_state)
        .values(&state)
        .on_conflict(A::subject)
        .do_update()
        .set((
            A::consecutive_failures.eq(state.consecutive_failures),
            A::last_alert_at.eq(state.last_alert_at),
            A::last_reason.eq(&state.last_reason),
            A::updated_at.eq(state.updated_at),
        ))
        .execute(conn)?;

    if emit_alert {
        info!(
            "[{}] alert: {} after {} consecutive unhealthy read(s)",
            state.subject, observation.reason, state.consecutive_failures
        );
    } else {
        debug!(
            "[{}] healthy={} consecutive_failures={}",
            state.subject, observation.healthy, state.consecutive_failures
        );
    }

    Ok(Transition {
        subject: observation.subject.clone(),
        state,
        emit_alert,
    })
}

/// Update every subject observed in this run. Must be called inside a transaction.
pub fn update_all(
    conn: &mut SqliteConnection,
    observations: &[Observation],
    now: DateTime<Utc>,
    policy: &AlertPolicy,
) -> Result<Vec<Transition>, PersistenceError> {
    observations.iter().map(|o| update(conn, o, now, policy)).collect()
}

/// Subjects whose counter is at or above the alert threshold.
pub fn active_alarms(conn: &mut SqliteConnection, threshold: u32) -> Result<Vec<AlertStateRow>, PersistenceError> {
    use schema::alert_state::dsl as A;

    let threshold = i32::try_from(threshold).unwrap_or(i32::MAX);
    Ok(A::alert_state
        .filter(A::consecutive_failures.ge(threshold))
        .order(A::subject.asc())
        .select(AlertStateRow::as_select())
        .load(conn)?)
}
