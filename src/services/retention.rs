//! Idempotent pruning of the run history.

use crate::config::RetentionPolicy;
use crate::error::PersistenceError;
use crate::schema;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneCounts {
    pub snapshots: usize,
    pub summaries: usize,
    pub vacuumed: bool,
}

pub fn prune(conn: &mut SqliteConnection, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<PruneCounts, PersistenceError> {
    use schema::daily_summary::dsl as D;
    use schema::snapshots::dsl as S;

    let snapshot_cutoff = (now - Duration::days(i64::from(policy.snapshot_days))).naive_utc();
    let summary_cutoff = (now - Duration::days(i64::from(policy.summary_days))).date_naive();
    debug!(
        "Pruning snapshots before {} and summaries before {}",
        snapshot_cutoff, summary_cutoff
    );

    let (snapshots, summaries) = conn.immediate_transaction::<_, PersistenceError, _>(|conn| {
        let snapshots = diesel::delete(S::snapshots.filter(S::run_at.lt(snapshot_cutoff))).execute(conn)?;
        let summaries = diesel::delete(D::daily_summary.filter(D::date.lt(summary_cutoff))).execute(conn)?;
        Ok((snapshots, summaries))
    })?;

    // VACUUM cannot run inside a transaction.
    let vacuumed = if policy.vacuum {
        diesel::sql_query("VACUUM").execute(conn)?;
        true
    } else {
        false
    };

    info!(
        "Pruned {} snapshot(s) and {} daily summar{}{}",
        snapshots,
        summaries,
        if summaries == 1 { "y" } else { "ies" },
        if vacuumed { "; database vacuumed" } else { "" }
    );
    Ok(PruneCounts {
        snapshots,
        summaries,
        vacuumed,
    })
}
