//! The per-run record and its two renderings: JSON and console lines.

use crate::db::models::DailySummaryRow;
use crate::models::cloud::CloudInventory;
use crate::models::health::{Alert, Reason, SuppressionGate};
use crate::models::inverter::InverterReading;
use crate::models::weather::{Expectation, WeatherSample};
use crate::services::daylight::DaylightInfo;
use crate::services::optimizers::OptimizerCheck;
use crate::utils::fmt_opt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct InverterRecord {
    pub name: String,
    pub reading: Option<InverterReading>,
    pub read_error: Option<String>,
    pub expectation: Expectation,
    /// pac_w − expected AC output, when both are known.
    pub residual_w: Option<f64>,
    pub reason: Reason,
    pub inverter_ok: bool,
    pub detail: Option<String>,
    pub suppressed_by: Option<SuppressionGate>,
    pub consecutive_failures: u32,
    pub alert_emitted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Device polling was skipped for the night.
    pub skipped: bool,
    pub daylight: DaylightInfo,
    pub sun_elevation_deg: Option<f64>,
    pub weather: Option<WeatherSample>,
    pub inverters: Vec<InverterRecord>,
    pub system_ok: Option<bool>,
    pub alerts: Vec<Alert>,
    pub cloud_inventory: Option<CloudInventory>,
    pub optimizer_checks: Vec<OptimizerCheck>,
    pub summary: Option<DailySummaryRow>,
}

impl RunRecord {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn human_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.skipped {
            out.push(format!(
                "{} night ({:?}); device polling skipped",
                self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                self.daylight.phase
            ));
        }
        for inv in &self.inverters {
            let r = inv.reading.as_ref();
            let status = r.map(|r| r.status_label()).unwrap_or_else(|| "-".to_string());
            let mut line = format!(
                "[{}] PAC={} Vdc={} Idc={} status={} verdict={}",
                inv.name,
                fmt_opt(r.and_then(|r| r.pac_w), 0, "W"),
                fmt_opt(r.and_then(|r| r.vdc_v), 1, "V"),
                fmt_opt(r.and_then(|r| r.idc_a), 2, "A"),
                status,
                inv.reason
            );
            if let Some(expected) = inv.expectation.expected_ac_w() {
                line.push_str(&format!(" expected={:.0}W", expected));
            }
            if let Some(detail) = &inv.detail {
                line.push_str(&format!(" ({})", detail));
            }
            if inv.consecutive_failures > 0 {
                line.push_str(&format!(" failures={}", inv.consecutive_failures));
            }
            out.push(line);
        }
        for check in &self.optimizer_checks {
            out.push(format!(
                "[{}] optimizers expected={} reported={} {}",
                check.inverter,
                check.expected,
                check.reported.map_or("-".to_string(), |n| n.to_string()),
                if check.ok { "ok" } else { check.reason() }
            ));
        }
        for alert in &self.alerts {
            out.push(format!("ALERT {}: {} ({})", alert.subject, alert.reason, alert.message));
        }
        if let Some(ok) = self.system_ok {
            out.push(format!("system_ok={}", ok));
        }
        if let Some(summary) = &self.summary {
            out.push(summary_text(summary));
        }
        out
    }
}

pub fn summary_text(summary: &DailySummaryRow) -> String {
    format!(
        "Summary {}: energy={} min/avg/max PAC={}/{}/{} samples={} inverters={} alerts={}",
        summary.date,
        fmt_opt(summary.energy_wh.map(|wh| wh / 1000.0), 2, "kWh"),
        fmt_opt(summary.min_pac_w, 0, "W"),
        fmt_opt(summary.avg_pac_w, 0, "W"),
        fmt_opt(summary.max_pac_w, 0, "W"),
        summary.sample_count,
        summary.inverter_count,
        summary.alert_count
    )
}

/// Append one JSON line to the run log, creating the file and its parent directory.
pub fn append_run_log(path: &Path, record: &RunRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let line = record.to_json_line().map_err(std::io::Error::other)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
