//! Verdicts produced by the rule engine and the alerts derived from them.

use crate::models::inverter::InverterReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exactly one reason per inverter per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Ok,
    LowPac,
    LowVdc,
    VendorFault,
    PeerDeviation,
    WeatherSuppressed,
    InsufficientData,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Ok => "ok",
            Reason::LowPac => "low_pac",
            Reason::LowVdc => "low_vdc",
            Reason::VendorFault => "vendor_fault",
            Reason::PeerDeviation => "peer_deviation",
            Reason::WeatherSuppressed => "weather_suppressed",
            Reason::InsufficientData => "insufficient_data",
        }
    }

    /// A suppressed failure still counts as healthy for alerting.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Reason::Ok | Reason::WeatherSuppressed)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gate turned a failing check into `weather_suppressed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionGate {
    SunElevation,
    LowIrradiance,
    OvercastPrecipitation,
    WithinExpectation,
    LowExpectation,
    TwilightGrace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub inverter: String,
    pub inverter_ok: bool,
    pub reason: Reason,
    pub detail: Option<String>,
    pub suppressed_by: Option<SuppressionGate>,
    pub reading: Option<InverterReading>,
}

impl HealthVerdict {
    pub fn new(inverter: &str, reason: Reason, detail: Option<String>, reading: Option<InverterReading>) -> Self {
        HealthVerdict {
            inverter: inverter.to_string(),
            inverter_ok: reason.is_healthy(),
            reason,
            detail,
            suppressed_by: None,
            reading,
        }
    }

    pub fn suppressed(inverter: &str, gate: SuppressionGate, detail: String, reading: Option<InverterReading>) -> Self {
        HealthVerdict {
            suppressed_by: Some(gate),
            ..HealthVerdict::new(inverter, Reason::WeatherSuppressed, Some(detail), reading)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub system_ok: bool,
    pub verdicts: Vec<HealthVerdict>,
}

impl SystemHealth {
    pub fn from_verdicts(verdicts: Vec<HealthVerdict>) -> Self {
        SystemHealth {
            system_ok: verdicts.iter().all(|v| v.inverter_ok),
            verdicts,
        }
    }

    pub fn verdict(&self, inverter: &str) -> Option<&HealthVerdict> {
        self.verdicts.iter().find(|v| v.inverter == inverter)
    }
}

/// A debounced alert, emitted once the failure count reaches the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert-state key: the inverter name, or `<name>/optimizers`.
    pub subject: String,
    pub inverter: String,
    pub serial: Option<String>,
    pub reason: String,
    pub message: String,
    pub consecutive_failures: u32,
    pub pac_w: Option<f64>,
    pub at: DateTime<Utc>,
}
