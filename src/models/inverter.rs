//! Inverter telemetry as read from the device (or a simulation of it).

use crate::error::DataIntegrityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SunSpec operating state codes (inverter model register `St`).
pub mod status {
    pub const OFF: u16 = 1;
    pub const SLEEPING: u16 = 2;
    pub const STARTING: u16 = 3;
    pub const PRODUCING: u16 = 4;
    pub const THROTTLED: u16 = 5;
    pub const SHUTTING_DOWN: u16 = 6;
    pub const FAULT: u16 = 7;
    pub const STANDBY: u16 = 8;
}

pub fn status_name(code: u16) -> &'static str {
    match code {
        status::OFF => "Off",
        status::SLEEPING => "Sleeping",
        status::STARTING => "Starting",
        status::PRODUCING => "Producing",
        status::THROTTLED => "Throttled",
        status::SHUTTING_DOWN => "Shutting Down",
        status::FAULT => "Fault",
        status::STANDBY => "Standby",
        _ => "Unknown",
    }
}

/// One reading of one inverter. Fields the device did not report are `None`,
/// which is not the same thing as a reported zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterReading {
    /// Configured inverter name.
    pub name: String,
    pub serial: String,
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub pac_w: Option<f64>,
    pub vdc_v: Option<f64>,
    pub idc_a: Option<f64>,
    pub total_wh: Option<f64>,
    pub status: Option<u16>,
    pub vendor_status: Option<u16>,
}

impl InverterReading {
    /// Reject values no working device reports: NaN/inf anywhere, negative DC side or
    /// lifetime energy. Negative AC power is tolerated (night-time consumption).
    pub fn check_integrity(&self) -> Result<(), DataIntegrityError> {
        if self.serial.trim().is_empty() {
            return Err(DataIntegrityError::EmptySerial);
        }
        let fields = [
            ("pac_w", self.pac_w, false),
            ("vdc_v", self.vdc_v, true),
            ("idc_a", self.idc_a, true),
            ("total_wh", self.total_wh, true),
        ];
        for (field, value, non_negative) in fields {
            let Some(v) = value else { continue };
            if !v.is_finite() {
                return Err(DataIntegrityError::NonFinite { field });
            }
            if non_negative && v < 0.0 {
                return Err(DataIntegrityError::Negative { field, value: v });
            }
        }
        Ok(())
    }

    pub fn status_label(&self) -> String {
        match self.status {
            Some(code) => status_name(code).to_string(),
            None => "-".to_string(),
        }
    }
}
