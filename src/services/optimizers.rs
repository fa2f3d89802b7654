//! Compares the optimizer counts the cloud reports with what each inverter
//! is expected to have.

use crate::config::InverterConfig;
use crate::models::cloud::{lookup_by_serial, CloudInventory};
use crate::models::inverter::InverterReading;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MISMATCH: &str = "optimizer_mismatch";
pub const MISSING: &str = "optimizer_count_missing";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerCheck {
    pub inverter: String,
    pub serial: Option<String>,
    pub expected: u32,
    pub reported: Option<u32>,
    pub ok: bool,
}

impl OptimizerCheck {
    /// Alert-state subject for this check.
    pub fn subject(&self) -> String {
        subject(&self.inverter)
    }

    pub fn reason(&self) -> &'static str {
        match (self.ok, self.reported) {
            (true, _) => "ok",
            (false, Some(_)) => MISMATCH,
            (false, None) => MISSING,
        }
    }

    pub fn message(&self) -> String {
        match self.reported {
            Some(n) => format!("expected {} optimizers, cloud reports {}", self.expected, n),
            None => format!("expected {} optimizers, cloud reports no count", self.expected),
        }
    }
}

pub fn subject(inverter: &str) -> String {
    format!("{}/optimizers", inverter)
}

/// One check per inverter that declares `expected_optimizers`. The inverter is
/// matched by the serial it reported over Modbus, else by its name in the inventory.
/// `counts` is keyed by cloud serial.
pub fn check(
    inverters: &[InverterConfig],
    readings: &BTreeMap<String, InverterReading>,
    inventory: &CloudInventory,
    counts: &BTreeMap<String, u32>,
) -> Vec<OptimizerCheck> {
    inverters
        .iter()
        .filter_map(|inv| {
            let expected = inv.expected_optimizers?;
            let by_serial = readings.get(&inv.name).map(|r| r.serial.clone());
            let by_name = inventory
                .inverters
                .iter()
                .find(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&inv.name)))
                .map(|c| c.serial.clone());
            let serial = by_serial.clone().or(by_name.clone());

            let reported = by_serial
                .as_deref()
                .and_then(|s| lookup_by_serial(counts, s))
                .or_else(|| by_name.as_deref().and_then(|s| lookup_by_serial(counts, s)))
                .copied();

            Some(OptimizerCheck {
                inverter: inv.name.clone(),
                serial,
                expected,
                reported,
                ok: reported == Some(expected),
            })
        })
        .collect()
}
