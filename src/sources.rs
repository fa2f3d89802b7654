//! Contracts for the data sources a health run consumes. Real and simulated
//! implementations are picked once at startup.

use crate::config::{InverterConfig, SiteConfig};
use crate::error::ConnectivityError;
use crate::models::cloud::CloudInventory;
use crate::models::inverter::InverterReading;
use crate::models::weather::WeatherSample;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Reads run in parallel, one scoped thread per inverter.
pub trait InverterReader: Sync {
    fn read(&self, inverter: &InverterConfig) -> Result<InverterReading, ConnectivityError>;
}

pub trait CloudSource {
    fn fetch_inventory(&self) -> Result<CloudInventory, ConnectivityError>;

    /// Connected optimizers per inverter serial. Reuses `inventory` when the
    /// caller already has one.
    fn fetch_optimizer_counts(
        &self,
        inventory: Option<&CloudInventory>,
    ) -> Result<BTreeMap<String, u32>, ConnectivityError> {
        match inventory {
            Some(inv) => Ok(inv.optimizer_counts()),
            None => Ok(self.fetch_inventory()?.optimizer_counts()),
        }
    }
}

/// An error means the weather is unavailable for this run, nothing more.
pub trait WeatherSource {
    fn fetch(&self, site: &SiteConfig, now: DateTime<Utc>) -> Result<WeatherSample, ConnectivityError>;
}

/// Run `op` up to `attempts` times, sleeping `delay * attempt` between
/// transient failures. Permanent errors are returned at once.
pub fn with_retries<T>(
    label: &str,
    attempts: u32,
    delay: std::time::Duration,
    mut op: impl FnMut() -> Result<T, ConnectivityError>,
) -> Result<T, ConnectivityError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                log::debug!("{}: attempt {}/{} failed: {}", label, attempt, attempts, e);
                std::thread::sleep(delay * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
