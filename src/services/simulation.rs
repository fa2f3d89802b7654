//! Simulated inverters, cloud and weather for dry runs and debouncing drills.
//!
//! Built-in scenarios are derived from the configured fleet; a
//! `[simulation.scenarios.NAME]` table with the same name replaces them.

use crate::config::{Config, InverterConfig, ScenarioConfig, SiteConfig, SimulatedInverter, SimulatedWeather};
use crate::error::{ConfigError, ConnectivityError};
use crate::models::cloud::{CloudInventory, CloudInverter};
use crate::models::inverter::{status, InverterReading};
use crate::models::weather::WeatherSample;
use crate::solar;
use crate::sources::{CloudSource, InverterReader, WeatherSource};
use chrono::{DateTime, Utc};
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Mutex;

const SOURCE: &str = "simulation";
const DEFAULT_SEED: u64 = 0x50_1A12_5E47_1E11;
/// Minutes of production credited to the energy counter per simulated read.
const READ_INTERVAL_MINUTES: f64 = 5.0;

pub const BUILTIN_SCENARIOS: [&str; 5] = ["healthy", "offline", "low-output", "fault", "no-optimizers"];

/// Serial number reported by a simulated inverter.
pub fn simulated_serial(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("SIM{}", cleaned)
}

fn producing(inverter: &InverterConfig) -> SimulatedInverter {
    let capacity_w = inverter.params.ac_capacity_w().unwrap_or(5_000.0);
    let pac = (capacity_w * 0.64).round();
    SimulatedInverter {
        offline: false,
        pac_w: Some(pac),
        vdc_v: Some(380.0),
        idc_a: Some(((pac / 380.0) * 100.0).round() / 100.0),
        total_wh: Some(12_500_000.0),
        status: Some(status::PRODUCING),
        vendor_status: Some(0),
    }
}

fn clear_sky() -> SimulatedWeather {
    SimulatedWeather {
        ghi_wm2: Some(800.0),
        dni_wm2: Some(700.0),
        diffuse_wm2: Some(110.0),
        cloud_cover_pct: Some(10.0),
        temp_c: Some(22.0),
        wind_mps: Some(2.0),
        weather_code: Some(1),
        sun_elevation_deg: Some(50.0),
        sun_azimuth_deg: Some(180.0),
    }
}

pub fn builtin(name: &str, inverters: &[InverterConfig]) -> Option<ScenarioConfig> {
    let mut scenario = ScenarioConfig {
        weather: Some(clear_sky()),
        jitter: 0.02,
        ..ScenarioConfig::default()
    };
    for inv in inverters {
        scenario.inverters.insert(inv.name.clone(), producing(inv));
    }
    // the last configured inverter is the one that misbehaves
    let victim = inverters.last().map(|i| i.name.clone());

    match name {
        "healthy" => {
            scenario.description = Some("every inverter producing under a clear sky".to_string());
        }
        "offline" => {
            scenario.description = Some("no inverter answers".to_string());
            for sim in scenario.inverters.values_mut() {
                sim.offline = true;
            }
        }
        "low-output" => {
            scenario.description = Some("one inverter at 0 W while its peers produce".to_string());
            if let Some(sim) = victim.as_ref().and_then(|v| scenario.inverters.get_mut(v)) {
                sim.pac_w = Some(0.0);
                sim.idc_a = Some(0.0);
            }
        }
        "fault" => {
            scenario.description = Some("one inverter reports a fault state".to_string());
            if let Some(sim) = victim.as_ref().and_then(|v| scenario.inverters.get_mut(v)) {
                sim.pac_w = Some(0.0);
                sim.idc_a = Some(0.0);
                sim.status = Some(status::FAULT);
                sim.vendor_status = Some(0x0301);
            }
        }
        "no-optimizers" => {
            scenario.description = Some("the cloud reports no connected optimizers".to_string());
            for inv in inverters {
                scenario.optimizer_counts.insert(inv.name.clone(), 0);
            }
        }
        _ => return None,
    }
    Some(scenario)
}

/// A configured scenario wins over a built-in one with the same name.
pub fn resolve(name: &str, config: &Config) -> Result<ScenarioConfig, ConfigError> {
    if let Some(s) = config.scenarios.get(name) {
        return Ok(s.clone());
    }
    builtin(name, &config.inverters).ok_or_else(|| ConfigError::UnknownScenario(name.to_string()))
}

/// Per-inverter readings with a field-by-field fallback to the scenario default.
fn effective(scenario: &ScenarioConfig, name: &str) -> SimulatedInverter {
    let fallback = &scenario.default_inverter;
    match scenario.inverters.get(name) {
        Some(s) => SimulatedInverter {
            offline: s.offline,
            pac_w: s.pac_w.or(fallback.pac_w),
            vdc_v: s.vdc_v.or(fallback.vdc_v),
            idc_a: s.idc_a.or(fallback.idc_a),
            total_wh: s.total_wh.or(fallback.total_wh),
            status: s.status.or(fallback.status),
            vendor_status: s.vendor_status.or(fallback.vendor_status),
        },
        None => fallback.clone(),
    }
}

pub struct SimulatedReader {
    scenario: ScenarioConfig,
    rng: Mutex<SmallRng>,
    energy: Mutex<BTreeMap<String, f64>>,
}

impl SimulatedReader {
    pub fn new(scenario: &ScenarioConfig) -> Self {
        SimulatedReader {
            scenario: scenario.clone(),
            rng: Mutex::new(SmallRng::seed_from_u64(scenario.seed.unwrap_or(DEFAULT_SEED))),
            energy: Mutex::new(BTreeMap::new()),
        }
    }

    fn jitter(&self, value: Option<f64>) -> Option<f64> {
        let j = self.scenario.jitter;
        let v = value?;
        if j <= 0.0 || v == 0.0 {
            return Some(v);
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(v * (1.0 + rng.random_range(-j..=j)))
    }

    /// Lifetime counter that advances with the simulated output.
    fn advance_energy(&self, name: &str, start: Option<f64>, pac_w: Option<f64>) -> Option<f64> {
        let start = start?;
        let mut energy = self.energy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let total = energy.entry(name.to_string()).or_insert(start);
        *total += pac_w.unwrap_or(0.0).max(0.0) * READ_INTERVAL_MINUTES / 60.0;
        Some(total.round())
    }
}

impl InverterReader for SimulatedReader {
    fn read(&self, inverter: &InverterConfig) -> Result<InverterReading, ConnectivityError> {
        let sim = effective(&self.scenario, &inverter.name);
        if sim.offline {
            debug!("[{}] simulated inverter is offline", inverter.name);
            return Err(ConnectivityError::Timeout { source_name: SOURCE });
        }
        let pac_w = self.jitter(sim.pac_w);
        Ok(InverterReading {
            name: inverter.name.clone(),
            serial: simulated_serial(&inverter.name),
            model: Some("Simulated SE5000H".to_string()),
            timestamp: Utc::now(),
            pac_w,
            vdc_v: self.jitter(sim.vdc_v),
            idc_a: self.jitter(sim.idc_a),
            total_wh: self.advance_energy(&inverter.name, sim.total_wh, pac_w),
            status: sim.status,
            vendor_status: sim.vendor_status,
        })
    }
}

pub struct SimulatedCloud {
    available: bool,
    inventory: CloudInventory,
}

impl SimulatedCloud {
    pub fn new(scenario: &ScenarioConfig, inverters: &[InverterConfig]) -> Self {
        let inventory = CloudInventory {
            inverters: inverters
                .iter()
                .map(|inv| CloudInverter {
                    serial: simulated_serial(&inv.name),
                    name: Some(inv.name.clone()),
                    model: Some("Simulated SE5000H".to_string()),
                    status: Some("Active".to_string()),
                    connected_optimizers: scenario
                        .optimizer_counts
                        .get(&inv.name)
                        .copied()
                        .or(inv.expected_optimizers),
                })
                .collect(),
        };
        SimulatedCloud {
            available: scenario.cloud_available,
            inventory,
        }
    }
}

impl CloudSource for SimulatedCloud {
    fn fetch_inventory(&self) -> Result<CloudInventory, ConnectivityError> {
        if !self.available {
            return Err(ConnectivityError::Transport {
                source_name: SOURCE,
                message: "simulated cloud outage".to_string(),
            });
        }
        Ok(self.inventory.clone())
    }
}

pub struct SimulatedWeatherSource {
    weather: Option<SimulatedWeather>,
}

impl SimulatedWeatherSource {
    pub fn new(scenario: &ScenarioConfig) -> Self {
        SimulatedWeatherSource {
            weather: scenario.weather.clone(),
        }
    }
}

impl WeatherSource for SimulatedWeatherSource {
    fn fetch(&self, site: &SiteConfig, now: DateTime<Utc>) -> Result<WeatherSample, ConnectivityError> {
        let Some(w) = &self.weather else {
            return Err(ConnectivityError::NotConfigured { source_name: SOURCE });
        };
        let computed = site
            .coordinates()
            .and_then(|(lat, lon)| solar::solar_position(now, lat, lon).ok());
        Ok(WeatherSample {
            timestamp: Some(now),
            ghi_wm2: w.ghi_wm2,
            dni_wm2: w.dni_wm2,
            diffuse_wm2: w.diffuse_wm2,
            cloud_cover_pct: w.cloud_cover_pct,
            temp_c: w.temp_c,
            wind_mps: w.wind_mps,
            sun_elevation_deg: w.sun_elevation_deg.or(computed.map(|p| p.elevation_deg)),
            sun_azimuth_deg: w.sun_azimuth_deg.or(computed.map(|p| p.azimuth_deg)),
            weather_code: w.weather_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteParameters;

    fn fleet() -> Vec<InverterConfig> {
        ["A", "B", "C"]
            .iter()
            .map(|n| InverterConfig {
                name: n.to_string(),
                host: "127.0.0.1".to_string(),
                port: 1502,
                unit: 1,
                expected_optimizers: Some(12),
                params: SiteParameters {
                    array_kw_dc: Some(5.5),
                    ac_capacity_kw: Some(5.0),
                    ..SiteParameters::default()
                },
            })
            .collect()
    }

    #[test]
    fn every_builtin_resolves() {
        for name in BUILTIN_SCENARIOS {
            assert!(builtin(name, &fleet()).is_some(), "{name}");
        }
        assert!(builtin("sandstorm", &fleet()).is_none());
    }

    #[test]
    fn low_output_hits_only_the_last_inverter() {
        let scenario = builtin("low-output", &fleet()).unwrap();
        let reader = SimulatedReader::new(&scenario);
        let fleet = fleet();
        let a = reader.read(&fleet[0]).unwrap();
        let c = reader.read(&fleet[2]).unwrap();
        assert!(a.pac_w.unwrap() > 3_000.0);
        assert_eq!(c.pac_w, Some(0.0));
        assert_eq!(c.serial, "SIMC");
    }

    #[test]
    fn offline_reads_time_out() {
        let scenario = builtin("offline", &fleet()).unwrap();
        let reader = SimulatedReader::new(&scenario);
        let err = reader.read(&fleet()[0]).unwrap_err();
        assert!(matches!(err, ConnectivityError::Timeout { .. }));
    }

    #[test]
    fn jitter_is_bounded_and_seeded() {
        let mut scenario = builtin("healthy", &fleet()).unwrap();
        scenario.jitter = 0.1;
        scenario.seed = Some(7);
        let first: Vec<f64> = {
            let reader = SimulatedReader::new(&scenario);
            (0..20).map(|_| reader.read(&fleet()[0]).unwrap().pac_w.unwrap()).collect()
        };
        let second: Vec<f64> = {
            let reader = SimulatedReader::new(&scenario);
            (0..20).map(|_| reader.read(&fleet()[0]).unwrap().pac_w.unwrap()).collect()
        };
        assert_eq!(first, second);
        for pac in first {
            assert!((2_880.0..=3_520.0).contains(&pac), "{pac}");
        }
    }

    #[test]
    fn energy_counter_only_grows() {
        let scenario = builtin("healthy", &fleet()).unwrap();
        let reader = SimulatedReader::new(&scenario);
        let t1 = reader.read(&fleet()[0]).unwrap().total_wh.unwrap();
        let t2 = reader.read(&fleet()[0]).unwrap().total_wh.unwrap();
        assert!(t2 > t1);
    }

    #[test]
    fn no_optimizers_cloud_reports_zero() {
        let fleet = fleet();
        let scenario = builtin("no-optimizers", &fleet).unwrap();
        let cloud = SimulatedCloud::new(&scenario, &fleet);
        let counts = cloud.fetch_optimizer_counts(None).unwrap();
        assert_eq!(counts.get("SIMA"), Some(&0));

        let healthy = SimulatedCloud::new(&builtin("healthy", &fleet).unwrap(), &fleet);
        assert_eq!(healthy.fetch_optimizer_counts(None).unwrap().get("SIMB"), Some(&12));
    }

    #[test]
    fn weather_falls_back_to_computed_sun_position() {
        let scenario = ScenarioConfig {
            weather: Some(SimulatedWeather {
                ghi_wm2: Some(100.0),
                ..SimulatedWeather::default()
            }),
            ..ScenarioConfig::default()
        };
        let site = SiteConfig {
            timezone: chrono_tz::Europe::Ljubljana,
            latitude: Some(46.0569),
            longitude: Some(14.5058),
            params: SiteParameters::default(),
        };
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 6, 21, 11, 0, 0).unwrap();
        let sample = SimulatedWeatherSource::new(&scenario).fetch(&site, now).unwrap();
        assert!(sample.sun_elevation_deg.unwrap() > 60.0);
        assert_eq!(sample.ghi_wm2, Some(100.0));
    }
}
