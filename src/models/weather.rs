//! Weather context and the power expectation derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weather at the site for the current run. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: Option<DateTime<Utc>>,
    pub ghi_wm2: Option<f64>,
    pub dni_wm2: Option<f64>,
    pub diffuse_wm2: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub temp_c: Option<f64>,
    pub wind_mps: Option<f64>,
    pub sun_elevation_deg: Option<f64>,
    pub sun_azimuth_deg: Option<f64>,
    /// WMO weather interpretation code.
    pub weather_code: Option<u16>,
}

impl WeatherSample {
    pub fn is_precipitating(&self) -> bool {
        self.weather_code.is_some_and(is_precipitation_code)
    }

    pub fn is_fully_overcast(&self) -> bool {
        self.cloud_cover_pct.is_some_and(|c| c >= 100.0)
    }
}

/// Drizzle, rain, freezing rain, snow, showers and thunderstorms.
pub fn is_precipitation_code(code: u16) -> bool {
    matches!(code, 51..=67 | 71..=77 | 80..=82 | 85..=86 | 95..=99)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherExpectation {
    pub expected_dc_kw: f64,
    pub expected_ac_kw: f64,
    pub poa_wm2: f64,
    pub cos_incidence: f64,
    pub module_temp_c_est: f64,
    pub temp_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableCause {
    NoWeatherSample,
    MissingSunPosition,
    MissingIrradiance,
    MissingTemperature,
    MissingArrayCapacity,
}

/// Expected output of one inverter. Never collapses "unknown" into zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Expectation {
    Available(WeatherExpectation),
    Unavailable { cause: UnavailableCause },
}

impl Expectation {
    pub fn unavailable(cause: UnavailableCause) -> Self {
        Expectation::Unavailable { cause }
    }

    pub fn available(&self) -> Option<&WeatherExpectation> {
        match self {
            Expectation::Available(e) => Some(e),
            Expectation::Unavailable { .. } => None,
        }
    }

    pub fn expected_ac_w(&self) -> Option<f64> {
        self.available().map(|e| e.expected_ac_kw * 1000.0)
    }

    pub fn poa_wm2(&self) -> Option<f64> {
        self.available().map(|e| e.poa_wm2)
    }
}
