//! Open-Meteo forecast client.

use crate::client::{agent, map_ureq_error, read_json};
use crate::config::{SiteConfig, WeatherConfig};
use crate::error::ConnectivityError;
use crate::models::weather::WeatherSample;
use crate::solar;
use crate::sources::WeatherSource;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

const SOURCE: &str = "open-meteo";

const HOURLY_FIELDS: &str =
    "shortwave_radiation,direct_normal_irradiance,diffuse_radiation,temperature_2m,cloud_cover,wind_speed_10m";
const CURRENT_FIELDS: &str = "temperature_2m,weather_code,cloud_cover";

pub struct OpenMeteoClient {
    agent: ureq::Agent,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(cfg: &WeatherConfig) -> Self {
        OpenMeteoClient {
            agent: agent(Duration::from_secs_f64(cfg.timeout_secs)),
            base_url: cfg.base_url.clone(),
        }
    }
}

impl WeatherSource for OpenMeteoClient {
    fn fetch(&self, site: &SiteConfig, now: DateTime<Utc>) -> Result<WeatherSample, ConnectivityError> {
        let Some((lat, lon)) = site.coordinates() else {
            return Err(ConnectivityError::NotConfigured { source_name: SOURCE });
        };
        debug!("Fetching weather for {:.4},{:.4}", lat, lon);
        let response = self
            .agent
            .get(&self.base_url)
            .query("latitude", lat.to_string())
            .query("longitude", lon.to_string())
            .query("hourly", HOURLY_FIELDS)
            .query("current", CURRENT_FIELDS)
            .query("timezone", "UTC")
            .query("wind_speed_unit", "ms")
            .query("forecast_days", "1")
            .call()
            .map_err(|e| map_ureq_error(SOURCE, e))?;
        let forecast: Forecast = read_json(SOURCE, response)?;
        sample_from_forecast(&forecast, now, lat, lon)
    }
}

#[derive(Debug, Deserialize)]
struct Forecast {
    #[serde(default)]
    current: Option<Current>,
    hourly: Hourly,
}

#[derive(Debug, Deserialize)]
struct Current {
    #[serde(default)]
    temperature_2m: Option<f64>,
    #[serde(default)]
    weather_code: Option<u16>,
    #[serde(default)]
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Hourly {
    time: Vec<String>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
    #[serde(default)]
    direct_normal_irradiance: Vec<Option<f64>>,
    #[serde(default)]
    diffuse_radiation: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], idx: usize) -> Option<f64> {
    values.get(idx).copied().flatten()
}

/// Index and time of the hourly slot closest to `now`.
fn nearest_slot(times: &[String], now: DateTime<Utc>) -> Option<(usize, DateTime<Utc>)> {
    times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M")
                .ok()
                .map(|naive| (i, naive.and_utc()))
        })
        .min_by_key(|(_, t)| (*t - now).num_seconds().abs())
}

fn sample_from_forecast(
    forecast: &Forecast,
    now: DateTime<Utc>,
    lat: f64,
    lon: f64,
) -> Result<WeatherSample, ConnectivityError> {
    let hourly = &forecast.hourly;
    let Some((idx, slot)) = nearest_slot(&hourly.time, now) else {
        return Err(ConnectivityError::Protocol {
            source_name: SOURCE,
            message: "forecast has no usable hourly slots".to_string(),
        });
    };
    let current = forecast.current.as_ref();
    let sun = solar::solar_position(now, lat, lon)
        .map_err(|e| debug!("Sun position unavailable: {}", e))
        .ok();

    Ok(WeatherSample {
        timestamp: Some(slot),
        ghi_wm2: at(&hourly.shortwave_radiation, idx),
        dni_wm2: at(&hourly.direct_normal_irradiance, idx),
        diffuse_wm2: at(&hourly.diffuse_radiation, idx),
        cloud_cover_pct: current
            .and_then(|c| c.cloud_cover)
            .or_else(|| at(&hourly.cloud_cover, idx)),
        temp_c: current
            .and_then(|c| c.temperature_2m)
            .or_else(|| at(&hourly.temperature_2m, idx)),
        wind_mps: at(&hourly.wind_speed_10m, idx),
        sun_elevation_deg: sun.map(|p| p.elevation_deg),
        sun_azimuth_deg: sun.map(|p| p.azimuth_deg),
        weather_code: current.and_then(|c| c.weather_code),
    })
}
