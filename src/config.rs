//! Runtime configuration: one TOML file plus environment overrides for secrets.
//! Everything is validated once in [`Config::load`]; the rest of the program only
//! sees resolved, checked values.

use crate::error::ConfigError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "solar-sentinel.toml";
pub const DEFAULT_DB_PATH: &str = "solar-sentinel.db";
pub const DEFAULT_MODBUS_PORT: u16 = 1502;
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_CLOUD_URL: &str = "https://monitoringapi.solaredge.com";
pub const DEFAULT_PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// Physical parameters of an array, used by the expectation model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteParameters {
    pub tilt_deg: f64,
    pub azimuth_deg: f64,
    pub albedo: f64,
    pub array_kw_dc: Option<f64>,
    pub ac_capacity_kw: Option<f64>,
    pub derate: f64,
    pub noct_c: f64,
    pub temp_coeff_per_c: f64,
}

impl Default for SiteParameters {
    fn default() -> Self {
        SiteParameters {
            tilt_deg: 30.0,
            azimuth_deg: 180.0,
            albedo: 0.2,
            array_kw_dc: None,
            ac_capacity_kw: None,
            derate: 0.96,
            noct_c: 45.0,
            temp_coeff_per_c: -0.004,
        }
    }
}

impl SiteParameters {
    pub fn ac_capacity_w(&self) -> Option<f64> {
        self.ac_capacity_kw.map(|kw| kw * 1000.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SiteFile {
    timezone: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    tilt_deg: f64,
    azimuth_deg: f64,
    albedo: f64,
    /// Total DC nameplate of the site, split across inverters without their own value.
    array_kw_dc: Option<f64>,
    /// Total AC capacity of the site, split the same way.
    ac_capacity_kw: Option<f64>,
    derate: f64,
    noct_c: f64,
    temp_coeff_per_c: f64,
}

impl Default for SiteFile {
    fn default() -> Self {
        let p = SiteParameters::default();
        SiteFile {
            timezone: "UTC".to_string(),
            latitude: None,
            longitude: None,
            tilt_deg: p.tilt_deg,
            azimuth_deg: p.azimuth_deg,
            albedo: p.albedo,
            array_kw_dc: p.array_kw_dc,
            ac_capacity_kw: p.ac_capacity_kw,
            derate: p.derate,
            noct_c: p.noct_c,
            temp_coeff_per_c: p.temp_coeff_per_c,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub timezone: Tz,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub params: SiteParameters,
}

impl SiteConfig {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaylightConfig {
    /// Used only when the site has no coordinates.
    #[serde(deserialize_with = "de_hhmm")]
    pub static_sunrise: NaiveTime,
    #[serde(deserialize_with = "de_hhmm")]
    pub static_sunset: NaiveTime,
    pub sunrise_grace_minutes: i64,
    pub sunset_grace_minutes: i64,
    pub cloud_sunrise_grace_minutes: i64,
    pub cloud_sunset_grace_minutes: i64,
    pub summary_delay_minutes: i64,
    pub skip_modbus_at_night: bool,
    pub skip_cloud_at_night: bool,
}

impl Default for DaylightConfig {
    fn default() -> Self {
        DaylightConfig {
            static_sunrise: NaiveTime::from_hms_opt(6, 30, 0).unwrap_or_default(),
            static_sunset: NaiveTime::from_hms_opt(20, 30, 0).unwrap_or_default(),
            sunrise_grace_minutes: 30,
            sunset_grace_minutes: 45,
            cloud_sunrise_grace_minutes: 0,
            cloud_sunset_grace_minutes: 0,
            summary_delay_minutes: 0,
            skip_modbus_at_night: true,
            skip_cloud_at_night: true,
        }
    }
}

fn de_hhmm<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| serde::de::Error::custom(format!("expected HH:MM, got '{}'", raw)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModbusConfig {
    pub timeout_secs: f64,
    pub retries: u32,
    pub retry_delay_secs: f64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        ModbusConfig {
            timeout_secs: 3.0,
            retries: 3,
            retry_delay_secs: 1.0,
        }
    }
}

impl ModbusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct InverterFile {
    name: String,
    #[serde(default)]
    host: String,
    #[serde(default = "default_modbus_port")]
    port: u16,
    #[serde(default = "default_unit")]
    unit: u8,
    #[serde(default)]
    expected_optimizers: Option<u32>,
    #[serde(default)]
    tilt_deg: Option<f64>,
    #[serde(default)]
    azimuth_deg: Option<f64>,
    #[serde(default)]
    albedo: Option<f64>,
    #[serde(default)]
    array_kw_dc: Option<f64>,
    #[serde(default)]
    ac_capacity_kw: Option<f64>,
    #[serde(default)]
    derate: Option<f64>,
    #[serde(default)]
    noct_c: Option<f64>,
    #[serde(default)]
    temp_coeff_per_c: Option<f64>,
}

fn default_modbus_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_unit() -> u8 {
    1
}

/// One inverter with its site parameters fully resolved.
#[derive(Debug, Clone)]
pub struct InverterConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit: u8,
    pub expected_optimizers: Option<u32>,
    pub params: SiteParameters,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Percentage of the inverter's AC capacity below which output counts as low.
    pub pac_floor_pct: f64,
    pub low_vdc_v: Option<f64>,
    pub fault_status_codes: Vec<u16>,
    pub fault_vendor_codes: Vec<u16>,
    pub peer_deviation_ratio: f64,
    pub peer_min_production_w: f64,
    pub min_alert_sun_el_deg: Option<f64>,
    pub min_alert_irradiance_wm2: Option<f64>,
    /// Fraction of the expected AC output that still counts as "as expected".
    pub expectation_tolerance: f64,
    pub suppress_in_grace: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            pac_floor_pct: 1.0,
            low_vdc_v: None,
            fault_status_codes: vec![7],
            fault_vendor_codes: Vec::new(),
            peer_deviation_ratio: 0.5,
            peer_min_production_w: 50.0,
            min_alert_sun_el_deg: Some(5.0),
            min_alert_irradiance_wm2: Some(50.0),
            expectation_tolerance: 0.3,
            suppress_in_grace: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    pub enabled: bool,
    pub consecutive_health_alerts: u32,
    /// Re-emit every K further unhealthy reads once the threshold was crossed.
    pub realert_every: Option<u32>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            enabled: true,
            consecutive_health_alerts: 3,
            realert_every: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            enabled: false,
            base_url: DEFAULT_WEATHER_URL.to_string(),
            timeout_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    pub enabled: bool,
    pub base_url: String,
    pub site_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: f64,
    pub retries: u32,
    pub retry_delay_secs: f64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig {
            enabled: false,
            base_url: DEFAULT_CLOUD_URL.to_string(),
            site_id: None,
            api_key: None,
            timeout_secs: 10.0,
            retries: 2,
            retry_delay_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushoverConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub user: Option<String>,
    pub api_url: String,
    pub priority: i8,
    pub timeout_secs: f64,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        PushoverConfig {
            enabled: false,
            token: None,
            user: None,
            api_url: DEFAULT_PUSHOVER_URL.to_string(),
            priority: 0,
            timeout_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthchecksConfig {
    pub enabled: bool,
    pub ping_url: Option<String>,
    pub timeout_secs: f64,
}

impl Default for HealthchecksConfig {
    fn default() -> Self {
        HealthchecksConfig {
            enabled: false,
            ping_url: None,
            timeout_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionPolicy {
    pub snapshot_days: u32,
    pub summary_days: u32,
    pub vacuum: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            snapshot_days: 90,
            summary_days: 730,
            vacuum: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Append one JSON run record per line to this file.
    pub run_log_path: Option<PathBuf>,
}

/// Canned readings for one inverter in a simulation scenario.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedInverter {
    pub offline: bool,
    pub pac_w: Option<f64>,
    pub vdc_v: Option<f64>,
    pub idc_a: Option<f64>,
    pub total_wh: Option<f64>,
    pub status: Option<u16>,
    pub vendor_status: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedWeather {
    pub ghi_wm2: Option<f64>,
    pub dni_wm2: Option<f64>,
    pub diffuse_wm2: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub temp_c: Option<f64>,
    pub wind_mps: Option<f64>,
    pub weather_code: Option<u16>,
    /// Overrides the sun position computed from the site coordinates.
    pub sun_elevation_deg: Option<f64>,
    pub sun_azimuth_deg: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub description: Option<String>,
    /// Relative jitter applied to power, voltage and current (0.05 = ±5 %).
    pub jitter: f64,
    pub seed: Option<u64>,
    /// Template for inverters not listed in `inverters`.
    pub default_inverter: SimulatedInverter,
    pub inverters: BTreeMap<String, SimulatedInverter>,
    pub weather: Option<SimulatedWeather>,
    pub cloud_available: bool,
    /// Optimizer counts reported by the simulated cloud; missing names use the expected count.
    pub optimizer_counts: BTreeMap<String, u32>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            description: None,
            jitter: 0.0,
            seed: None,
            default_inverter: SimulatedInverter::default(),
            inverters: BTreeMap::new(),
            weather: None,
            cloud_available: true,
            optimizer_counts: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SimulationFile {
    scenarios: BTreeMap<String, ScenarioConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    store: StoreConfig,
    site: SiteFile,
    daylight: DaylightConfig,
    modbus: ModbusConfig,
    inverters: Vec<InverterFile>,
    health: HealthConfig,
    alerts: AlertConfig,
    weather: WeatherConfig,
    cloud: CloudConfig,
    pushover: PushoverConfig,
    healthchecks: HealthchecksConfig,
    retention: RetentionPolicy,
    logging: LoggingConfig,
    simulation: SimulationFile,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub site: SiteConfig,
    pub daylight: DaylightConfig,
    pub modbus: ModbusConfig,
    pub inverters: Vec<InverterConfig>,
    pub health: HealthConfig,
    pub alerts: AlertConfig,
    pub weather: WeatherConfig,
    pub cloud: CloudConfig,
    pub pushover: PushoverConfig,
    pub healthchecks: HealthchecksConfig,
    pub retention: RetentionPolicy,
    pub logging: LoggingConfig,
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

impl Config {
    /// Load the config file (when present), apply environment overrides and validate.
    ///
    /// A missing file is only an error when the path was given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let raw = if path.is_file() || explicit {
            std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
                path: path.clone(),
                source,
            })?
        } else {
            String::new()
        };
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self::from_toml_str(&raw, &path, env)
    }

    pub fn from_toml_str(
        raw: &str,
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let deserializer = toml::Deserializer::new(raw);
        let mut file: FileConfig =
            serde_path_to_error::deserialize(deserializer).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        apply_env_overrides(&mut file, env);
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> Result<Self, ConfigError> {
        let timezone: Tz = file
            .site
            .timezone
            .parse()
            .map_err(|_| ConfigError::invalid("site.timezone", format!("unknown timezone '{}'", file.site.timezone)))?;

        match (file.site.latitude, file.site.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(ConfigError::invalid("site.latitude", "must be within -90..=90"));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(ConfigError::invalid("site.longitude", "must be within -180..=180"));
                }
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::invalid(
                    "site.latitude/site.longitude",
                    "must be set together",
                ));
            }
        }

        let site_params = SiteParameters {
            tilt_deg: file.site.tilt_deg,
            azimuth_deg: file.site.azimuth_deg,
            albedo: file.site.albedo,
            array_kw_dc: file.site.array_kw_dc,
            ac_capacity_kw: file.site.ac_capacity_kw,
            derate: file.site.derate,
            noct_c: file.site.noct_c,
            temp_coeff_per_c: file.site.temp_coeff_per_c,
        };
        validate_params("site", &site_params)?;

        let inverters = resolve_inverters(&file.inverters, &site_params)?;
        validate_daylight(&file.daylight)?;
        validate_health(&file.health)?;

        if file.alerts.consecutive_health_alerts == 0 {
            return Err(ConfigError::invalid("alerts.consecutive_health_alerts", "must be at least 1"));
        }
        if file.alerts.realert_every == Some(0) {
            return Err(ConfigError::invalid("alerts.realert_every", "must be at least 1"));
        }
        validate_durations(&file)?;
        if file.cloud.enabled {
            if file.cloud.site_id.is_none() {
                return Err(ConfigError::MissingField {
                    field: "cloud.site_id".to_string(),
                });
            }
            if file.cloud.api_key.is_none() {
                return Err(ConfigError::MissingField {
                    field: "cloud.api_key (or SOLAREDGE_API_KEY)".to_string(),
                });
            }
        }
        if file.pushover.enabled && (file.pushover.token.is_none() || file.pushover.user.is_none()) {
            return Err(ConfigError::MissingField {
                field: "pushover.token/pushover.user (or PUSHOVER_TOKEN/PUSHOVER_USER)".to_string(),
            });
        }
        if file.healthchecks.enabled && file.healthchecks.ping_url.is_none() {
            return Err(ConfigError::MissingField {
                field: "healthchecks.ping_url (or HEALTHCHECKS_PING_URL)".to_string(),
            });
        }
        for (name, scenario) in &file.simulation.scenarios {
            if !(0.0..1.0).contains(&scenario.jitter) {
                return Err(ConfigError::invalid(
                    format!("simulation.scenarios.{name}.jitter"),
                    "must be within 0..1",
                ));
            }
            if let Some(unknown) = scenario
                .inverters
                .keys()
                .find(|k| !inverters.iter().any(|i| &i.name == *k))
            {
                return Err(ConfigError::invalid(
                    format!("simulation.scenarios.{name}.inverters"),
                    format!("unknown inverter '{unknown}'"),
                ));
            }
        }

        Ok(Config {
            store: file.store,
            site: SiteConfig {
                timezone,
                latitude: file.site.latitude,
                longitude: file.site.longitude,
                params: site_params,
            },
            daylight: file.daylight,
            modbus: file.modbus,
            inverters,
            health: file.health,
            alerts: file.alerts,
            weather: file.weather,
            cloud: file.cloud,
            pushover: file.pushover,
            healthchecks: file.healthchecks,
            retention: file.retention,
            logging: file.logging,
            scenarios: file.simulation.scenarios,
        })
    }

    /// Commands that evaluate the fleet need at least one inverter.
    pub fn require_inverters(&self) -> Result<(), ConfigError> {
        if self.inverters.is_empty() {
            return Err(ConfigError::MissingField {
                field: "inverters".to_string(),
            });
        }
        Ok(())
    }
}

fn apply_env_overrides(file: &mut FileConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("STATE_DB_PATH") {
        file.store.db_path = PathBuf::from(v);
    }
    if let Some(v) = env("SOLAREDGE_API_KEY") {
        file.cloud.api_key = Some(v);
    }
    if let Some(v) = env("SOLAREDGE_SITE_ID") {
        file.cloud.site_id = Some(v);
    }
    if let Some(v) = env("PUSHOVER_TOKEN") {
        file.pushover.token = Some(v);
    }
    if let Some(v) = env("PUSHOVER_USER") {
        file.pushover.user = Some(v);
    }
    if let Some(v) = env("HEALTHCHECKS_PING_URL") {
        file.healthchecks.ping_url = Some(v);
    }
}

fn validate_params(scope: &str, p: &SiteParameters) -> Result<(), ConfigError> {
    if !(0.0..=90.0).contains(&p.tilt_deg) {
        return Err(ConfigError::invalid(format!("{scope}.tilt_deg"), "must be within 0..=90"));
    }
    if !(0.0..=360.0).contains(&p.azimuth_deg) {
        return Err(ConfigError::invalid(format!("{scope}.azimuth_deg"), "must be within 0..=360"));
    }
    if !(0.0..=1.0).contains(&p.albedo) {
        return Err(ConfigError::invalid(format!("{scope}.albedo"), "must be within 0..=1"));
    }
    if !(p.derate > 0.0 && p.derate <= 1.0) {
        return Err(ConfigError::invalid(format!("{scope}.derate"), "must be within (0, 1]"));
    }
    for (field, value) in [("array_kw_dc", p.array_kw_dc), ("ac_capacity_kw", p.ac_capacity_kw)] {
        if let Some(v) = value
            && !(v >= 0.0 && v.is_finite())
        {
            return Err(ConfigError::invalid(format!("{scope}.{field}"), "must be a non-negative number"));
        }
    }
    Ok(())
}

/// Every `*_secs` value ends up in `Duration::from_secs_f64`.
fn validate_durations(file: &FileConfig) -> Result<(), ConfigError> {
    let timeouts = [
        ("modbus.timeout_secs", file.modbus.timeout_secs),
        ("weather.timeout_secs", file.weather.timeout_secs),
        ("cloud.timeout_secs", file.cloud.timeout_secs),
        ("pushover.timeout_secs", file.pushover.timeout_secs),
        ("healthchecks.timeout_secs", file.healthchecks.timeout_secs),
    ];
    for (key, secs) in timeouts {
        if !(secs > 0.0 && secs.is_finite()) {
            return Err(ConfigError::invalid(key, "must be a positive number of seconds"));
        }
    }
    let delays = [
        ("modbus.retry_delay_secs", file.modbus.retry_delay_secs),
        ("cloud.retry_delay_secs", file.cloud.retry_delay_secs),
    ];
    for (key, secs) in delays {
        if !(secs >= 0.0 && secs.is_finite()) {
            return Err(ConfigError::invalid(key, "must be a non-negative number of seconds"));
        }
    }
    Ok(())
}

/// Resolve per-inverter parameters. Site-wide capacities are split evenly across the
/// inverters that do not set their own value, after subtracting the explicit ones.
fn resolve_inverters(files: &[InverterFile], site: &SiteParameters) -> Result<Vec<InverterConfig>, ConfigError> {
    let mut seen = BTreeSet::new();
    for inv in files {
        if inv.name.trim().is_empty() {
            return Err(ConfigError::invalid("inverters.name", "must not be empty"));
        }
        if !seen.insert(inv.name.as_str()) {
            return Err(ConfigError::invalid(
                "inverters.name",
                format!("duplicate inverter '{}'", inv.name),
            ));
        }
    }

    let array_shares = split_capacity("array_kw_dc", site.array_kw_dc, files.iter().map(|i| i.array_kw_dc))?;
    let ac_shares = split_capacity("ac_capacity_kw", site.ac_capacity_kw, files.iter().map(|i| i.ac_capacity_kw))?;

    files
        .iter()
        .zip(array_shares.into_iter().zip(ac_shares))
        .map(|(inv, (array_kw_dc, ac_capacity_kw))| {
            let params = SiteParameters {
                tilt_deg: inv.tilt_deg.unwrap_or(site.tilt_deg),
                azimuth_deg: inv.azimuth_deg.unwrap_or(site.azimuth_deg),
                albedo: inv.albedo.unwrap_or(site.albedo),
                array_kw_dc,
                ac_capacity_kw,
                derate: inv.derate.unwrap_or(site.derate),
                noct_c: inv.noct_c.unwrap_or(site.noct_c),
                temp_coeff_per_c: inv.temp_coeff_per_c.unwrap_or(site.temp_coeff_per_c),
            };
            validate_params(&format!("inverters.{}", inv.name), &params)?;
            Ok(InverterConfig {
                name: inv.name.clone(),
                host: inv.host.clone(),
                port: inv.port,
                unit: inv.unit,
                expected_optimizers: inv.expected_optimizers,
                params,
            })
        })
        .collect()
}

fn split_capacity(
    field: &str,
    site_total: Option<f64>,
    explicit: impl Iterator<Item = Option<f64>>,
) -> Result<Vec<Option<f64>>, ConfigError> {
    let explicit: Vec<Option<f64>> = explicit.collect();
    let Some(total) = site_total else {
        return Ok(explicit);
    };
    let assigned: f64 = explicit.iter().flatten().sum();
    let unassigned = explicit.iter().filter(|v| v.is_none()).count();
    if unassigned == 0 {
        return Ok(explicit);
    }
    let remaining = total - assigned;
    if remaining < 0.0 {
        return Err(ConfigError::invalid(
            format!("site.{field}"),
            format!("per-inverter values ({assigned}) exceed the site total ({total})"),
        ));
    }
    let share = remaining / unassigned as f64;
    Ok(explicit.into_iter().map(|v| Some(v.unwrap_or(share))).collect())
}

fn validate_daylight(d: &DaylightConfig) -> Result<(), ConfigError> {
    let graces = [
        ("daylight.sunrise_grace_minutes", d.sunrise_grace_minutes),
        ("daylight.sunset_grace_minutes", d.sunset_grace_minutes),
        ("daylight.cloud_sunrise_grace_minutes", d.cloud_sunrise_grace_minutes),
        ("daylight.cloud_sunset_grace_minutes", d.cloud_sunset_grace_minutes),
        ("daylight.summary_delay_minutes", d.summary_delay_minutes),
    ];
    for (field, minutes) in graces {
        if !(0..=720).contains(&minutes) {
            return Err(ConfigError::invalid(field, "must be within 0..=720 minutes"));
        }
    }
    if d.static_sunrise >= d.static_sunset {
        return Err(ConfigError::invalid("daylight.static_sunrise", "must be before static_sunset"));
    }
    Ok(())
}

fn validate_health(h: &HealthConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&h.pac_floor_pct) {
        return Err(ConfigError::invalid("health.pac_floor_pct", "must be within 0..=100"));
    }
    if !(h.peer_deviation_ratio > 0.0 && h.peer_deviation_ratio <= 1.0) {
        return Err(ConfigError::invalid("health.peer_deviation_ratio", "must be within (0, 1]"));
    }
    if h.peer_min_production_w < 0.0 {
        return Err(ConfigError::invalid("health.peer_min_production_w", "must not be negative"));
    }
    if !(0.0..1.0).contains(&h.expectation_tolerance) {
        return Err(ConfigError::invalid("health.expectation_tolerance", "must be within 0..1"));
    }
    if let Some(v) = h.low_vdc_v
        && v < 0.0
    {
        return Err(ConfigError::invalid("health.low_vdc_v", "must not be negative"));
    }
    Ok(())
}
