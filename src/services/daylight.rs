//! Decides, from the clock alone, what a run should do: poll devices, call the
//! cloud, suppress twilight artifacts, close out the production day.

use crate::config::{DaylightConfig, SiteConfig};
use crate::solar;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreDawn,
    Day,
    Dusk,
    Night,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaylightInfo {
    /// Calendar date in the site timezone.
    pub local_date: NaiveDate,
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub phase: Phase,
    pub is_daylight: bool,
    pub in_grace_window: bool,
    pub skip_modbus: bool,
    pub skip_cloud: bool,
    pub production_day_over: bool,
    pub from_coordinates: bool,
}

pub fn evaluate(now: DateTime<Utc>, site: &SiteConfig, cfg: &DaylightConfig) -> DaylightInfo {
    let local_date = now.with_timezone(&site.timezone).date_naive();

    let computed = site.coordinates().and_then(|(lat, lon)| {
        let offset = now.with_timezone(&site.timezone).offset().fix();
        solar::sunrise_sunset(local_date, offset, lat, lon)
            .map_err(|e| warn!("Sun times unavailable, using static window: {}", e))
            .ok()
    });
    let (sunrise, sunset, from_coordinates) = match computed {
        Some((rise, set)) => (rise, set, true),
        None => (
            local_to_utc(site.timezone, local_date, cfg.static_sunrise),
            local_to_utc(site.timezone, local_date, cfg.static_sunset),
            false,
        ),
    };

    let window_start = sunrise - Duration::minutes(cfg.sunrise_grace_minutes);
    let window_end = sunset + Duration::minutes(cfg.sunset_grace_minutes);
    let cloud_start = sunrise - Duration::minutes(cfg.cloud_sunrise_grace_minutes);
    let cloud_end = sunset + Duration::minutes(cfg.cloud_sunset_grace_minutes);

    let phase = if now >= sunrise && now < sunset {
        Phase::Day
    } else if now >= window_start && now < sunrise {
        Phase::PreDawn
    } else if now >= sunset && now <= window_end {
        Phase::Dusk
    } else {
        Phase::Night
    };

    let in_device_window = now >= window_start && now <= window_end;
    let in_cloud_window = now >= cloud_start && now <= cloud_end;
    let day_over_at = window_end + Duration::minutes(cfg.summary_delay_minutes);

    DaylightInfo {
        local_date,
        sunrise,
        sunset,
        window_start,
        window_end,
        phase,
        is_daylight: phase == Phase::Day,
        in_grace_window: matches!(phase, Phase::PreDawn | Phase::Dusk),
        skip_modbus: cfg.skip_modbus_at_night && !in_device_window,
        skip_cloud: cfg.skip_cloud_at_night && !in_cloud_window,
        production_day_over: now >= day_over_at,
        from_coordinates,
    }
}

/// Local wall-clock time to UTC. Ambiguous times pick the earlier instant; times
/// inside a DST gap are read as if the clocks had not moved yet.
fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            let shifted = naive - Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc) + Duration::hours(1))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}
