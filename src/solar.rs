//! Sun position and sunrise/sunset via the NREL solar position algorithm (`spa_sra`).

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use spa_sra::errors::SpaError;
use spa_sra::spa::{Function, Input, SpaData};

/// Standard atmosphere for the refraction correction.
const PRESSURE_MBAR: f64 = 1013.0;
const TEMPERATURE_C: f64 = 10.0;

/// Apparent elevation of the sun's upper limb at sunrise.
const HORIZON_DEG: f64 = -0.8333;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    pub elevation_deg: f64,
    /// Degrees clockwise from north.
    pub azimuth_deg: f64,
}

fn input_at<Tz: TimeZone>(at: DateTime<Tz>, latitude_deg: f64, longitude_deg: f64, function: Function) -> Input<Tz> {
    let mut input = Input::from_date_time(at);
    input.latitude = latitude_deg;
    input.longitude = longitude_deg;
    input.pressure = PRESSURE_MBAR;
    input.temperature = TEMPERATURE_C;
    input.function = function;
    input
}

pub fn solar_position(at: DateTime<Utc>, latitude_deg: f64, longitude_deg: f64) -> Result<SolarPosition, SpaError> {
    let mut spa = SpaData::new(input_at(at, latitude_deg, longitude_deg, Function::SpaZa));
    spa.spa_calculate()?;
    Ok(SolarPosition {
        elevation_deg: spa.spa_za.e,
        azimuth_deg: spa.spa_za.azimuth,
    })
}

/// Sunrise and sunset in UTC for a calendar date at the given location. `offset`
/// is the site's UTC offset on that date and decides which civil day is meant.
///
/// During polar night both collapse to solar noon; during polar day they span
/// the whole 24 hours around solar noon.
pub fn sunrise_sunset(
    date: NaiveDate,
    offset: FixedOffset,
    latitude_deg: f64,
    longitude_deg: f64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), SpaError> {
    let noon_utc = date.and_time(NaiveTime::MIN) + Duration::hours(12) - Duration::seconds(offset.local_minus_utc() as i64);
    let local_noon = offset.from_utc_datetime(&noon_utc);
    let mut spa = SpaData::new(input_at(local_noon, latitude_deg, longitude_deg, Function::SpaZaRts));
    spa.spa_calculate()?;

    let rts = &spa.spa_za_rts;
    if rts.sunrise >= 0.0 && rts.sunset >= 0.0 && rts.sunrise < rts.sunset {
        return Ok((spa.get_sunrise().with_timezone(&Utc), spa.get_sunset().with_timezone(&Utc)));
    }

    // No rise or set on this date: decide from the sun at solar noon.
    let solar_noon = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
        + Duration::minutes((720.0 - 4.0 * longitude_deg).round() as i64);
    let noon = solar_position(solar_noon, latitude_deg, longitude_deg)?;
    if noon.elevation_deg > HORIZON_DEG {
        Ok((solar_noon - Duration::hours(12), solar_noon + Duration::hours(12)))
    } else {
        Ok((solar_noon, solar_noon))
    }
}
