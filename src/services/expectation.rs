//! Expected inverter output from the current weather and the array's geometry.

use crate::config::SiteParameters;
use crate::models::weather::{Expectation, UnavailableCause, WeatherExpectation, WeatherSample};

/// Cell temperature at which nameplate power is rated.
const STC_CELL_TEMP_C: f64 = 25.0;
/// NOCT is measured at 800 W/m² and 20 °C ambient.
const NOCT_IRRADIANCE_WM2: f64 = 800.0;
const NOCT_AMBIENT_C: f64 = 20.0;

pub fn expected_output(sample: Option<&WeatherSample>, params: &SiteParameters) -> Expectation {
    let Some(sample) = sample else {
        return Expectation::unavailable(UnavailableCause::NoWeatherSample);
    };
    let Some(sun_el) = sample.sun_elevation_deg else {
        return Expectation::unavailable(UnavailableCause::MissingSunPosition);
    };

    let (poa_wm2, cos_incidence) = if sun_el <= 0.0 {
        (0.0, 0.0)
    } else {
        let Some(sun_az) = sample.sun_azimuth_deg else {
            return Expectation::unavailable(UnavailableCause::MissingSunPosition);
        };
        let (Some(ghi), Some(diffuse)) = (sample.ghi_wm2, sample.diffuse_wm2) else {
            return Expectation::unavailable(UnavailableCause::MissingIrradiance);
        };
        let dni = sample.dni_wm2.unwrap_or(0.0);
        plane_of_array(sun_el, sun_az, ghi, dni, diffuse, params)
    };

    let Some(ambient_c) = sample.temp_c else {
        return Expectation::unavailable(UnavailableCause::MissingTemperature);
    };
    let Some(array_kw_dc) = params.array_kw_dc else {
        return Expectation::unavailable(UnavailableCause::MissingArrayCapacity);
    };

    let module_temp_c_est = ambient_c + (params.noct_c - NOCT_AMBIENT_C) / NOCT_IRRADIANCE_WM2 * poa_wm2;
    // Linear and unclamped: cold modules may exceed 1.0, very hot ones drop below 0.75.
    let temp_factor = 1.0 + params.temp_coeff_per_c * (module_temp_c_est - STC_CELL_TEMP_C);
    let expected_dc_kw = array_kw_dc * (poa_wm2 / 1000.0) * temp_factor;

    let mut expected_ac_kw = expected_dc_kw * params.derate;
    if let Some(cap) = params.ac_capacity_kw {
        expected_ac_kw = expected_ac_kw.min(cap);
    }

    Expectation::Available(WeatherExpectation {
        expected_dc_kw,
        expected_ac_kw: expected_ac_kw.max(0.0),
        poa_wm2,
        cos_incidence,
        module_temp_c_est,
        temp_factor,
    })
}

/// Beam on the tilted plane plus isotropic sky diffuse plus ground reflection.
fn plane_of_array(sun_el: f64, sun_az: f64, ghi: f64, dni: f64, diffuse: f64, params: &SiteParameters) -> (f64, f64) {
    let alt = sun_el.to_radians();
    let tilt = params.tilt_deg.to_radians();
    let az_diff = (sun_az - params.azimuth_deg).to_radians();

    let cos_inc = (alt.sin() * tilt.cos() + alt.cos() * tilt.sin() * az_diff.cos()).max(0.0);

    let beam = dni * cos_inc;
    let sky = diffuse * (1.0 + tilt.cos()) / 2.0;
    let ground = ghi * params.albedo * (1.0 - tilt.cos()) / 2.0;
    ((beam + sky + ground).max(0.0), cos_inc)
}
