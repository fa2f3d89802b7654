//! Per-inverter and peer health rules with their suppression gates.
//!
//! Every inverter gets exactly one [`Reason`]. Checks run in priority order
//! (insufficient data, vendor fault, low Vdc, low PAC, peer deviation); a failing
//! check whose gate fires is remembered and the next check runs. If no check
//! fails outright the verdict is `weather_suppressed` when something was gated,
//! `ok` otherwise.

use crate::config::{HealthConfig, InverterConfig};
use crate::models::health::{HealthVerdict, Reason, SuppressionGate, SystemHealth};
use crate::models::inverter::InverterReading;
use crate::models::weather::{Expectation, WeatherSample};
use crate::utils::median;
use log::debug;

pub struct InverterInput<'a> {
    pub inverter: &'a InverterConfig,
    /// The reading, or why there is none.
    pub reading: Result<&'a InverterReading, String>,
    pub expectation: &'a Expectation,
}

pub struct EvaluationContext<'a> {
    pub health: &'a HealthConfig,
    pub sun_elevation_deg: Option<f64>,
    pub weather: Option<&'a WeatherSample>,
    pub in_grace_window: bool,
}

pub fn evaluate(inputs: &[InverterInput<'_>], ctx: &EvaluationContext<'_>) -> SystemHealth {
    let usable_pac: Vec<Option<f64>> = inputs.iter().map(usable_pac).collect();

    let verdicts = inputs
        .iter()
        .enumerate()
        .map(|(idx, input)| {
            let peers: Vec<f64> = usable_pac
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != idx)
                .filter_map(|(_, pac)| *pac)
                .collect();
            let verdict = evaluate_inverter(input, &peers, ctx);
            debug!(
                "[{}] verdict={} ok={} detail={}",
                verdict.inverter,
                verdict.reason,
                verdict.inverter_ok,
                verdict.detail.as_deref().unwrap_or("-")
            );
            verdict
        })
        .collect();

    SystemHealth::from_verdicts(verdicts)
}

/// PAC of an inverter whose reading can take part in peer comparison.
fn usable_pac(input: &InverterInput<'_>) -> Option<f64> {
    let reading = input.reading.as_ref().ok()?;
    reading.check_integrity().ok()?;
    reading.pac_w
}

fn evaluate_inverter(input: &InverterInput<'_>, peers: &[f64], ctx: &EvaluationContext<'_>) -> HealthVerdict {
    let name = input.inverter.name.as_str();
    let cfg = ctx.health;

    let reading = match &input.reading {
        Ok(r) => *r,
        Err(why) => return HealthVerdict::new(name, Reason::InsufficientData, Some(why.clone()), None),
    };
    let owned = Some(reading.clone());

    if let Err(e) = reading.check_integrity() {
        return HealthVerdict::new(name, Reason::InsufficientData, Some(format!("malformed reading: {e}")), owned);
    }
    let Some(pac_w) = reading.pac_w else {
        return HealthVerdict::new(name, Reason::InsufficientData, Some("no AC power reported".to_string()), owned);
    };
    if cfg.low_vdc_v.is_some() && reading.vdc_v.is_none() {
        return HealthVerdict::new(name, Reason::InsufficientData, Some("no DC voltage reported".to_string()), owned);
    }

    let status_fault = reading.status.is_some_and(|s| cfg.fault_status_codes.contains(&s));
    let vendor_fault = reading.vendor_status.is_some_and(|s| cfg.fault_vendor_codes.contains(&s));
    if status_fault || vendor_fault {
        let detail = format!(
            "fault state (status={} vendor_status={})",
            reading.status_label(),
            reading.vendor_status.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        );
        return HealthVerdict::new(name, Reason::VendorFault, Some(detail), owned);
    }

    let low_pac_floor_w = input.inverter.params.ac_capacity_w().map(|cap| cap * cfg.pac_floor_pct / 100.0);
    let mut suppressed: Option<(SuppressionGate, String)> = None;

    if let (Some(floor), Some(vdc)) = (cfg.low_vdc_v, reading.vdc_v)
        && vdc < floor
    {
        let detail = format!("Vdc={vdc:.1} V below {floor:.1} V floor");
        match weather_gate(pac_w, low_pac_floor_w, input.expectation, ctx) {
            Some(gate) => suppressed = suppressed.or(Some((gate, detail))),
            None => return HealthVerdict::new(name, Reason::LowVdc, Some(detail), owned),
        }
    }

    if let Some(floor) = low_pac_floor_w
        && pac_w < floor
    {
        let detail = format!("PAC={pac_w:.1} W below {floor:.1} W floor");
        let gate = sun_gate(ctx)
            .or_else(|| weather_gate(pac_w, low_pac_floor_w, input.expectation, ctx))
            .or_else(|| grace_gate(ctx));
        match gate {
            Some(gate) => suppressed = suppressed.or(Some((gate, detail))),
            None => return HealthVerdict::new(name, Reason::LowPac, Some(detail), owned),
        }
    }

    // Needs at least two other inverters reporting in this same run.
    if peers.len() >= 2
        && let Some(peer_median) = median(peers)
        && peer_median > 0.0
        && peer_median >= cfg.peer_min_production_w
    {
        let deviation = (peer_median - pac_w) / peer_median;
        if deviation >= cfg.peer_deviation_ratio {
            let detail = format!(
                "PAC={pac_w:.1} W is {:.0}% below peer median {peer_median:.1} W",
                deviation * 100.0
            );
            match sun_gate(ctx).or_else(|| grace_gate(ctx)) {
                Some(gate) => suppressed = suppressed.or(Some((gate, detail))),
                None => return HealthVerdict::new(name, Reason::PeerDeviation, Some(detail), owned),
            }
        }
    }

    match suppressed {
        Some((gate, detail)) => HealthVerdict::suppressed(name, gate, detail, owned),
        None => HealthVerdict::new(name, Reason::Ok, None, owned),
    }
}

/// Low sun: output near zero is expected at dawn and dusk.
fn sun_gate(ctx: &EvaluationContext<'_>) -> Option<SuppressionGate> {
    let (Some(min_el), Some(el)) = (ctx.health.min_alert_sun_el_deg, ctx.sun_elevation_deg) else {
        return None;
    };
    (el < min_el).then_some(SuppressionGate::SunElevation)
}

fn grace_gate(ctx: &EvaluationContext<'_>) -> Option<SuppressionGate> {
    (ctx.in_grace_window && ctx.health.suppress_in_grace).then_some(SuppressionGate::TwilightGrace)
}

/// The inverter is producing little because there is little to produce.
fn weather_gate(
    pac_w: f64,
    low_pac_floor_w: Option<f64>,
    expectation: &Expectation,
    ctx: &EvaluationContext<'_>,
) -> Option<SuppressionGate> {
    let irradiance = expectation.poa_wm2().or_else(|| ctx.weather.and_then(|w| w.ghi_wm2));
    if let (Some(floor), Some(irr)) = (ctx.health.min_alert_irradiance_wm2, irradiance)
        && irr < floor
    {
        return Some(SuppressionGate::LowIrradiance);
    }

    if ctx.weather.is_some_and(|w| w.is_fully_overcast() && w.is_precipitating()) {
        return Some(SuppressionGate::OvercastPrecipitation);
    }

    let expected_w = expectation.expected_ac_w()?;
    if pac_w >= expected_w * (1.0 - ctx.health.expectation_tolerance) {
        return Some(SuppressionGate::WithinExpectation);
    }
    if low_pac_floor_w.is_some_and(|floor| expected_w < floor) {
        return Some(SuppressionGate::LowExpectation);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteParameters;
    use crate::models::inverter::status;
    use crate::models::weather::{UnavailableCause, WeatherExpectation};
    use chrono::{TimeZone, Utc};

    fn inverter(name: &str) -> InverterConfig {
        InverterConfig {
            name: name.to_string(),
            host: String::new(),
            port: 1502,
            unit: 1,
            expected_optimizers: None,
            params: SiteParameters {
                tilt_deg: 30.0,
                azimuth_deg: 180.0,
                albedo: 0.2,
                array_kw_dc: Some(6.0),
                ac_capacity_kw: Some(5.0),
                derate: 0.96,
                noct_c: 45.0,
                temp_coeff_per_c: -0.004,
            },
        }
    }

    fn reading(name: &str, pac_w: f64) -> InverterReading {
        InverterReading {
            name: name.to_string(),
            serial: format!("SN-{name}"),
            model: None,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
            pac_w: Some(pac_w),
            vdc_v: Some(380.0),
            idc_a: Some(pac_w / 380.0),
            total_wh: Some(1_000_000.0),
            status: Some(status::PRODUCING),
            vendor_status: Some(0),
        }
    }

    fn expected(ac_kw: f64, poa: f64) -> Expectation {
        Expectation::Available(WeatherExpectation {
            expected_dc_kw: ac_kw / 0.96,
            expected_ac_kw: ac_kw,
            poa_wm2: poa,
            cos_incidence: 0.9,
            module_temp_c_est: 35.0,
            temp_factor: 0.96,
        })
    }

    const NO_WEATHER: Expectation = Expectation::Unavailable {
        cause: UnavailableCause::NoWeatherSample,
    };

    struct Fleet {
        configs: Vec<InverterConfig>,
        readings: Vec<Option<InverterReading>>,
        expectations: Vec<Expectation>,
    }

    impl Fleet {
        fn new(pacs: &[(&str, Option<f64>)]) -> Self {
            Fleet {
                configs: pacs.iter().map(|(n, _)| inverter(n)).collect(),
                readings: pacs.iter().map(|(n, p)| p.map(|p| reading(n, p))).collect(),
                expectations: pacs.iter().map(|_| NO_WEATHER).collect(),
            }
        }

        fn run(&self, ctx: &EvaluationContext<'_>) -> SystemHealth {
            let inputs: Vec<InverterInput<'_>> = self
                .configs
                .iter()
                .zip(&self.readings)
                .zip(&self.expectations)
                .map(|((inverter, reading), expectation)| InverterInput {
                    inverter,
                    reading: reading.as_ref().ok_or_else(|| "modbus: timed out".to_string()),
                    expectation,
                })
                .collect();
            evaluate(&inputs, ctx)
        }
    }

    fn ctx<'a>(health: &'a HealthConfig, sun_el: Option<f64>) -> EvaluationContext<'a> {
        EvaluationContext {
            health,
            sun_elevation_deg: sun_el,
            weather: None,
            in_grace_window: false,
        }
    }

    fn reason(h: &SystemHealth, name: &str) -> Reason {
        h.verdict(name).map(|v| v.reason).expect("verdict present")
    }

    #[test]
    fn healthy_fleet_is_ok() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(2500.0)), ("B", Some(2400.0)), ("C", Some(2600.0))]);
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        assert!(h.system_ok);
        assert!(h.verdicts.iter().all(|v| v.reason == Reason::Ok));
    }

    #[test]
    fn zero_output_flags_low_pac_in_daylight() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(1500.0)), ("B", Some(0.0)), ("C", Some(1400.0))]);
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "B"), Reason::LowPac);
        assert!(!h.system_ok);
    }

    #[test]
    fn zero_output_with_low_sun_never_yields_low_pac() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(0.0)), ("B", Some(0.0)), ("C", Some(0.0))]);
        for el in [-10.0, 0.0, 2.0, 4.99] {
            let h = fleet.run(&ctx(&cfg, Some(el)));
            for v in &h.verdicts {
                assert_ne!(v.reason, Reason::LowPac, "elevation {el}");
                assert_eq!(v.reason, Reason::WeatherSuppressed);
                assert_eq!(v.suppressed_by, Some(SuppressionGate::SunElevation));
            }
            assert!(h.system_ok);
        }
    }

    #[test]
    fn missing_reading_is_insufficient_data() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(2500.0)), ("B", None)]);
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        let b = h.verdict("B").unwrap();
        assert_eq!(b.reason, Reason::InsufficientData);
        assert!(!b.inverter_ok);
        assert_eq!(b.detail.as_deref(), Some("modbus: timed out"));
    }

    #[test]
    fn malformed_or_partial_reading_is_insufficient_data() {
        let cfg = HealthConfig {
            low_vdc_v: Some(200.0),
            ..HealthConfig::default()
        };
        let mut fleet = Fleet::new(&[("A", Some(2500.0)), ("B", Some(2500.0)), ("C", Some(2500.0))]);
        fleet.readings[0].as_mut().unwrap().pac_w = Some(f64::INFINITY);
        fleet.readings[1].as_mut().unwrap().vdc_v = None;
        fleet.readings[2].as_mut().unwrap().pac_w = None;
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        assert!(h.verdicts.iter().all(|v| v.reason == Reason::InsufficientData));
    }

    #[test]
    fn fault_status_outranks_low_output() {
        let cfg = HealthConfig {
            fault_vendor_codes: vec![0x12],
            ..HealthConfig::default()
        };
        let mut fleet = Fleet::new(&[("A", Some(0.0)), ("B", Some(0.0)), ("C", Some(2000.0))]);
        fleet.readings[0].as_mut().unwrap().status = Some(status::FAULT);
        fleet.readings[1].as_mut().unwrap().vendor_status = Some(0x12);
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "A"), Reason::VendorFault);
        assert_eq!(reason(&h, "B"), Reason::VendorFault);
        assert_eq!(reason(&h, "C"), Reason::Ok);
    }

    #[test]
    fn low_vdc_outranks_low_pac() {
        let cfg = HealthConfig {
            low_vdc_v: Some(250.0),
            ..HealthConfig::default()
        };
        let mut fleet = Fleet::new(&[("A", Some(0.0))]);
        fleet.readings[0].as_mut().unwrap().vdc_v = Some(120.0);
        let h = fleet.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "A"), Reason::LowVdc);
    }

    #[test]
    fn peer_deviation_requires_two_peers() {
        let cfg = HealthConfig {
            pac_floor_pct: 0.0,
            ..HealthConfig::default()
        };
        // one peer only: never peer_deviation
        let pair = Fleet::new(&[("A", Some(3000.0)), ("B", Some(100.0))]);
        let h = pair.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "B"), Reason::Ok);

        // second peer offline: still only one reporting peer
        let with_offline = Fleet::new(&[("A", Some(3000.0)), ("B", Some(100.0)), ("C", None)]);
        let h = with_offline.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "B"), Reason::Ok);
        assert_eq!(reason(&h, "C"), Reason::InsufficientData);

        let trio = Fleet::new(&[("A", Some(3000.0)), ("B", Some(100.0)), ("C", Some(2900.0))]);
        let h = trio.run(&ctx(&cfg, Some(45.0)));
        assert_eq!(reason(&h, "B"), Reason::PeerDeviation);
        assert_eq!(reason(&h, "A"), Reason::Ok);
    }

    #[test]
    fn peer_threshold_is_inclusive() {
        let cfg = HealthConfig {
            pac_floor_pct: 0.0,
            peer_deviation_ratio: 0.5,
            ..HealthConfig::default()
        };
        let at_boundary = Fleet::new(&[("A", Some(2000.0)), ("B", Some(1000.0)), ("C", Some(2000.0))]);
        assert_eq!(reason(&at_boundary.run(&ctx(&cfg, Some(45.0))), "B"), Reason::PeerDeviation);

        let just_inside = Fleet::new(&[("A", Some(2000.0)), ("B", Some(1001.0)), ("C", Some(2000.0))]);
        assert_eq!(reason(&just_inside.run(&ctx(&cfg, Some(45.0))), "B"), Reason::Ok);
    }

    #[test]
    fn peer_check_skipped_at_low_fleet_production() {
        let cfg = HealthConfig {
            pac_floor_pct: 0.0,
            peer_min_production_w: 100.0,
            ..HealthConfig::default()
        };
        let fleet = Fleet::new(&[("A", Some(80.0)), ("B", Some(5.0)), ("C", Some(90.0))]);
        assert_eq!(reason(&fleet.run(&ctx(&cfg, Some(45.0))), "B"), Reason::Ok);
    }

    #[test]
    fn output_within_expectation_is_suppressed() {
        let cfg = HealthConfig::default();
        let mut fleet = Fleet::new(&[("A", Some(40.0))]);
        // dark overcast day: 45 W expected, 40 W is within 30 %
        fleet.expectations[0] = expected(0.045, 60.0);
        let h = fleet.run(&ctx(&cfg, Some(30.0)));
        let a = h.verdict("A").unwrap();
        assert_eq!(a.reason, Reason::WeatherSuppressed);
        assert_eq!(a.suppressed_by, Some(SuppressionGate::WithinExpectation));
        assert!(a.inverter_ok);
    }

    #[test]
    fn low_irradiance_suppresses_low_pac() {
        let cfg = HealthConfig::default();
        let mut fleet = Fleet::new(&[("A", Some(0.0))]);
        fleet.expectations[0] = expected(0.02, 20.0);
        let h = fleet.run(&ctx(&cfg, Some(30.0)));
        assert_eq!(h.verdicts[0].suppressed_by, Some(SuppressionGate::LowIrradiance));
    }

    #[test]
    fn overcast_rain_suppresses_low_pac() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(0.0))]);
        let weather = WeatherSample {
            ghi_wm2: Some(120.0),
            cloud_cover_pct: Some(100.0),
            weather_code: Some(63),
            ..WeatherSample::default()
        };
        let c = EvaluationContext {
            weather: Some(&weather),
            ..ctx(&cfg, Some(30.0))
        };
        assert_eq!(fleet.run(&c).verdicts[0].suppressed_by, Some(SuppressionGate::OvercastPrecipitation));

        let drizzle_free = WeatherSample {
            weather_code: Some(3),
            ..weather.clone()
        };
        let c = EvaluationContext {
            weather: Some(&drizzle_free),
            ..ctx(&cfg, Some(30.0))
        };
        assert_eq!(fleet.run(&c).verdicts[0].reason, Reason::LowPac);
    }

    #[test]
    fn broken_inverter_on_sunny_day_is_not_suppressed() {
        let cfg = HealthConfig::default();
        let mut fleet = Fleet::new(&[("A", Some(10.0))]);
        fleet.expectations[0] = expected(4.2, 900.0);
        assert_eq!(fleet.run(&ctx(&cfg, Some(50.0))).verdicts[0].reason, Reason::LowPac);
    }

    #[test]
    fn weather_gate_suppresses_low_vdc() {
        let cfg = HealthConfig {
            low_vdc_v: Some(250.0),
            ..HealthConfig::default()
        };
        let mut fleet = Fleet::new(&[("A", Some(0.0))]);
        fleet.readings[0].as_mut().unwrap().vdc_v = Some(0.0);
        fleet.expectations[0] = expected(0.01, 10.0);
        let h = fleet.run(&ctx(&cfg, Some(30.0)));
        assert_eq!(reason(&h, "A"), Reason::WeatherSuppressed);

        fleet.expectations[0] = NO_WEATHER;
        let h = fleet.run(&ctx(&cfg, Some(30.0)));
        assert_eq!(reason(&h, "A"), Reason::LowVdc);
    }

    #[test]
    fn twilight_grace_suppresses_low_pac_and_peers() {
        let cfg = HealthConfig::default();
        let fleet = Fleet::new(&[("A", Some(900.0)), ("B", Some(0.0)), ("C", Some(1000.0))]);
        let c = EvaluationContext {
            in_grace_window: true,
            ..ctx(&cfg, None)
        };
        let h = fleet.run(&c);
        assert_eq!(reason(&h, "B"), Reason::WeatherSuppressed);
        assert_eq!(h.verdict("B").unwrap().suppressed_by, Some(SuppressionGate::TwilightGrace));

        let strict = HealthConfig {
            suppress_in_grace: false,
            ..HealthConfig::default()
        };
        let c = EvaluationContext {
            in_grace_window: true,
            ..ctx(&strict, None)
        };
        assert_eq!(reason(&fleet.run(&c), "B"), Reason::LowPac);
    }

    #[test]
    fn unknown_capacity_skips_low_pac() {
        let cfg = HealthConfig::default();
        let mut fleet = Fleet::new(&[("A", Some(0.0))]);
        fleet.configs[0].params.ac_capacity_kw = None;
        assert_eq!(fleet.run(&ctx(&cfg, Some(45.0))).verdicts[0].reason, Reason::Ok);
    }
}
