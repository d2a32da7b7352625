//! Phone battery model for local development.
//!
//! Models the level the app would report:
//! - Charges while the charger outlet is on, drains while it is off
//! - Charging slows down near full, like a real charge controller
//! - Per-report jitter on the rate and a little gauge noise

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Starting conditions selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Half empty and plugged in. Crosses a typical cutoff within a few
    /// reports.
    Charging,
    /// Fairly full, unplugged.
    Draining,
    /// Already at the top. The first report should trip the cutoff.
    Full,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "draining" => Self::Draining,
            "full" => Self::Full,
            _ => Self::Charging,
        }
    }

    fn start(self) -> (f64, bool) {
        match self {
            Self::Charging => (45.0, true),
            Self::Draining => (70.0, false),
            Self::Full => (99.0, true),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charging => write!(f, "charging"),
            Self::Draining => write!(f, "draining"),
            Self::Full => write!(f, "full"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct BatterySim {
    /// True charge level in percent.
    level: f64,
    charging: bool,
    /// Percent gained per report at low charge.
    charge_rate: f64,
    /// Percent lost per report while unplugged.
    drain_rate: f64,
    /// Gauge noise on the reported value.
    noise_sigma: f64,
}

impl BatterySim {
    pub fn new(scenario: Scenario) -> Self {
        let (level, charging) = scenario.start();
        Self {
            level,
            charging,
            charge_rate: 4.0,
            drain_rate: 1.5,
            noise_sigma: 0.2,
        }
    }

    /// Follow the charger outlet as last reported by the hub.
    pub fn set_charging(&mut self, charging: bool) {
        self.charging = charging;
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    /// Advance one report interval and return the level the phone would
    /// report, rounded to one decimal.
    pub fn sample(&mut self) -> f64 {
        let step = if self.charging {
            // Taper above 80%.
            let taper = if self.level > 80.0 {
                ((100.0 - self.level) / 20.0).max(0.1)
            } else {
                1.0
            };
            self.charge_rate * taper
        } else {
            -self.drain_rate
        };
        let jitter = gaussian(0.0, step.abs() * 0.1);
        self.level = (self.level + step + jitter).clamp(0.0, 100.0);

        let reading = (self.level + gaussian(0.0, self.noise_sigma)).clamp(0.0, 100.0);
        (reading * 10.0).round() / 10.0
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sim: &mut BatterySim, n: usize) -> Vec<f64> {
        (0..n).map(|_| sim.sample()).collect()
    }

    #[test]
    fn readings_stay_in_percent_range() {
        for scenario in [Scenario::Charging, Scenario::Draining, Scenario::Full] {
            let mut sim = BatterySim::new(scenario);
            for v in collect(&mut sim, 300) {
                assert!((0.0..=100.0).contains(&v), "{scenario}: out of range {v}");
            }
        }
    }

    #[test]
    fn readings_have_one_decimal() {
        let mut sim = BatterySim::new(Scenario::Charging);
        for v in collect(&mut sim, 50) {
            assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-6, "not one decimal: {v}");
        }
    }

    #[test]
    fn charging_raises_level() {
        let mut sim = BatterySim::new(Scenario::Charging);
        let first = sim.sample();
        let later = collect(&mut sim, 5).pop().unwrap();
        assert!(later > first, "charging should raise level: {first} -> {later}");
    }

    #[test]
    fn unplugging_drains() {
        let mut sim = BatterySim::new(Scenario::Charging);
        collect(&mut sim, 3);
        sim.set_charging(false);
        assert!(!sim.is_charging());

        let before = sim.sample();
        let after = collect(&mut sim, 10).pop().unwrap();
        assert!(after < before, "unplugged should drain: {before} -> {after}");
    }

    #[test]
    fn charging_tapers_near_full() {
        let mut sim = BatterySim::new(Scenario::Full);
        let v = collect(&mut sim, 20).pop().unwrap();
        assert!(v >= 95.0, "full battery should stay near the top: {v}");
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("charging"), Scenario::Charging);
        assert_eq!(Scenario::from_str_lossy("DRAINING"), Scenario::Draining);
        assert_eq!(Scenario::from_str_lossy("Full"), Scenario::Full);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Charging);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Charging);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Charging.to_string(), "charging");
        assert_eq!(Scenario::Draining.to_string(), "draining");
        assert_eq!(Scenario::Full.to_string(), "full");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
