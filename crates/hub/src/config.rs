//! TOML config file loading, validation, and database seeding for the strip
//! layout and per-outlet policy defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::db::Db;
use crate::dispatcher::StripLayout;
use crate::policy::TimeOfDay;
use crate::store::OutletId;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub strip: StripSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub outlets: Vec<OutletEntry>,
}

#[derive(Debug, Deserialize)]
pub struct StripSection {
    #[serde(default = "default_outlet_count")]
    pub outlet_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_battery_outlet")]
    pub battery_outlet: i64,
    #[serde(default = "default_timer_outlet")]
    pub timer_outlet: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutletEntry {
    pub outlet_id: i64,
    #[serde(default)]
    pub name: String,
    pub stop_charging_percent: Option<i64>,
    /// `HH:MM` or `HH-MM`.
    pub timer_on: Option<String>,
    pub timer_off: Option<String>,
}

fn default_outlet_count() -> i64 {
    4
}

fn default_battery_outlet() -> i64 {
    1
}

fn default_timer_outlet() -> i64 {
    2
}

impl Default for StripSection {
    fn default() -> Self {
        Self {
            outlet_count: default_outlet_count(),
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            battery_outlet: default_battery_outlet(),
            timer_outlet: default_timer_outlet(),
        }
    }
}

/// Largest relay board supported.
const MAX_OUTLETS: i64 = 16;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_strip(&mut errors);
        self.validate_outlets(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn in_range(&self, outlet_id: i64) -> bool {
        (1..=self.strip.outlet_count).contains(&outlet_id)
    }

    fn validate_strip(&self, errors: &mut Vec<String>) {
        let count = self.strip.outlet_count;
        if !(1..=MAX_OUTLETS).contains(&count) {
            errors.push(format!(
                "strip: outlet_count {count} out of range [1, {MAX_OUTLETS}]"
            ));
            return;
        }

        if !self.in_range(self.policy.battery_outlet) {
            errors.push(format!(
                "policy: battery_outlet {} is not an outlet on this strip (1-{count})",
                self.policy.battery_outlet
            ));
        }
        if !self.in_range(self.policy.timer_outlet) {
            errors.push(format!(
                "policy: timer_outlet {} is not an outlet on this strip (1-{count})",
                self.policy.timer_outlet
            ));
        }
    }

    fn validate_outlets(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for (i, o) in self.outlets.iter().enumerate() {
            let ctx = || format!("outlets[{i}] (outlet {})", o.outlet_id);

            // ── Identity ────────────────────────────────────────
            if !self.in_range(o.outlet_id) {
                errors.push(format!(
                    "{}: outlet_id out of range [1, {}]",
                    ctx(),
                    self.strip.outlet_count
                ));
            } else if !seen_ids.insert(o.outlet_id) {
                errors.push(format!("{}: duplicate outlet_id", ctx()));
            }

            // ── Battery cutoff ──────────────────────────────────
            if let Some(p) = o.stop_charging_percent {
                if !(0..=100).contains(&p) {
                    errors.push(format!(
                        "{}: stop_charging_percent {p} out of range [0, 100]",
                        ctx()
                    ));
                }
                if o.outlet_id != self.policy.battery_outlet {
                    errors.push(format!(
                        "{}: stop_charging_percent set but battery_outlet is {}",
                        ctx(),
                        self.policy.battery_outlet
                    ));
                }
            }

            // ── Timer window ────────────────────────────────────
            let on = parse_time_field(&o.timer_on, "timer_on", &ctx, errors);
            let off = parse_time_field(&o.timer_off, "timer_off", &ctx, errors);
            if (o.timer_on.is_some() || o.timer_off.is_some())
                && o.outlet_id != self.policy.timer_outlet
            {
                errors.push(format!(
                    "{}: timer set but timer_outlet is {}",
                    ctx(),
                    self.policy.timer_outlet
                ));
            }
            if let (Some(on), Some(off)) = (on, off) {
                if off <= on {
                    errors.push(format!(
                        "{}: timer_off ({off}) must be after timer_on ({on}); windows cannot cross midnight",
                        ctx()
                    ));
                }
            }
        }
    }

    /// Strip layout for the dispatcher. Only meaningful after `validate`.
    pub fn layout(&self) -> StripLayout {
        StripLayout {
            outlet_count: self.strip.outlet_count as u8,
            battery_outlet: self.policy.battery_outlet as OutletId,
            timer_outlet: self.policy.timer_outlet as OutletId,
        }
    }

    fn entry(&self, outlet_id: OutletId) -> Option<&OutletEntry> {
        self.outlets
            .iter()
            .find(|o| o.outlet_id == i64::from(outlet_id))
    }
}

fn parse_time_field(
    value: &Option<String>,
    name: &str,
    ctx: &dyn Fn() -> String,
    errors: &mut Vec<String>,
) -> Option<TimeOfDay> {
    let raw = value.as_deref()?;
    match TimeOfDay::parse_lenient(raw) {
        Ok(t) => Some(t),
        Err(e) => {
            errors.push(format!("{}: {name}: {e}", ctx()));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Make sure every outlet has a row, then seed policy defaults the store
/// does not have yet.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    let layout = config.layout();
    for outlet_id in layout.outlets() {
        let entry = config.entry(outlet_id);
        let name = entry
            .map(|e| e.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Outlet {outlet_id}"));

        db.upsert_outlet(outlet_id, &name)
            .await
            .with_context(|| format!("failed to upsert outlet {outlet_id}"))?;

        if let Some(e) = entry {
            let percent = e.stop_charging_percent.map(|p| p as u8);
            let on = e
                .timer_on
                .as_deref()
                .and_then(|s| TimeOfDay::parse_lenient(s).ok());
            let off = e
                .timer_off
                .as_deref()
                .and_then(|s| TimeOfDay::parse_lenient(s).ok());
            db.seed_policy(outlet_id, percent, on, off)
                .await
                .with_context(|| format!("failed to seed policy for outlet {outlet_id}"))?;
        }
    }

    tracing::info!(
        outlets = layout.outlet_count,
        battery_outlet = layout.battery_outlet,
        timer_outlet = layout.timer_outlet,
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{OutletField, OutletStore};

    // -- Helper: build a valid baseline config that passes validation ------

    fn charger() -> OutletEntry {
        OutletEntry {
            outlet_id: 1,
            name: "Phone charger".into(),
            stop_charging_percent: Some(80),
            timer_on: None,
            timer_off: None,
        }
    }

    fn lamp() -> OutletEntry {
        OutletEntry {
            outlet_id: 2,
            name: "Lamp".into(),
            stop_charging_percent: None,
            timer_on: Some("08:00".into()),
            timer_off: Some("20-00".into()),
        }
    }

    fn valid_config() -> Config {
        Config {
            strip: StripSection::default(),
            policy: PolicySection::default(),
            outlets: vec![charger(), lamp()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[strip]
outlet_count = 4

[policy]
battery_outlet = 1
timer_outlet = 2

[[outlets]]
outlet_id = 1
name = "Phone charger"
stop_charging_percent = 80

[[outlets]]
outlet_id = 2
name = "Lamp"
timer_on = "08:00"
timer_off = "20:00"

[[outlets]]
outlet_id = 3
name = "Fan"
"#;
        let config = parse(toml_str).unwrap();
        assert_eq!(config.outlets.len(), 3);
        assert_eq!(config.outlets[0].stop_charging_percent, Some(80));
        assert_eq!(config.outlets[1].timer_on.as_deref(), Some("08:00"));
        assert_eq!(config.layout(), StripLayout::default());
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert!(config.outlets.is_empty());
        assert_eq!(config.layout(), StripLayout::default());
    }

    #[test]
    fn parse_rejects_unparseable_toml() {
        let err = parse("[[outlets]\noutlet_id = 1").unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn rebinding_policies_passes() {
        let cfg = Config {
            strip: StripSection { outlet_count: 6 },
            policy: PolicySection {
                battery_outlet: 5,
                timer_outlet: 6,
            },
            outlets: vec![
                OutletEntry {
                    outlet_id: 5,
                    ..charger()
                },
                OutletEntry {
                    outlet_id: 6,
                    ..lamp()
                },
            ],
        };
        cfg.validate().unwrap();
        assert_eq!(
            cfg.layout(),
            StripLayout {
                outlet_count: 6,
                battery_outlet: 5,
                timer_outlet: 6,
            }
        );
    }

    // -- Strip ------------------------------------------------------------

    #[test]
    fn outlet_count_zero_rejected() {
        let mut cfg = valid_config();
        cfg.strip.outlet_count = 0;
        assert_validation_err(&cfg, "outlet_count 0 out of range");
    }

    #[test]
    fn outlet_count_too_large_rejected() {
        let mut cfg = valid_config();
        cfg.strip.outlet_count = 17;
        assert_validation_err(&cfg, "outlet_count 17 out of range [1, 16]");
    }

    #[test]
    fn battery_outlet_off_strip_rejected() {
        let mut cfg = valid_config();
        cfg.policy.battery_outlet = 5;
        assert_validation_err(&cfg, "battery_outlet 5 is not an outlet");
    }

    #[test]
    fn timer_outlet_off_strip_rejected() {
        let mut cfg = valid_config();
        cfg.policy.timer_outlet = 0;
        assert_validation_err(&cfg, "timer_outlet 0 is not an outlet");
    }

    // -- Outlets ----------------------------------------------------------

    #[test]
    fn outlet_id_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.outlets.push(OutletEntry {
            outlet_id: 9,
            name: "Nine".into(),
            stop_charging_percent: None,
            timer_on: None,
            timer_off: None,
        });
        assert_validation_err(&cfg, "outlet_id out of range [1, 4]");
    }

    #[test]
    fn duplicate_outlet_rejected() {
        let mut cfg = valid_config();
        cfg.outlets.push(charger());
        assert_validation_err(&cfg, "duplicate outlet_id");
    }

    #[test]
    fn cutoff_out_of_range_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[0].stop_charging_percent = Some(101);
        assert_validation_err(&cfg, "stop_charging_percent 101 out of range");
    }

    #[test]
    fn cutoff_on_wrong_outlet_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[1].stop_charging_percent = Some(50);
        assert_validation_err(&cfg, "stop_charging_percent set but battery_outlet is 1");
    }

    #[test]
    fn timer_on_wrong_outlet_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[0].timer_on = Some("07:00".into());
        assert_validation_err(&cfg, "timer set but timer_outlet is 2");
    }

    #[test]
    fn bad_timer_text_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[1].timer_on = Some("25:00".into());
        assert_validation_err(&cfg, "timer_on: hour 25");
    }

    #[test]
    fn inverted_window_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[1].timer_on = Some("22:00".into());
        cfg.outlets[1].timer_off = Some("06:00".into());
        assert_validation_err(&cfg, "windows cannot cross midnight");
    }

    #[test]
    fn equal_window_rejected() {
        let mut cfg = valid_config();
        cfg.outlets[1].timer_on = Some("08:00".into());
        cfg.outlets[1].timer_off = Some("08-00".into());
        assert_validation_err(&cfg, "must be after timer_on");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.policy.timer_outlet = 7;
        cfg.outlets[0].stop_charging_percent = Some(-5);
        cfg.outlets[1].timer_off = Some("later".into());
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("timer_outlet 7"), "missing policy error in: {msg}");
        assert!(msg.contains("stop_charging_percent -5"), "missing cutoff error in: {msg}");
        assert!(msg.contains("timer_off"), "missing timer error in: {msg}");
    }

    // -- DB integration ---------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_database() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let config = valid_config();
        config.validate().unwrap();
        apply(&config, &db).await.unwrap();

        let outlets = db.load_outlets().await.unwrap();
        assert_eq!(outlets.len(), 4);
        assert_eq!(outlets[0].name, "Phone charger");
        assert_eq!(outlets[0].stop_charging_percent, Some(80));
        assert_eq!(outlets[1].timer_on, TimeOfDay::new(8, 0));
        assert_eq!(outlets[1].timer_off, TimeOfDay::new(20, 0));
        assert_eq!(outlets[2].name, "Outlet 3");
        assert!(outlets.iter().all(|o| !o.on));
    }

    #[tokio::test]
    async fn reapply_keeps_runtime_changes() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let config = valid_config();
        apply(&config, &db).await.unwrap();

        // The phone moved the cutoff while the hub was running.
        db.write(
            OutletField::StopChargingPercent,
            1,
            crate::store::FieldValue::Percent(60),
        )
        .await
        .unwrap();

        apply(&config, &db).await.unwrap();
        assert_eq!(
            db.read_percent(OutletField::StopChargingPercent, 1)
                .await
                .unwrap(),
            Some(60)
        );
    }
}
