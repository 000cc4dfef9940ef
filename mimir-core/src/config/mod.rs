//! Simulator configuration
//!
//! Runtime settings load from a JSON file: listen ports per protocol,
//! session identities, heartbeat intervals, fill rules, RNG seed and
//! journal location. Anything absent falls back to the defaults below,
//! so an empty `{}` config boots a working simulator on the default
//! ports.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::fill::FillRule;

/// What a FIX cancel for an already-filled order produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CancelOnFilledPolicy {
    /// Drop the request; no response at all
    #[default]
    Silent,
    /// Answer with an OrderCancelReject (too late to cancel)
    CancelReject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixListenerConfig {
    pub port: Option<u16>,
    /// `FIX.4.2`, `FIX.4.4` or `FIXT.1.1`
    pub begin_string: String,
    /// Our CompID (tag 49 on everything we send)
    pub sender_comp_id: String,
    /// The CompID we require from the client (their tag 49)
    pub target_comp_id: String,
    pub heartbeat_secs: u64,
    pub reset_on_logon: bool,
    pub cancel_on_filled: CancelOnFilledPolicy,
}

impl Default for FixListenerConfig {
    fn default() -> Self {
        Self {
            port: Some(9821),
            begin_string: "FIX.4.2".to_string(),
            sender_comp_id: "MIMIR".to_string(),
            target_comp_id: "CLIENT".to_string(),
            heartbeat_secs: 30,
            reset_on_logon: false,
            cancel_on_filled: CancelOnFilledPolicy::Silent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OuchListenerConfig {
    pub port: Option<u16>,
}

impl Default for OuchListenerConfig {
    fn default() -> Self {
        Self { port: Some(9822) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ouch50ListenerConfig {
    pub port: Option<u16>,
}

impl Default for Ouch50ListenerConfig {
    fn default() -> Self {
        Self { port: Some(9823) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IlinkListenerConfig {
    pub port: Option<u16>,
    /// Firms allowed to negotiate; empty list admits everyone
    pub firms: Vec<String>,
    /// Access keys allowed on Negotiate; empty list admits everyone
    pub access_key_ids: Vec<String>,
    pub keepalive_ms: u64,
}

impl Default for IlinkListenerConfig {
    fn default() -> Self {
        Self {
            port: Some(9824),
            firms: Vec::new(),
            access_key_ids: Vec::new(),
            keepalive_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptiqListenerConfig {
    pub port: Option<u16>,
}

impl Default for OptiqListenerConfig {
    fn default() -> Self {
        Self { port: Some(9825) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PillarListenerConfig {
    pub port: Option<u16>,
}

impl Default for PillarListenerConfig {
    fn default() -> Self {
        Self { port: Some(9826) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub listen_addr: String,
    pub journal_dir: PathBuf,
    pub rng_seed: u64,
    /// Fallback price for market orders, in the owning protocol's scale
    pub reference_price: i64,
    pub fill_rules: Vec<FillRule>,

    pub fix: FixListenerConfig,
    pub ouch42: OuchListenerConfig,
    pub ouch50: Ouch50ListenerConfig,
    pub ilink: IlinkListenerConfig,
    pub optiq: OptiqListenerConfig,
    pub pillar: PillarListenerConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            journal_dir: PathBuf::from("journal"),
            rng_seed: 0,
            reference_price: 1_000_000,
            fill_rules: Vec::new(),
            fix: FixListenerConfig::default(),
            ouch42: OuchListenerConfig::default(),
            ouch50: Ouch50ListenerConfig::default(),
            ilink: IlinkListenerConfig::default(),
            optiq: OptiqListenerConfig::default(),
            pillar: PillarListenerConfig::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for rule in &self.fill_rules {
            if !(0.0..=1.0).contains(&rule.fill_probability) {
                bail!(
                    "fill_probability {} out of [0,1] for pattern {}",
                    rule.fill_probability,
                    rule.symbol_pattern
                );
            }
            if !(0.0..=1.0).contains(&rule.partial_fill_probability) {
                bail!(
                    "partial_fill_probability {} out of [0,1] for pattern {}",
                    rule.partial_fill_probability,
                    rule.symbol_pattern
                );
            }
        }
        if self.fix.port.is_some() {
            match self.fix.begin_string.as_str() {
                "FIX.4.2" | "FIX.4.4" | "FIXT.1.1" => {}
                other => bail!("unsupported BeginString {other}"),
            }
            if self.fix.sender_comp_id.is_empty() || self.fix.target_comp_id.is_empty() {
                bail!("FIX comp ids must be non-empty");
            }
        }
        if self.reference_price <= 0 {
            bail!("reference_price must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_yields_defaults() {
        let config: SimulatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.fix.port, Some(9821));
        assert_eq!(config.fix.begin_string, "FIX.4.2");
        assert_eq!(config.fix.heartbeat_secs, 30);
        assert_eq!(config.ilink.keepalive_ms, 10_000);
        assert_eq!(config.fix.cancel_on_filled, CancelOnFilledPolicy::Silent);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_overrides() {
        let raw = r#"{
            "rng_seed": 1234,
            "fix": { "port": 7001, "begin_string": "FIXT.1.1", "cancel_on_filled": "cancel-reject" },
            "fill_rules": [
                { "symbol_pattern": "AAPL", "priority": 10, "fill_probability": 1.0, "partial_fill_probability": 1.0 },
                { "symbol_pattern": "*", "fill_probability": 0.5 }
            ]
        }"#;
        let config: SimulatorConfig = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.rng_seed, 1234);
        assert_eq!(config.fix.port, Some(7001));
        assert_eq!(config.fix.begin_string, "FIXT.1.1");
        assert_eq!(
            config.fix.cancel_on_filled,
            CancelOnFilledPolicy::CancelReject
        );
        assert_eq!(config.fill_rules.len(), 2);
        assert_eq!(config.fill_rules[0].priority, 10);
        assert_eq!(config.fill_rules[1].partial_fill_probability, 0.0);
        // Defaults survive next to overrides
        assert_eq!(config.ouch42.port, Some(9822));
    }

    #[test]
    fn test_validation_rejects_bad_probability() {
        let raw = r#"{ "fill_rules": [ { "symbol_pattern": "*", "fill_probability": 1.5 } ] }"#;
        let config: SimulatorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_begin_string() {
        let raw = r#"{ "fix": { "begin_string": "FIX.9.9" } }"#;
        let config: SimulatorConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
