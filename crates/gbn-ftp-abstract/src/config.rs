use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::packet::HEADER_LEN;

/// Largest UDP payload over IPv4, minus our own header.
pub const MAX_MSS: usize = 65_507 - HEADER_LEN;

/// Largest window whose span still compares correctly under wrapping `u32` arithmetic.
pub const MAX_WINDOW: usize = i32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("port must be non-zero")]
    InvalidPort,
    #[error("loss probability {0} is outside [0, 1)")]
    LossProbability(f64),
    #[error("window size must be positive")]
    ZeroWindow,
    #[error("window size {window} exceeds {max}")]
    WindowTooLarge { window: usize, max: usize },
    #[error("MSS must be positive")]
    ZeroMss,
    #[error("MSS {mss} exceeds the datagram limit of {max} bytes")]
    MssTooLarge { mss: usize, max: usize },
    #[error("retransmission timeout must be positive")]
    ZeroTimeout,
    #[error("latency range {min}..={max} ms is empty")]
    LatencyRange { min: u64, max: u64 },
    #[error("corruption rate {0} is outside [0, 1)")]
    CorruptRate(f64),
}

/// Validated drop probability in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LossProbability(f64);

impl LossProbability {
    pub const NEVER: Self = Self(0.0);

    pub fn new(p: f64) -> Result<Self, ConfigError> {
        // NaN fails both comparisons.
        if (0.0..1.0).contains(&p) {
            Ok(Self(p))
        } else {
            Err(ConfigError::LossProbability(p))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for LossProbability {
    type Error = ConfigError;

    fn try_from(p: f64) -> Result<Self, Self::Error> {
        Self::new(p)
    }
}

impl From<LossProbability> for f64 {
    fn from(p: LossProbability) -> Self {
        p.0
    }
}

/// Settings shared by the sender and receiver roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// UDP port the receiver listens on.
    pub port: u16,
    pub loss_probability: f64,
    /// Go-back-N window size N.
    pub window_size: usize,
    pub mss: usize,
    pub timeout_ms: u64,
    /// Quiet period after which a seq-0 segment from the current peer starts a new transfer.
    pub idle_gap_ms: u64,
    /// Abort after this many consecutive timeouts without progress. `None` retries forever.
    pub max_consecutive_timeouts: Option<u32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            port: 7735,
            loss_probability: 0.0,
            window_size: 64,
            mss: 500,
            timeout_ms: 200,
            idle_gap_ms: 1000,
            max_consecutive_timeouts: None,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        LossProbability::new(self.loss_probability)?;
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.window_size > MAX_WINDOW {
            return Err(ConfigError::WindowTooLarge {
                window: self.window_size,
                max: MAX_WINDOW,
            });
        }
        if self.mss == 0 {
            return Err(ConfigError::ZeroMss);
        }
        if self.mss > MAX_MSS {
            return Err(ConfigError::MssTooLarge {
                mss: self.mss,
                max: MAX_MSS,
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn loss(&self) -> Result<LossProbability, ConfigError> {
        LossProbability::new(self.loss_probability)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn idle_gap(&self) -> Duration {
        Duration::from_millis(self.idle_gap_ms)
    }
}

/// Partial [`ProtocolConfig`], e.g. read from a TOML file or built from CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverride {
    pub port: Option<u16>,
    pub loss_probability: Option<f64>,
    pub window_size: Option<usize>,
    pub mss: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub idle_gap_ms: Option<u64>,
    pub max_consecutive_timeouts: Option<u32>,
}

impl ConfigOverride {
    pub fn apply_to(&self, config: &mut ProtocolConfig) {
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.loss_probability {
            config.loss_probability = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.mss {
            config.mss = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.idle_gap_ms {
            config.idle_gap_ms = v;
        }
        if let Some(v) = self.max_consecutive_timeouts {
            config.max_consecutive_timeouts = Some(v);
        }
    }
}

/// Channel model used by the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        LossProbability::new(self.loss_rate)?;
        // At 1.0 no datagram ever arrives intact.
        if !(0.0..1.0).contains(&self.corrupt_rate) {
            return Err(ConfigError::CorruptRate(self.corrupt_rate));
        }
        if self.min_latency > self.max_latency {
            return Err(ConfigError::LatencyRange {
                min: self.min_latency,
                max: self.max_latency,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(ProtocolConfig::default().validate(), Ok(()));
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn loss_probability_bounds() {
        assert!(LossProbability::new(0.0).is_ok());
        assert!(LossProbability::new(0.999).is_ok());
        assert_eq!(
            LossProbability::new(1.0),
            Err(ConfigError::LossProbability(1.0))
        );
        assert!(LossProbability::new(-0.1).is_err());
        assert!(LossProbability::new(f64::NAN).is_err());
    }

    #[test]
    fn rejects_fatal_settings() {
        let base = ProtocolConfig::default();

        let cfg = ProtocolConfig { port: 0, ..base.clone() };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidPort));

        let cfg = ProtocolConfig { window_size: 0, ..base.clone() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroWindow));

        let cfg = ProtocolConfig { window_size: usize::MAX, ..base.clone() };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::WindowTooLarge {
                window: usize::MAX,
                max: MAX_WINDOW
            })
        );

        let cfg = ProtocolConfig { window_size: MAX_WINDOW, ..base.clone() };
        assert_eq!(cfg.validate(), Ok(()));

        let cfg = ProtocolConfig { mss: 0, ..base.clone() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroMss));

        let cfg = ProtocolConfig { mss: MAX_MSS + 1, ..base.clone() };
        assert!(matches!(cfg.validate(), Err(ConfigError::MssTooLarge { .. })));

        let cfg = ProtocolConfig { timeout_ms: 0, ..base.clone() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));

        let cfg = ProtocolConfig { loss_probability: 1.0, ..base };
        assert_eq!(cfg.validate(), Err(ConfigError::LossProbability(1.0)));
    }

    #[test]
    fn corruption_rate_excludes_certainty() {
        let ok = SimConfig { corrupt_rate: 0.99, ..SimConfig::default() };
        assert_eq!(ok.validate(), Ok(()));

        let always = SimConfig { corrupt_rate: 1.0, ..SimConfig::default() };
        assert_eq!(always.validate(), Err(ConfigError::CorruptRate(1.0)));

        let negative = SimConfig { corrupt_rate: -0.5, ..SimConfig::default() };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn override_from_toml() {
        let text = r#"
            window_size = 8
            mss = 1000
            loss_probability = 0.05
        "#;
        let patch: ConfigOverride = toml::from_str(text).unwrap();
        let mut cfg = ProtocolConfig::default();
        patch.apply_to(&mut cfg);
        assert_eq!(cfg.window_size, 8);
        assert_eq!(cfg.mss, 1000);
        assert_eq!(cfg.loss_probability, 0.05);
        assert_eq!(cfg.port, 7735);
    }

    #[test]
    fn loss_probability_deserialization_is_checked() {
        #[derive(Deserialize)]
        struct Wrapper {
            p: LossProbability,
        }
        assert!(toml::from_str::<Wrapper>("p = 0.25").is_ok());
        assert!(toml::from_str::<Wrapper>("p = 1.5").is_err());
    }
}
