use anyhow::{Context, Result};
use oxihall_commutation::{MotorConfig, RampConfig};
use serde::Deserialize;
use std::{env, fs, path::Path};

/// Where the ramp test runs
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// In-process simulated rotor
    #[default]
    Bench,
    /// Real board over probe-rs RTT
    Probe,
}

/// Simulated bench settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BenchConfig {
    /// Simulation step between two commutation updates
    pub tick_us: u32,
    /// Unplug the Hall cable this long after the ramp starts
    pub hall_dropout_at_ms: Option<u64>,
    /// How long the cable stays unplugged
    pub hall_dropout_ms: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            tick_us: 50,
            hall_dropout_at_ms: None,
            hall_dropout_ms: 200,
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct HostConfig {
    pub mode: Mode,
    pub probe: Option<String>,        // e.g. "0483:374b:<serial>" or "0483:374b"
    pub chip: Option<String>,         // e.g. "STM32G431CBTx"
    pub elf: Option<String>,          // path to device ELF with .defmt
    pub stream_defmt: Option<bool>,   // default: true
    pub stream_ergot: Option<bool>,   // default: true
    pub motor: MotorConfig,
    pub ramp: RampConfig,
    pub bench: BenchConfig,
}

impl HostConfig {
    /// `OXIHALL_HOST_CONFIG`, then `./oxihall-host.toml`, then defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var("OXIHALL_HOST_CONFIG") {
            return Self::from_path(Path::new(&p));
        }
        let p = env::current_dir()?.join("oxihall-host.toml");
        if p.exists() {
            return Self::from_path(&p);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("Failed to parse config (TOML) {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: HostConfig = toml::from_str(s)?;
        cfg.motor
            .validate()
            .map_err(|e| anyhow::anyhow!("[motor] {}", e))?;
        Ok(cfg)
    }

    /// Ramp profile, its top speed capped at the motor's max RPM
    pub fn ramp(&self) -> RampConfig {
        RampConfig {
            max_rpm: self.ramp.max_rpm.min(self.motor.max_rpm),
            ..self.ramp
        }
    }

    pub fn stream_defmt(&self) -> bool { self.stream_defmt.unwrap_or(true) }
    pub fn stream_ergot(&self) -> bool { self.stream_ergot.unwrap_or(true) }
}
