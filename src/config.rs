/*
 * This file is part of Sonarray.
 *
 * Copyright (C) 2025 Sonarray contributors
 *
 * Sonarray is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Sonarray is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Sonarray. If not, see <https://www.gnu.org/licenses/>.
 */

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RangingError, Result};
use crate::facility::{is_valid_pin, Pin};
use crate::logger::{LogLevels, LogSettings, DEFAULT_READING_FORMAT};
use crate::sensor::Bounds;
use crate::tick::TICKS_PER_SECOND;

pub const DEFAULT_PERIOD_S: f64 = 0.5;
pub const DEFAULT_WINDOW: u32 = 4;
pub const DEFAULT_PIGPIO_PORT: u16 = 8888;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Plain,
    Averaging,
}

/// One sensor as written in the config file; unset fields come from the defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorSpec {
    #[serde(default)]
    pub variant: Variant,
    pub name: String,
    pub trigger: Pin,
    pub sense: Pin,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub phase_offset: Option<u32>,
    /// Averaging window; ignored for plain sensors
    #[serde(default)]
    pub window: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorDefaults {
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub phase_offset: u32,
    #[serde(default = "default_window")]
    pub window: u32,
}

impl Default for SensorDefaults {
    fn default() -> Self {
        Self { bounds: Bounds::default(), phase_offset: 0, window: DEFAULT_WINDOW }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Plain,
    Averaging { window: u32 },
}

/// Fully resolved settings for one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub name: String,
    pub trigger: Pin,
    pub sense: Pin,
    pub bounds: Bounds,
    pub phase_offset: u32,
    pub kind: SensorKind,
}

impl SensorSpec {
    /// Overlay this spec on `defaults`
    pub fn merge(&self, defaults: &SensorDefaults) -> SensorConfig {
        let kind = match self.variant {
            Variant::Plain => {
                if self.window.is_some() {
                    tracing::warn!(sensor = %self.name, "window is ignored for plain sensors");
                }
                SensorKind::Plain
            }
            Variant::Averaging => SensorKind::Averaging { window: self.window.unwrap_or(defaults.window) },
        };
        SensorConfig {
            name: self.name.clone(),
            trigger: self.trigger,
            sense: self.sense,
            bounds: self.bounds.unwrap_or(defaults.bounds),
            phase_offset: self.phase_offset.unwrap_or(defaults.phase_offset),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub levels: LogLevels,
    /// Print to stderr; defaults to true unless a file is configured
    #[serde(default)]
    pub print: Option<bool>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Write the file as JSON lines instead of text
    #[serde(default)]
    pub json: bool,
    /// Reading line template; `null` disables reading output
    #[serde(default = "default_reading_format")]
    pub format: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            levels: LogLevels::default(),
            print: None,
            file: None,
            json: false,
            format: default_reading_format(),
        }
    }
}

impl LogConfig {
    pub fn settings(&self) -> LogSettings {
        LogSettings {
            levels: self.levels,
            print: self.print.unwrap_or(self.file.is_none()),
            file: self.file.clone(),
            json: self.json,
            reading_format: self.format.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PigpioConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PigpioConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangingConfig {
    /// Trigger period in seconds, shared by all sensors
    #[serde(default = "default_period")]
    pub period_s: f64,
    #[serde(default)]
    pub defaults: SensorDefaults,
    pub sensors: Vec<SensorSpec>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pigpio: PigpioConfig,
}

fn default_period() -> f64 { DEFAULT_PERIOD_S }
fn default_window() -> u32 { DEFAULT_WINDOW }
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { DEFAULT_PIGPIO_PORT }
fn default_reading_format() -> Option<String> { Some(DEFAULT_READING_FORMAT.to_string()) }

pub fn config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("sonarray").join("config.json");
    }
    if let Ok(home) = env::var("HOME") {
        return Path::new(&home)
            .join(".config")
            .join("sonarray")
            .join("config.json");
    }
    system_config_path()
}

pub fn system_config_path() -> PathBuf { PathBuf::from("/etc/sonarray/config.json") }

/// Read, parse and validate a config file
pub fn load_config(path: &Path) -> Result<RangingConfig> {
    let data = fs::read_to_string(path).map_err(|source| RangingError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: RangingConfig = serde_json::from_str(&data)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn is_safe_label(s: &str) -> bool {
    if s.trim().is_empty() || s.len() > 32 { return false; }
    s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
}

/// Convert a period in seconds to ticks
pub fn period_ticks(period_s: f64) -> Result<u32> {
    if !period_s.is_finite() || period_s <= 0.0 {
        return Err(RangingError::InvalidPeriod(period_s));
    }
    let ticks = (period_s * TICKS_PER_SECOND as f64).round();
    if ticks < 1.0 || ticks > u32::MAX as f64 {
        return Err(RangingError::InvalidPeriod(period_s));
    }
    Ok(ticks as u32)
}

pub fn validate_sensor_config(cfg: &SensorConfig) -> Result<()> {
    if !is_safe_label(&cfg.name) {
        return Err(RangingError::config(format!("invalid sensor name {:?}", cfg.name)));
    }
    let Bounds { lower, upper } = cfg.bounds;
    if !(lower < upper) {
        return Err(RangingError::InvalidBounds { sensor: cfg.name.clone(), lower, upper });
    }
    for (role, pin) in [("trigger", cfg.trigger), ("sense", cfg.sense)] {
        if !is_valid_pin(pin) {
            return Err(RangingError::InvalidPin { sensor: cfg.name.clone(), role, pin });
        }
    }
    if let SensorKind::Averaging { window: 0 } = cfg.kind {
        return Err(RangingError::InvalidWindow { sensor: cfg.name.clone() });
    }
    Ok(())
}

/// Validate a full sensor set: names unique, each sensor valid, every pin
/// owned by one sensor in one role
pub fn validate_sensor_set(configs: &[SensorConfig]) -> Result<()> {
    if configs.is_empty() {
        return Err(RangingError::NoSensors);
    }
    let mut seen = HashSet::new();
    let mut owners: HashMap<Pin, &str> = HashMap::new();
    for cfg in configs {
        if !seen.insert(cfg.name.as_str()) {
            return Err(RangingError::DuplicateSensor(cfg.name.clone()));
        }
        validate_sensor_config(cfg)?;
        for pin in [cfg.trigger, cfg.sense] {
            if let Some(owner) = owners.insert(pin, cfg.name.as_str()) {
                return Err(RangingError::config(format!(
                    "pin {} is used by both {} and {}",
                    pin, owner, cfg.name
                )));
            }
        }
    }
    Ok(())
}

/// Merge every spec onto `defaults`, keeping configuration order
pub fn resolve_sensors(specs: &[SensorSpec], defaults: &SensorDefaults) -> Result<Vec<SensorConfig>> {
    let out: Vec<SensorConfig> = specs.iter().map(|spec| spec.merge(defaults)).collect();
    validate_sensor_set(&out)?;
    Ok(out)
}

pub fn validate_config(cfg: &RangingConfig) -> Result<()> {
    period_ticks(cfg.period_s)?;
    resolve_sensors(&cfg.sensors, &cfg.defaults)?;
    if cfg.pigpio.host.trim().is_empty() {
        return Err(RangingError::config("pigpio host must not be empty"));
    }
    Ok(())
}
