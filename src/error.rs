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

//! Unified error handling for Sonarray
//!
//! Configuration problems are raised while the controller is being built.
//! Sensor-level protocol problems are never errors: they are state
//! transitions, logged and healed on the next rising edge.

use std::io;
use std::path::PathBuf;

/// Result type alias using RangingError
pub type Result<T> = std::result::Result<T, RangingError>;

/// Unified error type for all Sonarray operations
#[derive(thiserror::Error, Debug)]
pub enum RangingError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Sensor {sensor}: bounds ({lower}, {upper}) must satisfy lower < upper")]
    InvalidBounds {
        sensor: String,
        lower: f64,
        upper: f64,
    },

    #[error("Sensor {sensor}: {role} pin {pin} is outside the valid GPIO range 1..=31")]
    InvalidPin {
        sensor: String,
        role: &'static str,
        pin: u32,
    },

    #[error("Duplicate sensor name: {0}")]
    DuplicateSensor(String),

    #[error("Sensor {sensor}: averaging window must be at least 1")]
    InvalidWindow {
        sensor: String,
    },

    #[error("Invalid trigger period: {0}s")]
    InvalidPeriod(f64),

    #[error("No sensors configured")]
    NoSensors,

    #[error("Sensor {sensor}: trigger pulse ends at tick {end}, past the period of {period} ticks")]
    TriggerOverrun {
        sensor: String,
        end: u64,
        period: u32,
    },

    #[error("Trigger pulses of {first} and {second} overlap")]
    TriggerOverlap {
        first: String,
        second: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // ============================================================================
    // I/O and Serialization Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Facility Errors
    // ============================================================================
    #[error("Failed to connect to pigpio daemon at {addr}: {source}")]
    Connect {
        addr: String,
        source: io::Error,
    },

    #[error("pigpio command {cmd} failed with code {code}")]
    Command {
        cmd: u32,
        code: i32,
    },

    #[error("Facility error: {0}")]
    Facility(String),

    // ============================================================================
    // Internal Consistency Errors
    // ============================================================================
    #[error("Sensor {sensor}: sample {distance}cm flagged invalid but inside bounds ({lower}, {upper})")]
    InconsistentSample {
        sensor: String,
        distance: f64,
        lower: f64,
        upper: f64,
    },
}

impl RangingError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a facility error from a string
    pub fn facility(msg: impl Into<String>) -> Self {
        Self::Facility(msg.into())
    }

    /// True for errors raised while validating a configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidBounds { .. }
                | Self::InvalidPin { .. }
                | Self::DuplicateSensor(_)
                | Self::InvalidWindow { .. }
                | Self::InvalidPeriod(_)
                | Self::NoSensors
                | Self::TriggerOverrun { .. }
                | Self::TriggerOverlap { .. }
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = RangingError::InvalidBounds { sensor: "left".into(), lower: 150.0, upper: 0.5 };
        let msg = err.to_string();
        assert!(msg.contains("left"));
        assert!(msg.contains("150"));

        let err = RangingError::Command { cmd: 28, code: -36 };
        assert_eq!(err.to_string(), "pigpio command 28 failed with code -36");
    }

    #[test]
    fn test_is_config() {
        assert!(RangingError::NoSensors.is_config());
        assert!(RangingError::config("bad").is_config());
        assert!(!RangingError::facility("gone").is_config());
        assert!(!RangingError::InconsistentSample {
            sensor: "x".into(),
            distance: 10.0,
            lower: 0.5,
            upper: 150.0,
        }
        .is_config());
    }

    #[test]
    fn test_from_io_and_json() {
        let io_err: RangingError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(io_err, RangingError::Io(_)));

        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: RangingError = json_err.into();
        assert!(matches!(err, RangingError::JsonParse(_)));
    }
}
