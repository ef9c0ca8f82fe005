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

//! HC-SR04 echo timing
//!
//! A [`Sensor`] follows the edges on its sense pin:
//!
//! ```text
//!   Idle/Error  --rising-->  Measuring  --falling-->  Idle   (reading emitted)
//!   Measuring   --rising-->  Error
//!   Idle/Error  --falling--> Error
//! ```
//!
//! Error is left by the next rising edge, so a missed edge costs exactly one
//! cycle. Trigger pulses are driven by the controller's wave, not here.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{validate_sensor_config, SensorConfig, SensorKind};
use crate::error::{RangingError, Result};
use crate::facility::{Edge, GpioFacility, Pin, PinMode};
use crate::filter::AveragingFilter;
use crate::logger::LogTier;
use crate::tick::{echo_to_cm, tick_diff, Tick};

/// Accepted distance range in cm, exclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn admits(&self, distance: f64) -> bool {
        self.lower < distance && distance < self.upper
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self { lower: 0.5, upper: 150.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Idle,
    Measuring { since: Tick },
    Error,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorState::Idle => "idle",
            SensorState::Measuring { .. } => "measure",
            SensorState::Error => "error",
        };
        f.pad(name)
    }
}

/// One completed measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub sensor: String,
    pub distance_cm: f64,
    pub tick: Tick,
    pub valid: bool,
}

/// Outward handle a sensor reports through
#[cfg_attr(test, mockall::automock)]
pub trait SensorEvents: Send + Sync {
    fn enabled(&self, tier: LogTier) -> bool;

    fn log(&self, tier: LogTier, tick: Tick, source: &str, message: &str);

    fn reading(&self, reading: &Reading);
}

/// Result of feeding one edge to a sensor
#[derive(Debug)]
pub enum EdgeOutcome {
    /// Rising edge accepted, echo window open
    Armed,
    Measured(Reading),
    /// Edge out of phase; the sensor is now in `Error`
    Rejected,
    /// Internal consistency failure; no reading was emitted
    Fault(RangingError),
}

enum Behavior {
    Plain,
    Averaging(AveragingFilter),
}

pub struct Sensor {
    name: String,
    trigger: Pin,
    sense: Pin,
    bounds: Bounds,
    phase_offset: u32,
    state: SensorState,
    last_distance: Option<f64>,
    last_good_tick: Option<Tick>,
    behavior: Behavior,
    events: Arc<dyn SensorEvents>,
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("sense", &self.sense)
            .field("state", &self.state)
            .finish()
    }
}

impl Sensor {
    /// Validate `config` and build an idle sensor. Touches no hardware.
    pub fn new(config: &SensorConfig, events: Arc<dyn SensorEvents>) -> Result<Self> {
        validate_sensor_config(config)?;
        let behavior = match config.kind {
            SensorKind::Plain => Behavior::Plain,
            SensorKind::Averaging { window } => Behavior::Averaging(AveragingFilter::new(window)),
        };

        Ok(Self {
            name: config.name.clone(),
            trigger: config.trigger,
            sense: config.sense,
            bounds: config.bounds,
            phase_offset: config.phase_offset,
            state: SensorState::Idle,
            last_distance: None,
            last_good_tick: None,
            behavior,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> Pin {
        self.trigger
    }

    pub fn sense(&self) -> Pin {
        self.sense
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn phase_offset(&self) -> u32 {
        self.phase_offset
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    /// Distance from the most recent completed measure, valid or not
    pub fn last_distance(&self) -> Option<f64> {
        self.last_distance
    }

    pub fn last_good_tick(&self) -> Option<Tick> {
        self.last_good_tick
    }

    pub fn is_averaging(&self) -> bool {
        matches!(self.behavior, Behavior::Averaging(_))
    }

    pub(crate) fn log(&self, tier: LogTier, tick: Tick, message: impl FnOnce() -> String) {
        if self.events.enabled(tier) {
            self.events.log(tier, tick, &self.name, &message());
        }
    }

    fn set_state(&mut self, tick: Tick, next: SensorState, tier: LogTier, why: impl FnOnce() -> String) {
        let prev = self.state;
        self.state = next;
        self.log(tier, tick, || format!("state {:>10}->{:>10}, {}.", prev, next, why()));
    }

    /// Feed one edge from the sense pin. Never fails: protocol problems
    /// become state transitions.
    pub fn on_edge(&mut self, edge: Edge, tick: Tick) -> EdgeOutcome {
        match (self.state, edge) {
            (SensorState::Idle | SensorState::Error, Edge::Rising) => {
                self.set_state(tick, SensorState::Measuring { since: tick }, LogTier::EDGES, || {
                    "rising edge on sense pin".to_string()
                });
                EdgeOutcome::Armed
            }
            (SensorState::Measuring { .. }, Edge::Rising) => {
                self.set_state(tick, SensorState::Error, LogTier::ERRORS, || {
                    "rising edge on sense pin unexpected".to_string()
                });
                EdgeOutcome::Rejected
            }
            (SensorState::Idle | SensorState::Error, Edge::Falling) => {
                self.set_state(tick, SensorState::Error, LogTier::ERRORS, || {
                    "unexpected falling edge".to_string()
                });
                EdgeOutcome::Rejected
            }
            (SensorState::Measuring { since }, Edge::Falling) => self.complete(since, tick),
        }
    }

    fn complete(&mut self, since: Tick, tick: Tick) -> EdgeOutcome {
        let elapsed = tick_diff(since, tick);
        let distance = echo_to_cm(elapsed);
        let valid = self.bounds.admits(distance);

        self.last_distance = Some(distance);
        if valid {
            self.last_good_tick = Some(tick);
        }
        self.set_state(tick, SensorState::Idle, LogTier::MEASURES, || {
            format!(
                "{} measure: {:4.1}cm, {:3.1}ms",
                if valid { "good" } else { "bad " },
                distance,
                elapsed as f64 / 1000.0
            )
        });

        let reported = match &mut self.behavior {
            Behavior::Plain => distance,
            Behavior::Averaging(filter) => match filter.fold(&self.name, distance, valid, self.bounds) {
                Ok(avg) => avg,
                Err(err) => {
                    let msg = err.to_string();
                    self.log(LogTier::ERRORS, tick, || msg);
                    tracing::error!(sensor = %self.name, "{}", err);
                    return EdgeOutcome::Fault(err);
                }
            },
        };

        let reading = Reading {
            sensor: self.name.clone(),
            distance_cm: reported,
            tick,
            valid,
        };
        self.events.reading(&reading);
        EdgeOutcome::Measured(reading)
    }

    /// Put the trigger pin back into input mode
    pub fn stop(&self, facility: &dyn GpioFacility) -> Result<()> {
        facility.set_pin_mode(self.trigger, PinMode::Input)?;
        let tick = facility.current_tick().unwrap_or(0);
        self.log(LogTier::SETUP, tick, || format!("HC-SR04 {} closed", self.name));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: SensorState) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn fold_for_test(&mut self, distance: f64, valid: bool) -> Option<Result<f64>> {
        let bounds = self.bounds;
        match &mut self.behavior {
            Behavior::Plain => None,
            Behavior::Averaging(filter) => Some(filter.fold(&self.name, distance, valid, bounds)),
        }
    }
}
