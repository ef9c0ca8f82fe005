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

//! Shared trigger wave
//!
//! All sensors are fired from one repeating wave. Each trigger pin gets a
//! single high pulse per period:
//!
//! ```text
//!   0        offset+MARGIN      +WIDTH                         period
//!   |------------|=================|------------------------------|
//!       idle          trigger high              idle
//! ```
//!
//! Pulses of different sensors may touch but must not overlap.

use std::collections::HashSet;

use crate::config::SensorConfig;
use crate::error::{RangingError, Result};
use crate::facility::{is_valid_pin, Pin, Pulse};

/// Trigger pulse width in ticks (HC-SR04 needs at least 10µs)
pub const TRIGGER_WIDTH: u32 = 10;

/// Lead-in before a sensor's phase offset
pub const TRIGGER_MARGIN: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSlot {
    pub sensor: String,
    pub pin: Pin,
    /// First tick of the pulse within the period
    pub start: u32,
    /// First tick after the pulse
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerWave {
    period: u32,
    slots: Vec<TriggerSlot>,
    pulses: Vec<Pulse>,
}

impl TriggerWave {
    /// Lay out one trigger pulse per sensor within `period` ticks
    pub fn build(sensors: &[SensorConfig], period: u32) -> Result<Self> {
        if sensors.is_empty() {
            return Err(RangingError::NoSensors);
        }

        let mut slots = Vec::with_capacity(sensors.len());
        let mut pins = HashSet::new();
        for s in sensors {
            if !is_valid_pin(s.trigger) {
                return Err(RangingError::InvalidPin { sensor: s.name.clone(), role: "trigger", pin: s.trigger });
            }
            if !pins.insert(s.trigger) {
                return Err(RangingError::config(format!("trigger pin {} is used more than once", s.trigger)));
            }
            let start = s.phase_offset as u64 + TRIGGER_MARGIN as u64;
            let end = start + TRIGGER_WIDTH as u64;
            if end > period as u64 {
                return Err(RangingError::TriggerOverrun { sensor: s.name.clone(), end, period });
            }
            slots.push(TriggerSlot {
                sensor: s.name.clone(),
                pin: s.trigger,
                start: start as u32,
                end: end as u32,
            });
        }

        // stable: equal starts keep configuration order
        let mut order: Vec<&TriggerSlot> = slots.iter().collect();
        order.sort_by_key(|slot| slot.start);
        for pair in order.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(RangingError::TriggerOverlap {
                    first: pair[0].sensor.clone(),
                    second: pair[1].sensor.clone(),
                });
            }
        }

        let mut pulses = Vec::with_capacity(order.len() * 2 + 1);
        let mut cursor = 0u32;
        let mut release = 0u32;
        for slot in &order {
            let bit = 1u32 << slot.pin;
            if slot.start > cursor {
                pulses.push(Pulse { on: 0, off: release, delay: slot.start - cursor });
                release = 0;
            }
            pulses.push(Pulse { on: bit, off: release, delay: TRIGGER_WIDTH });
            release = bit;
            cursor = slot.end;
        }
        pulses.push(Pulse { on: 0, off: release, delay: period - cursor });

        Ok(Self { period, slots, pulses })
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Trigger slots in configuration order
    pub fn slots(&self) -> &[TriggerSlot] {
        &self.slots
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    /// Sum of all pulse delays; equals the period
    pub fn duration(&self) -> u64 {
        self.pulses.iter().map(|p| p.delay as u64).sum()
    }

    /// Bitmask of every trigger pin driven by the wave
    pub fn trigger_mask(&self) -> u32 {
        self.slots.iter().fold(0, |mask, s| mask | (1 << s.pin))
    }
}
