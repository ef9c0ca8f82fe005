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

//! GPIO and timing facility interface
//!
//! The ranging core talks to the hardware only through [`GpioFacility`]:
//! pin modes and levels, edge callbacks stamped with a microsecond tick, and
//! pre-built repeating pulse trains ("waves").
//!
//! # Callback context
//!
//! Callbacks run on a thread owned by the facility. Delivery is in tick order
//! per pin; there is no ordering between pins. A callback must not block.

use crate::error::Result;
use crate::tick::Tick;

pub type Pin = u32;

/// Lowest and highest usable GPIO numbers (bank 1)
pub const MIN_PIN: Pin = 1;
pub const MAX_PIN: Pin = 31;

pub fn is_valid_pin(pin: Pin) -> bool {
    (MIN_PIN..=MAX_PIN).contains(&pin)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    pub fn from_level(level: bool) -> Self {
        if level { Edge::Rising } else { Edge::Falling }
    }
}

/// One step of a wave: set the `on` bits high, the `off` bits low, then wait
/// `delay` ticks before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub on: u32,
    pub off: u32,
    pub delay: u32,
}

impl Pulse {
    pub fn idle(delay: u32) -> Self {
        Self { on: 0, off: 0, delay }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Edge callback, invoked with the pin, the edge kind and the tick of the edge
pub type EdgeCallback = Box<dyn FnMut(Pin, Edge, Tick) + Send + 'static>;

pub trait GpioFacility: Send + Sync {
    fn set_pin_mode(&self, pin: Pin, mode: PinMode) -> Result<()>;

    fn write(&self, pin: Pin, level: bool) -> Result<()>;

    /// Register a callback for both edges on `pin`
    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<CallbackId>;

    fn cancel_callback(&self, id: CallbackId) -> Result<()>;

    fn current_tick(&self) -> Result<Tick>;

    /// Build a wave from `pulses`; returns its id without transmitting it
    fn build_repeating_wave(&self, pulses: &[Pulse]) -> Result<WaveId>;

    /// Transmit the wave repeatedly until stopped
    fn start_wave(&self, id: WaveId) -> Result<()>;

    fn stop_wave(&self, id: WaveId) -> Result<()>;

    fn delete_wave(&self, id: WaveId) -> Result<()>;
}
