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

//! Sonarray - HC-SR04 ultrasonic ranging over pigpiod
//!
//! This library drives a set of trigger/echo distance sensors from one shared
//! hardware trigger wave, times echo pulses from edge callbacks and publishes
//! the last good distance of every sensor for non-blocking pollers.

pub mod error;
pub mod tick;
pub mod facility;
pub mod filter;
pub mod logger;
pub mod sensor;
pub mod config;
pub mod waveform;
pub mod controller;
pub mod pigpio;

#[cfg(test)]
pub mod test_utils;

pub use controller::{RangingController, Snapshot, SnapshotReader};
pub use error::{RangingError, Result};
pub use facility::GpioFacility;
pub use pigpio::PigpioClient;
