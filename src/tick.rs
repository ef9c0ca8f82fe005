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

//! Facility tick arithmetic
//!
//! Ticks are microseconds since boot, held in a `u32` that wraps every
//! 2^32 µs (about 71.6 minutes).

use serde::Serialize;

/// Microsecond tick as delivered by the facility
pub type Tick = u32;

/// Number of distinct tick values before the counter wraps
pub const TICK_MODULUS: u64 = 1 << 32;

pub const TICKS_PER_SECOND: u32 = 1_000_000;

/// Round-trip speed of sound, in centimetres per tick
pub const CM_PER_TICK: f64 = 0.017015;

/// Forward distance from `start` to `end`, modulo the tick modulus
pub fn tick_diff(start: Tick, end: Tick) -> u32 {
    end.wrapping_sub(start)
}

/// Distance in centimetres for an echo window of `elapsed` ticks
pub fn echo_to_cm(elapsed: u32) -> f64 {
    elapsed as f64 * CM_PER_TICK
}

/// Human readable split of a tick into time since boot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockTime {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl ClockTime {
    pub fn from_tick(tick: Tick) -> Self {
        let whole = tick / TICKS_PER_SECOND;
        let frac = (tick % TICKS_PER_SECOND) as f64 / TICKS_PER_SECOND as f64;
        let minutes_total = whole / 60;
        Self {
            hours: minutes_total / 60,
            minutes: minutes_total % 60,
            seconds: (whole % 60) as f64 + frac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_diff_forward() {
        assert_eq!(tick_diff(1000, 1100), 100);
        assert_eq!(tick_diff(0, 0), 0);
        assert_eq!(tick_diff(5, u32::MAX), u32::MAX - 5);
    }

    #[test]
    fn test_tick_diff_across_wrap() {
        assert_eq!(tick_diff(u32::MAX, 0), 1);
        assert_eq!(tick_diff(u32::MAX - 49, 50), 100);
        assert_eq!(tick_diff(4_294_967_000, 704), 1000);
    }

    #[test]
    fn test_tick_diff_matches_modular_distance() {
        let starts = [0u32, 1, 999, 1 << 31, u32::MAX - 10, u32::MAX];
        let steps = [0u64, 1, 100, 58_000, (1 << 31) + 7, TICK_MODULUS - 1];
        for &a in &starts {
            for &step in &steps {
                let b = ((a as u64 + step) % TICK_MODULUS) as u32;
                assert_eq!(tick_diff(a, b) as u64, step, "a={} step={}", a, step);
            }
        }
    }

    #[test]
    fn test_echo_to_cm() {
        assert!((echo_to_cm(100) - 1.7015).abs() < 1e-9);
        assert_eq!(echo_to_cm(0), 0.0);
    }

    #[test]
    fn test_clock_time_from_tick() {
        let t = ClockTime::from_tick(0);
        assert_eq!((t.hours, t.minutes), (0, 0));
        assert_eq!(t.seconds, 0.0);

        // 1h 2m 3.5s
        let t = ClockTime::from_tick(3_723_500_000);
        assert_eq!(t.hours, 1);
        assert_eq!(t.minutes, 2);
        assert!((t.seconds - 3.5).abs() < 1e-9);
    }
}
