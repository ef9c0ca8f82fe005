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

//! Exponential moving average used by averaging sensors
//!
//! Out-of-bounds samples are not dropped: they are replaced by the bound they
//! violated and folded in like any other sample.

use crate::error::{RangingError, Result};
use crate::sensor::Bounds;

#[derive(Debug, Clone)]
pub struct AveragingFilter {
    window: u32,
    average: Option<f64>,
}

impl AveragingFilter {
    pub fn new(window: u32) -> Self {
        Self { window: window.max(1), average: None }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn average(&self) -> Option<f64> {
        self.average
    }

    /// Fold one raw sample into the average and return the new average.
    ///
    /// `valid` must be the result of `bounds.admits(sample)`; a sample that is
    /// flagged invalid while lying strictly inside the bounds is reported as
    /// [`RangingError::InconsistentSample`] and leaves the average untouched.
    pub fn fold(&mut self, sensor: &str, sample: f64, valid: bool, bounds: Bounds) -> Result<f64> {
        let input = if valid {
            sample
        } else if sample <= bounds.lower {
            bounds.lower
        } else if sample >= bounds.upper {
            bounds.upper
        } else {
            return Err(RangingError::InconsistentSample {
                sensor: sensor.to_string(),
                distance: sample,
                lower: bounds.lower,
                upper: bounds.upper,
            });
        };

        let n = self.window as f64;
        let next = match self.average {
            None => input,
            Some(avg) => (avg * (n - 1.0) + input) / n,
        };
        self.average = Some(next);
        Ok(next)
    }
}
