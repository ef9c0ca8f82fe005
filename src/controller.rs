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

//! Ranging controller
//!
//! Owns the sensors, installs the shared trigger wave and publishes the
//! last good distance of every sensor. Edge callbacks run on the facility's
//! thread; each one locks only its own sensor. Published distances live in
//! one atomic slot per sensor so pollers never block and never see a torn
//! value.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::{
    period_ticks, resolve_sensors, validate_sensor_set, RangingConfig, SensorConfig, SensorDefaults, SensorSpec,
};
use crate::error::Result;
use crate::facility::{CallbackId, GpioFacility, Pin, PinMode, WaveId};
use crate::logger::{EventLog, LogSettings, LogTier, ReadingRecord};
use crate::sensor::{Reading, Sensor, SensorEvents, SensorState};
use crate::tick::Tick;
use crate::waveform::TriggerWave;

/// Event source name used for controller messages
const SOURCE: &str = "ctrl";

/// Slot value meaning no valid reading has been published yet
const NONE_YET: u64 = u64::MAX;

/// Point-in-time view of every sensor's last good distance, in
/// configuration order
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entries: Vec<(String, Option<f64>)>,
}

impl Snapshot {
    /// `None` if the sensor is unknown, `Some(None)` if it has no good reading yet
    pub fn get(&self, name: &str) -> Option<Option<f64>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| *d)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), *d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, distance) in &self.entries {
            map.serialize_entry(name, distance)?;
        }
        map.end()
    }
}

struct Slot {
    name: String,
    bits: AtomicU64,
}

/// Outward handle shared by all sensors: publishes good readings and
/// forwards everything to the event log
pub struct Publisher {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    log: EventLog,
}

impl Publisher {
    fn new(configs: &[SensorConfig], log: EventLog) -> Self {
        let slots: Vec<Slot> = configs
            .iter()
            .map(|c| Slot { name: c.name.clone(), bits: AtomicU64::new(NONE_YET) })
            .collect();
        let index = slots.iter().enumerate().map(|(i, s)| (s.name.clone(), i)).collect();
        Self { slots, index, log }
    }

    pub fn on_reading(&self, reading: &Reading) {
        match self.index.get(&reading.sensor) {
            Some(&i) => {
                if reading.valid {
                    self.slots[i].bits.store(reading.distance_cm.to_bits(), Ordering::Release);
                }
            }
            None => tracing::warn!(sensor = %reading.sensor, "reading from unknown sensor"),
        }
        self.log.reading(ReadingRecord::new(&reading.sensor, reading.valid, reading.distance_cm, reading.tick));
    }

    pub fn snapshot(&self) -> Snapshot {
        let entries = self
            .slots
            .iter()
            .map(|s| {
                let bits = s.bits.load(Ordering::Acquire);
                let distance = if bits == NONE_YET { None } else { Some(f64::from_bits(bits)) };
                (s.name.clone(), distance)
            })
            .collect();
        Snapshot { entries }
    }

    fn event(&self, tier: LogTier, tick: Tick, message: impl FnOnce() -> String) {
        if self.log.enabled(tier) {
            self.log.event(tier, tick, SOURCE, &message());
        }
    }
}

impl SensorEvents for Publisher {
    fn enabled(&self, tier: LogTier) -> bool {
        self.log.enabled(tier)
    }

    fn log(&self, tier: LogTier, tick: Tick, source: &str, message: &str) {
        self.log.event(tier, tick, source, message);
    }

    fn reading(&self, reading: &Reading) {
        self.on_reading(reading);
    }
}

/// Cloneable, thread-safe handle for pollers
#[derive(Clone)]
pub struct SnapshotReader(Arc<Publisher>);

impl SnapshotReader {
    pub fn last_known_good(&self) -> Snapshot {
        self.0.snapshot()
    }
}

struct Installed {
    name: String,
    sensor: Arc<Mutex<Sensor>>,
    callback: CallbackId,
}

/// Facility state touched so far, undone in reverse on failure
enum Undo {
    TriggerPin(Pin),
    Callback(CallbackId),
    Wave(WaveId),
    Transmitting(WaveId),
}

fn roll_back(facility: &dyn GpioFacility, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        let res = match step {
            Undo::TriggerPin(pin) => facility.set_pin_mode(pin, PinMode::Input),
            Undo::Callback(id) => facility.cancel_callback(id),
            Undo::Wave(id) => facility.delete_wave(id),
            Undo::Transmitting(id) => facility.stop_wave(id),
        };
        if let Err(e) = res {
            tracing::warn!("rollback step failed: {}", e);
        }
    }
}

pub struct RangingController {
    facility: Arc<dyn GpioFacility>,
    sensors: Vec<Installed>,
    publisher: Arc<Publisher>,
    wave: TriggerWave,
    wave_id: WaveId,
    stopped: bool,
}

impl fmt::Debug for RangingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangingController")
            .field("sensors", &self.sensor_names())
            .field("wave_id", &self.wave_id)
            .field("period", &self.wave.period())
            .finish()
    }
}

impl RangingController {
    /// Build from a loaded config file
    pub fn from_config(config: &RangingConfig, facility: Arc<dyn GpioFacility>) -> Result<Self> {
        Self::configure(&config.sensors, &config.defaults, config.period_s, &config.log.settings(), facility)
    }

    /// Merge `specs` onto `defaults`, build every sensor and install the
    /// trigger wave. Either the controller is fully running or every
    /// facility change made on the way has been undone.
    pub fn configure(
        specs: &[SensorSpec],
        defaults: &SensorDefaults,
        period_s: f64,
        log: &LogSettings,
        facility: Arc<dyn GpioFacility>,
    ) -> Result<Self> {
        let configs = resolve_sensors(specs, defaults)?;
        let period = period_ticks(period_s)?;
        Self::from_sensor_configs(configs, period, log, facility)
    }

    /// Same as [`configure`](Self::configure) for already resolved sensors
    pub fn from_sensor_configs(
        configs: Vec<SensorConfig>,
        period: u32,
        log: &LogSettings,
        facility: Arc<dyn GpioFacility>,
    ) -> Result<Self> {
        // nothing is opened or touched until the whole set is known good
        validate_sensor_set(&configs)?;
        let wave = TriggerWave::build(&configs, period)?;

        let mut sensors = Vec::with_capacity(configs.len());
        let log = EventLog::open(log)?;
        let publisher = Arc::new(Publisher::new(&configs, log));
        for cfg in &configs {
            let events: Arc<dyn SensorEvents> = publisher.clone();
            match Sensor::new(cfg, events) {
                Ok(s) => sensors.push(s),
                Err(e) => {
                    publisher.log.close()?;
                    return Err(e);
                }
            }
        }

        let mut undo = Vec::new();
        match Self::install(facility.as_ref(), sensors, &wave, &publisher, &mut undo) {
            Ok((installed, wave_id)) => Ok(Self {
                facility,
                sensors: installed,
                publisher,
                wave,
                wave_id,
                stopped: false,
            }),
            Err(e) => {
                tracing::error!("ranging setup failed, rolling back: {}", e);
                roll_back(facility.as_ref(), undo);
                if let Err(close) = publisher.log.close() {
                    tracing::warn!("closing event log: {}", close);
                }
                Err(e)
            }
        }
    }

    fn install(
        facility: &dyn GpioFacility,
        sensors: Vec<Sensor>,
        wave: &TriggerWave,
        publisher: &Arc<Publisher>,
        undo: &mut Vec<Undo>,
    ) -> Result<(Vec<Installed>, WaveId)> {
        let tick = facility.current_tick()?;
        let mut installed = Vec::with_capacity(sensors.len());

        for sensor in sensors {
            let (trigger, sense) = (sensor.trigger(), sensor.sense());
            undo.push(Undo::TriggerPin(trigger));
            facility.set_pin_mode(trigger, PinMode::Output)?;
            facility.write(trigger, false)?;
            facility.set_pin_mode(sense, PinMode::Input)?;

            sensor.log(LogTier::SETUP, tick, || {
                format!("HC-SR04 {} init: trigger pin {}, sense pin {}", sensor.name(), trigger, sense)
            });
            let name = sensor.name().to_string();
            let cell = Arc::new(Mutex::new(sensor));
            let target = Arc::clone(&cell);
            let callback = facility.register_edge_callback(
                sense,
                Box::new(move |_pin, edge, tick| {
                    target.lock().on_edge(edge, tick);
                }),
            )?;
            undo.push(Undo::Callback(callback));
            installed.push(Installed { name, sensor: cell, callback });
        }

        let wave_id = facility.build_repeating_wave(wave.pulses())?;
        undo.push(Undo::Wave(wave_id));
        facility.start_wave(wave_id)?;
        undo.push(Undo::Transmitting(wave_id));

        publisher.event(LogTier::SETUP, tick, || {
            format!("wave {} installed, {} pulses over {} ticks", wave_id.0, wave.pulses().len(), wave.duration())
        });
        publisher.event(LogTier::SETUP, tick, || format!("{} sensors started", installed.len()));
        tracing::info!(sensors = installed.len(), wave = wave_id.0, period = wave.period(), "ranging started");
        Ok((installed, wave_id))
    }

    /// Last good distance of every sensor, `None` until one has been seen
    pub fn last_known_good(&self) -> Snapshot {
        self.publisher.snapshot()
    }

    /// Handle that can outlive borrows of the controller, for poller threads
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader(Arc::clone(&self.publisher))
    }

    /// Publish and log a reading
    pub fn on_reading(&self, reading: &Reading) {
        self.publisher.on_reading(reading);
    }

    pub fn sensor_names(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sensor_state(&self, name: &str) -> Option<SensorState> {
        self.sensors.iter().find(|s| s.name == name).map(|s| s.sensor.lock().state())
    }

    pub fn wave(&self) -> &TriggerWave {
        &self.wave
    }

    pub fn wave_id(&self) -> WaveId {
        self.wave_id
    }

    /// Event records lost because the log writer fell behind
    pub fn dropped_log_records(&self) -> u64 {
        self.publisher.log.dropped()
    }

    /// Halt the wave, stop every sensor and close the log. Every step is
    /// attempted; the first facility failure is returned.
    pub fn stop(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let facility = self.facility.as_ref();
        let mut first_err = None;
        let mut note = |res: Result<()>| {
            if let Err(e) = res {
                tracing::warn!("stop: {}", e);
                first_err.get_or_insert(e);
            }
        };

        note(facility.stop_wave(self.wave_id));
        note(facility.delete_wave(self.wave_id));
        for s in &self.sensors {
            note(facility.cancel_callback(s.callback));
            note(s.sensor.lock().stop(facility));
        }

        let tick = facility.current_tick().unwrap_or(0);
        self.publisher.event(LogTier::SETUP, tick, || format!("{} sensors stopped", self.sensors.len()));
        note(self.publisher.log.close());
        tracing::info!("ranging stopped");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for RangingController {
    fn drop(&mut self) {
        if !self.stopped {
            tracing::warn!("ranging controller dropped without stop()");
            if let Err(e) = self.teardown() {
                tracing::warn!("teardown on drop: {}", e);
            }
        }
    }
}
