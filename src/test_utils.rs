/*
 * Test utilities and in-memory doubles for Sonarray
 *
 * This module provides a simulated GPIO facility, a recording event handle
 * and config builders shared by the unit test modules.
 */

#[cfg(test)]
pub mod test_helpers {
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::config::{SensorConfig, SensorKind};
    use crate::error::{RangingError, Result};
    use crate::facility::{CallbackId, Edge, EdgeCallback, GpioFacility, Pin, PinMode, Pulse, WaveId};
    use crate::logger::LogTier;
    use crate::sensor::{Bounds, Reading, SensorEvents};
    use crate::tick::Tick;

    /// Plain sensor config with default bounds
    pub fn plain_config(name: &str, trigger: Pin, sense: Pin, phase_offset: u32) -> SensorConfig {
        SensorConfig {
            name: name.to_string(),
            trigger,
            sense,
            bounds: Bounds::default(),
            phase_offset,
            kind: SensorKind::Plain,
        }
    }

    /// Averaging sensor config with default bounds
    pub fn averaging_config(name: &str, trigger: Pin, sense: Pin, phase_offset: u32, window: u32) -> SensorConfig {
        SensorConfig {
            kind: SensorKind::Averaging { window },
            ..plain_config(name, trigger, sense, phase_offset)
        }
    }

    type SharedCallback = Arc<Mutex<EdgeCallback>>;

    #[derive(Default)]
    struct SimState {
        modes: HashMap<Pin, PinMode>,
        writes: Vec<(Pin, bool)>,
        callbacks: HashMap<u64, (Pin, SharedCallback)>,
        next_callback: u64,
        waves: HashMap<u32, Vec<Pulse>>,
        next_wave: u32,
        transmitting: Option<WaveId>,
        tick: Tick,
        fail_on: Option<&'static str>,
    }

    /// In-memory GPIO facility that records every call and fires edges on demand
    #[derive(Default)]
    pub struct SimFacility {
        state: Mutex<SimState>,
    }

    impl SimFacility {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> Arc<Self> {
            Arc::new(Self::new())
        }

        /// Make the named operation fail from now on
        pub fn fail_on(&self, op: &'static str) {
            self.state.lock().fail_on = Some(op);
        }

        pub fn mode_of(&self, pin: Pin) -> Option<PinMode> {
            self.state.lock().modes.get(&pin).copied()
        }

        pub fn writes(&self) -> Vec<(Pin, bool)> {
            self.state.lock().writes.clone()
        }

        pub fn callback_count(&self) -> usize {
            self.state.lock().callbacks.len()
        }

        pub fn wave_count(&self) -> usize {
            self.state.lock().waves.len()
        }

        pub fn transmitting(&self) -> Option<WaveId> {
            self.state.lock().transmitting
        }

        pub fn pulses_of(&self, id: WaveId) -> Option<Vec<Pulse>> {
            self.state.lock().waves.get(&id.0).cloned()
        }

        /// Deliver an edge on `pin` to every callback registered for it
        pub fn fire(&self, pin: Pin, edge: Edge, tick: Tick) -> usize {
            let targets: Vec<SharedCallback> = {
                let mut state = self.state.lock();
                state.tick = tick;
                state
                    .callbacks
                    .values()
                    .filter(|(p, _)| *p == pin)
                    .map(|(_, cb)| cb.clone())
                    .collect()
            };
            for cb in &targets {
                let mut f = cb.lock();
                (*f)(pin, edge, tick);
            }
            targets.len()
        }

        /// One echo pulse of `width` ticks starting at `start`
        pub fn echo(&self, pin: Pin, start: Tick, width: u32) {
            self.fire(pin, Edge::Rising, start);
            self.fire(pin, Edge::Falling, start.wrapping_add(width));
        }

        fn check(&self, op: &'static str) -> Result<()> {
            match self.state.lock().fail_on {
                Some(f) if f == op => Err(RangingError::facility(format!("injected failure in {}", op))),
                _ => Ok(()),
            }
        }
    }

    impl GpioFacility for SimFacility {
        fn set_pin_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
            self.check("set_pin_mode")?;
            self.state.lock().modes.insert(pin, mode);
            Ok(())
        }

        fn write(&self, pin: Pin, level: bool) -> Result<()> {
            self.check("write")?;
            self.state.lock().writes.push((pin, level));
            Ok(())
        }

        fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<CallbackId> {
            self.check("register_edge_callback")?;
            let mut state = self.state.lock();
            state.next_callback += 1;
            let id = state.next_callback;
            state.callbacks.insert(id, (pin, Arc::new(Mutex::new(callback))));
            Ok(CallbackId(id))
        }

        fn cancel_callback(&self, id: CallbackId) -> Result<()> {
            self.check("cancel_callback")?;
            self.state.lock().callbacks.remove(&id.0);
            Ok(())
        }

        fn current_tick(&self) -> Result<Tick> {
            self.check("current_tick")?;
            Ok(self.state.lock().tick)
        }

        fn build_repeating_wave(&self, pulses: &[Pulse]) -> Result<WaveId> {
            self.check("build_repeating_wave")?;
            let mut state = self.state.lock();
            let id = state.next_wave;
            state.next_wave += 1;
            state.waves.insert(id, pulses.to_vec());
            Ok(WaveId(id))
        }

        fn start_wave(&self, id: WaveId) -> Result<()> {
            self.check("start_wave")?;
            let mut state = self.state.lock();
            if !state.waves.contains_key(&id.0) {
                return Err(RangingError::facility(format!("unknown wave {}", id.0)));
            }
            state.transmitting = Some(id);
            Ok(())
        }

        fn stop_wave(&self, id: WaveId) -> Result<()> {
            self.check("stop_wave")?;
            let mut state = self.state.lock();
            if state.transmitting == Some(id) {
                state.transmitting = None;
            }
            Ok(())
        }

        fn delete_wave(&self, id: WaveId) -> Result<()> {
            self.check("delete_wave")?;
            self.state.lock().waves.remove(&id.0);
            Ok(())
        }
    }

    pub type LoggedEvent = (LogTier, Tick, String, String);

    /// Event handle that keeps everything it is given
    #[derive(Default)]
    pub struct RecordingEvents {
        logs: Mutex<Vec<LoggedEvent>>,
        readings: Mutex<Vec<Reading>>,
    }

    impl RecordingEvents {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn logs(&self) -> Vec<LoggedEvent> {
            self.logs.lock().clone()
        }

        pub fn readings(&self) -> Vec<Reading> {
            self.readings.lock().clone()
        }

        pub fn clear(&self) {
            self.logs.lock().clear();
            self.readings.lock().clear();
        }
    }

    impl SensorEvents for RecordingEvents {
        fn enabled(&self, _tier: LogTier) -> bool {
            true
        }

        fn log(&self, tier: LogTier, tick: Tick, source: &str, message: &str) {
            self.logs.lock().push((tier, tick, source.to_string(), message.to_string()));
        }

        fn reading(&self, reading: &Reading) {
            self.readings.lock().push(reading.clone());
        }
    }

    /// Asserts that two floating point numbers are approximately equal
    pub fn assert_approx_eq(a: f64, b: f64, tolerance: f64) {
        assert!(
            (a - b).abs() < tolerance,
            "Values {} and {} are not approximately equal (tolerance: {})",
            a, b, tolerance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use crate::config::SensorKind;
    use crate::facility::{Edge, GpioFacility, PinMode, Pulse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_config_builders() {
        let p = plain_config("left", 6, 23, 120);
        assert_eq!(p.kind, SensorKind::Plain);
        assert_eq!(p.phase_offset, 120);
        let a = averaging_config("right", 12, 22, 20, 8);
        assert_eq!(a.kind, SensorKind::Averaging { window: 8 });
        assert_eq!(a.trigger, 12);
    }

    #[test]
    fn test_sim_facility_dispatches_by_pin() {
        let sim = SimFacility::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = sim
            .register_edge_callback(23, Box::new(move |_, _, _| {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(sim.fire(22, Edge::Rising, 1), 0);
        assert_eq!(sim.fire(23, Edge::Rising, 2), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sim.current_tick().unwrap(), 2);

        sim.cancel_callback(id).unwrap();
        assert_eq!(sim.fire(23, Edge::Falling, 3), 0);
    }

    #[test]
    fn test_sim_facility_waves_and_failures() {
        let sim = SimFacility::new();
        sim.set_pin_mode(6, PinMode::Output).unwrap();
        assert_eq!(sim.mode_of(6), Some(PinMode::Output));

        let id = sim.build_repeating_wave(&[Pulse::idle(100)]).unwrap();
        sim.start_wave(id).unwrap();
        assert_eq!(sim.transmitting(), Some(id));
        sim.stop_wave(id).unwrap();
        assert_eq!(sim.transmitting(), None);

        sim.fail_on("write");
        assert!(sim.write(6, true).is_err());
        assert!(sim.set_pin_mode(7, PinMode::Input).is_ok());
    }

    #[test]
    fn test_assert_approx_eq() {
        assert_approx_eq(1.7015, 1.70151, 1e-3);
    }

    #[test]
    #[should_panic]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq(1.0, 1.1, 0.01);
    }
}
