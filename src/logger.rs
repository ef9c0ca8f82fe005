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

//! Ranging event log
//!
//! Sensors and the controller log through tiers, bit-significant like the
//! `levels` setting:
//!
//! | bit | tier       | content                              |
//! |-----|------------|--------------------------------------|
//! | 1   | `SETUP`    | setup and closedown                  |
//! | 2   | `EDGES`    | rising edges on sense pins           |
//! | 4   | `ERRORS`   | errors and unexpected conditions     |
//! | 8   | `MEASURES` | completed measures                   |
//!
//! Records are queued from the callback context and written by a dedicated
//! thread, so sink I/O never stalls edge dispatch.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::tick::{ClockTime, Tick};

const QUEUE_DEPTH: usize = 1024;

pub const DEFAULT_READING_FORMAT: &str = "{sensor}, {valid}, {minutes}:{seconds},      {distance}cm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTier(u8);

impl LogTier {
    pub const SETUP: LogTier = LogTier(1);
    pub const EDGES: LogTier = LogTier(2);
    pub const ERRORS: LogTier = LogTier(4);
    pub const MEASURES: LogTier = LogTier(8);

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Set of enabled tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLevels(u8);

impl LogLevels {
    pub const NONE: LogLevels = LogLevels(0);
    pub const ALL: LogLevels = LogLevels(0x0f);

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn enabled(self, tier: LogTier) -> bool {
        self.0 & tier.0 != 0
    }
}

impl Default for LogLevels {
    fn default() -> Self {
        Self(LogTier::SETUP.0 | LogTier::EDGES.0)
    }
}

/// Fields handed to the reading formatter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingRecord {
    pub sensor: String,
    pub valid: bool,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: f64,
    pub distance: f64,
    pub tick: Tick,
}

impl ReadingRecord {
    pub fn new(sensor: &str, valid: bool, distance: f64, tick: Tick) -> Self {
        let clock = ClockTime::from_tick(tick);
        Self {
            sensor: sensor.to_string(),
            valid,
            hours: clock.hours,
            minutes: clock.minutes,
            seconds: clock.seconds,
            distance,
            tick,
        }
    }
}

/// Render a reading through a template with named fields.
///
/// Recognised fields are `{sensor}`, `{valid}` (0/1), `{hours}`, `{minutes}`,
/// `{seconds}` and `{distance}`. Anything else is copied through unchanged.
pub fn format_reading(template: &str, record: &ReadingRecord) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };
        let field = &after[1..close];
        match field {
            "sensor" => out.push_str(&record.sensor),
            "valid" => out.push_str(if record.valid { "1" } else { "0" }),
            "hours" => out.push_str(&format!("{:02}", record.hours)),
            "minutes" => out.push_str(&format!("{:02}", record.minutes)),
            "seconds" => out.push_str(&format!("{:05.2}", record.seconds)),
            "distance" => out.push_str(&format!("{:5.2}", record.distance)),
            _ => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Render a tiered event line: tick, source, message
pub fn format_event(tick: Tick, source: &str, message: &str) -> String {
    format!("{:>10} ({:>6}): {}", tick, source, message)
}

/// Sink settings, resolved from the `log` section of the config
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub levels: LogLevels,
    pub print: bool,
    pub file: Option<PathBuf>,
    pub json: bool,
    pub reading_format: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            levels: LogLevels::default(),
            print: true,
            file: None,
            json: false,
            reading_format: Some(DEFAULT_READING_FORMAT.to_string()),
        }
    }
}

impl LogSettings {
    /// Settings with no sinks at all
    pub fn silent() -> Self {
        Self {
            levels: LogLevels::NONE,
            print: false,
            file: None,
            json: false,
            reading_format: None,
        }
    }
}

enum Record {
    Event { tick: Tick, source: String, message: String },
    Reading(ReadingRecord),
}

/// Tiered event log with a background writer
pub struct EventLog {
    levels: LogLevels,
    tx: RwLock<Option<SyncSender<Record>>>,
    writer: Mutex<Option<JoinHandle<io::Result<()>>>>,
    readings: bool,
    dropped: AtomicU64,
}

impl EventLog {
    pub fn open(settings: &LogSettings) -> Result<Self> {
        let file = match &settings.file {
            Some(path) => Some(open_log_file(path)?),
            None => None,
        };

        let has_sink = settings.print || file.is_some();
        let (tx, writer) = if has_sink {
            let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
            let sinks = Sinks {
                print: settings.print,
                file,
                json: settings.json,
                reading_format: settings.reading_format.clone(),
            };
            let handle = thread::Builder::new()
                .name("sonarray-log".into())
                .spawn(move || sinks.drain(rx, console()))?;
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            levels: settings.levels,
            tx: RwLock::new(tx),
            writer: Mutex::new(writer),
            readings: settings.reading_format.is_some(),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn levels(&self) -> LogLevels {
        self.levels
    }

    pub fn enabled(&self, tier: LogTier) -> bool {
        self.levels.enabled(tier)
    }

    /// Records lost because the writer could not keep up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn event(&self, tier: LogTier, tick: Tick, source: &str, message: &str) {
        if !self.enabled(tier) {
            return;
        }
        match tier {
            LogTier::ERRORS => tracing::warn!(tick, source, "{}", message),
            LogTier::MEASURES => tracing::debug!(tick, source, "{}", message),
            LogTier::EDGES => tracing::trace!(tick, source, "{}", message),
            _ => tracing::info!(tick, source, "{}", message),
        }
        self.push(Record::Event {
            tick,
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    pub fn reading(&self, record: ReadingRecord) {
        if self.readings {
            self.push(Record::Reading(record));
        }
    }

    fn push(&self, record: Record) {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else { return };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Close the queue, wait for the writer to drain it and flush the file
    pub fn close(&self) -> Result<()> {
        self.tx.write().take();
        if let Some(handle) = self.writer.lock().take() {
            match handle.join() {
                Ok(res) => res?,
                Err(_) => tracing::error!("log writer thread panicked"),
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "log records dropped while the writer was busy");
        }
        Ok(())
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}

/// Printed lines go to stderr; stdout carries the snapshot output
fn console() -> io::Stderr {
    io::stderr()
}

struct Sinks {
    print: bool,
    file: Option<File>,
    json: bool,
    reading_format: Option<String>,
}

impl Sinks {
    fn drain<W: Write>(self, rx: Receiver<Record>, mut console: W) -> io::Result<()> {
        let Sinks { print, file, json, reading_format } = self;
        let mut file = file.map(BufWriter::new);

        while let Ok(first) = rx.recv() {
            let mut next = Some(first);
            while let Some(record) = next {
                let text = match &record {
                    Record::Event { tick, source, message } => format_event(*tick, source, message),
                    Record::Reading(r) => {
                        format_reading(reading_format.as_deref().unwrap_or(DEFAULT_READING_FORMAT), r)
                    }
                };
                if print {
                    let _ = writeln!(console, "{}", text);
                }
                if let Some(f) = file.as_mut() {
                    if json {
                        writeln!(f, "{}", json_line(&record))?;
                    } else {
                        writeln!(f, "{}", text)?;
                    }
                }
                next = rx.try_recv().ok();
            }
            if let Some(f) = file.as_mut() {
                f.flush()?;
            }
        }

        if let Some(mut f) = file {
            f.flush()?;
        }
        Ok(())
    }
}

fn json_line(record: &Record) -> String {
    match record {
        Record::Event { tick, source, message } => json!({
            "tick": tick,
            "source": source,
            "event": "log",
            "data": { "message": message },
        }),
        Record::Reading(r) => json!({
            "tick": r.tick,
            "source": r.sensor,
            "event": "reading",
            "data": r,
        }),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(valid: bool) -> ReadingRecord {
        ReadingRecord::new("left", valid, 12.3456, 62_500_000)
    }

    #[test]
    fn test_levels_are_bit_significant() {
        let levels = LogLevels::new(1 | 8);
        assert!(levels.enabled(LogTier::SETUP));
        assert!(!levels.enabled(LogTier::EDGES));
        assert!(!levels.enabled(LogTier::ERRORS));
        assert!(levels.enabled(LogTier::MEASURES));
        assert!(LogLevels::ALL.enabled(LogTier::ERRORS));
        assert!(!LogLevels::NONE.enabled(LogTier::SETUP));
    }

    #[test]
    fn test_default_levels() {
        let levels = LogLevels::default();
        assert_eq!(levels.bits(), 3);
    }

    #[test]
    fn test_levels_deserialize_from_number() {
        let levels: LogLevels = serde_json::from_str("12").unwrap();
        assert!(levels.enabled(LogTier::ERRORS));
        assert!(levels.enabled(LogTier::MEASURES));
        assert!(!levels.enabled(LogTier::SETUP));
    }

    #[test]
    fn test_reading_record_time_fields() {
        let r = record(true);
        assert_eq!(r.hours, 0);
        assert_eq!(r.minutes, 1);
        assert!((r.seconds - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_format_reading_default_template() {
        let line = format_reading(DEFAULT_READING_FORMAT, &record(true));
        assert_eq!(line, "left, 1, 01:02.50,      12.35cm");
    }

    #[test]
    fn test_format_reading_all_fields() {
        let line = format_reading("{hours}|{minutes}|{seconds}|{valid}|{distance}|{sensor}", &record(false));
        assert_eq!(line, "00|01|02.50|0|12.35|left");
    }

    #[test]
    fn test_format_reading_keeps_unknown_and_unclosed() {
        assert_eq!(format_reading("{nope} {sensor}", &record(true)), "{nope} left");
        assert_eq!(format_reading("x {sensor", &record(true)), "x {sensor");
    }

    #[test]
    fn test_format_event() {
        assert_eq!(format_event(42, "left", "closed"), "        42 (  left): closed");
    }

    #[test]
    fn test_silent_log_accepts_records() {
        let log = EventLog::open(&LogSettings::silent()).unwrap();
        log.event(LogTier::SETUP, 1, "master", "ignored");
        log.reading(record(true));
        assert_eq!(log.dropped(), 0);
        log.close().unwrap();
    }

    #[test]
    fn test_file_sink_writes_enabled_tiers_and_readings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("ranging.log");
        let settings = LogSettings {
            levels: LogLevels::new(LogTier::SETUP.bits()),
            print: false,
            file: Some(path.clone()),
            json: false,
            reading_format: Some("{sensor}={distance}".to_string()),
        };
        let log = EventLog::open(&settings).unwrap();
        log.event(LogTier::SETUP, 7, "master", "2 sensors started");
        log.event(LogTier::EDGES, 8, "left", "filtered out");
        log.reading(record(true));
        log.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("(master): 2 sensors started"));
        assert_eq!(lines[1], "left=12.35");
    }

    #[test]
    fn test_json_file_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranging.json");
        let settings = LogSettings {
            levels: LogLevels::ALL,
            print: false,
            file: Some(path.clone()),
            json: true,
            reading_format: Some(DEFAULT_READING_FORMAT.to_string()),
        };
        let log = EventLog::open(&settings).unwrap();
        log.event(LogTier::ERRORS, 99, "right", "unexpected falling edge");
        log.reading(record(false));
        log.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let values: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["event"], "log");
        assert_eq!(values[0]["tick"], 99);
        assert_eq!(values[1]["event"], "reading");
        assert_eq!(values[1]["data"]["valid"], false);
        assert_eq!(values[1]["data"]["minutes"], 1);
    }

    #[test]
    fn test_print_sink_writes_to_console() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(Record::Event { tick: 5, source: "master".into(), message: "started".into() }).unwrap();
        tx.send(Record::Reading(record(true))).unwrap();
        drop(tx);

        let sinks = Sinks { print: true, file: None, json: false, reading_format: None };
        let mut out = Vec::new();
        sinks.drain(rx, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{}\nleft, 1, 01:02.50,      12.35cm\n", format_event(5, "master", "started"))
        );

        // printed lines must never share stdout with snapshot JSON
        let _: io::Stderr = console();
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let settings = LogSettings {
            file: Some(dir.path().join("a.log")),
            print: false,
            ..LogSettings::default()
        };
        let log = EventLog::open(&settings).unwrap();
        log.close().unwrap();
        log.close().unwrap();
        log.event(LogTier::SETUP, 0, "master", "after close");
        assert_eq!(log.dropped(), 0);
    }
}
