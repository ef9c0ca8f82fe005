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

//! pigpio daemon client
//!
//! Talks to `pigpiod` over its socket interface. Two connections are used:
//!
//! - the command socket: 16-byte little-endian requests `cmd, p1, p2, p3`,
//!   optionally followed by `p3` extension bytes, answered by 16 bytes whose
//!   last word is the signed result
//! - the notification socket: switched into notify mode with `NOIB`, then
//!   streams 12-byte level reports `seqno:u16, flags:u16, tick:u32, level:u32`
//!
//! A listener thread turns level changes on monitored pins into edge
//! callbacks, in report order.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{RangingError, Result};
use crate::facility::{CallbackId, Edge, EdgeCallback, GpioFacility, Pin, PinMode, Pulse, WaveId};
use crate::tick::Tick;

const TIMEOUT_MS: u64 = 5000;

const REQUEST_SIZE: usize = 16;
const REPORT_SIZE: usize = 12;

/// Command numbers understood by pigpiod
pub mod cmd {
    pub const MODES: u32 = 0;
    pub const WRITE: u32 = 4;
    pub const BR1: u32 = 10;
    pub const TICK: u32 = 16;
    pub const NB: u32 = 19;
    pub const NC: u32 = 21;
    pub const WVCLR: u32 = 27;
    pub const WVAG: u32 = 28;
    pub const WVHLT: u32 = 33;
    pub const WVCRE: u32 = 49;
    pub const WVDEL: u32 = 50;
    pub const WVTXR: u32 = 52;
    pub const NOIB: u32 = 99;
}

const MODE_INPUT: u32 = 0;
const MODE_OUTPUT: u32 = 1;

/// Build a request frame; `p3` carries the extension length
pub fn encode_request(command: u32, p1: u32, p2: u32, ext: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(REQUEST_SIZE + ext.len());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&p1.to_le_bytes());
    buf.extend_from_slice(&p2.to_le_bytes());
    buf.extend_from_slice(&(ext.len() as u32).to_le_bytes());
    buf.extend_from_slice(ext);
    buf
}

/// Raw result word of a response frame
pub fn response_result(frame: &[u8; REQUEST_SIZE]) -> u32 {
    u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]])
}

/// Interpret a result word as a status: negative values are daemon errors
pub fn check_result(command: u32, raw: u32) -> Result<u32> {
    let code = raw as i32;
    if code < 0 {
        Err(RangingError::Command { cmd: command, code })
    } else {
        Ok(raw)
    }
}

/// Serialise pulses as `gpioOn, gpioOff, usDelay` triples
pub fn encode_pulses(pulses: &[Pulse]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pulses.len() * 12);
    for p in pulses {
        buf.extend_from_slice(&p.on.to_le_bytes());
        buf.extend_from_slice(&p.off.to_le_bytes());
        buf.extend_from_slice(&p.delay.to_le_bytes());
    }
    buf
}

/// One notification report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub seqno: u16,
    pub flags: u16,
    pub tick: Tick,
    pub level: u32,
}

impl Report {
    pub fn decode(buf: &[u8; REPORT_SIZE]) -> Self {
        Self {
            seqno: u16::from_le_bytes([buf[0], buf[1]]),
            flags: u16::from_le_bytes([buf[2], buf[3]]),
            tick: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            level: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    pub fn encode(&self) -> [u8; REPORT_SIZE] {
        let mut buf = [0u8; REPORT_SIZE];
        buf[0..2].copy_from_slice(&self.seqno.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tick.to_le_bytes());
        buf[8..12].copy_from_slice(&self.level.to_le_bytes());
        buf
    }
}

/// Edges implied by moving from `last` to `level`, restricted to `mask`,
/// lowest pin first
pub fn level_edges(last: u32, level: u32, mask: u32) -> Vec<(Pin, Edge)> {
    let changed = (last ^ level) & mask;
    (0..32u32)
        .filter(|pin| changed & (1 << pin) != 0)
        .map(|pin| (pin, Edge::from_level(level & (1 << pin) != 0)))
        .collect()
}

struct Dispatch {
    callbacks: HashMap<u64, (Pin, EdgeCallback)>,
    last_level: u32,
}

impl Dispatch {
    fn mask(&self) -> u32 {
        self.callbacks.values().fold(0, |m, (pin, _)| m | (1 << pin))
    }

    fn deliver(&mut self, report: Report) {
        // watchdog and keep-alive reports carry no level change
        if report.flags != 0 {
            return;
        }
        let edges = level_edges(self.last_level, report.level, self.mask());
        self.last_level = report.level;
        for (pin, edge) in edges {
            for (p, cb) in self.callbacks.values_mut() {
                if *p == pin {
                    cb(pin, edge, report.tick);
                }
            }
        }
    }
}

/// [`GpioFacility`] backed by a running pigpio daemon
pub struct PigpioClient {
    addr: String,
    command: Mutex<TcpStream>,
    notify: TcpStream,
    handle: u32,
    dispatch: Arc<Mutex<Dispatch>>,
    next_callback: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

fn connect_stream(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).map_err(|source| RangingError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn round_trip(stream: &mut TcpStream, command: u32, p1: u32, p2: u32, ext: &[u8]) -> Result<u32> {
    stream.write_all(&encode_request(command, p1, p2, ext))?;
    let mut frame = [0u8; REQUEST_SIZE];
    stream.read_exact(&mut frame)?;
    Ok(response_result(&frame))
}

impl PigpioClient {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);

        let command = connect_stream(&addr)?;
        command.set_read_timeout(Some(Duration::from_millis(TIMEOUT_MS)))?;
        command.set_write_timeout(Some(Duration::from_millis(TIMEOUT_MS)))?;

        let mut notify = connect_stream(&addr)?;
        notify.set_read_timeout(Some(Duration::from_millis(TIMEOUT_MS)))?;
        let handle = check_result(cmd::NOIB, round_trip(&mut notify, cmd::NOIB, 0, 0, &[])?)?;
        // reports arrive at the daemon's pace
        notify.set_read_timeout(None)?;

        let client = Self {
            addr,
            command: Mutex::new(command),
            notify: notify.try_clone()?,
            handle,
            dispatch: Arc::new(Mutex::new(Dispatch { callbacks: HashMap::new(), last_level: 0 })),
            next_callback: AtomicU64::new(1),
            listener: Mutex::new(None),
        };

        let initial = client.command_raw(cmd::BR1, 0, 0, &[])?;
        client.dispatch.lock().last_level = initial;

        let dispatch = Arc::clone(&client.dispatch);
        let handle = thread::Builder::new()
            .name("sonarray-notify".into())
            .spawn(move || listen(notify, dispatch))?;
        *client.listener.lock() = Some(handle);

        tracing::info!(addr = %client.addr, handle = client.handle, "connected to pigpio daemon");
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn command_raw(&self, command: u32, p1: u32, p2: u32, ext: &[u8]) -> Result<u32> {
        let mut stream = self.command.lock();
        round_trip(&mut stream, command, p1, p2, ext)
    }

    fn command(&self, command: u32, p1: u32, p2: u32, ext: &[u8]) -> Result<u32> {
        let raw = self.command_raw(command, p1, p2, ext)?;
        check_result(command, raw)
    }

    fn update_mask(&self, mask: u32) -> Result<()> {
        self.command(cmd::NB, self.handle, mask, &[])?;
        Ok(())
    }

    /// Delete every wave known to the daemon
    pub fn clear_waves(&self) -> Result<()> {
        self.command(cmd::WVCLR, 0, 0, &[])?;
        Ok(())
    }
}

fn listen(mut stream: TcpStream, dispatch: Arc<Mutex<Dispatch>>) {
    let mut buf = [0u8; REPORT_SIZE];
    loop {
        if let Err(e) = stream.read_exact(&mut buf) {
            tracing::debug!("notification stream closed: {}", e);
            return;
        }
        let report = Report::decode(&buf);
        tracing::trace!(seqno = report.seqno, tick = report.tick, level = report.level, "report");
        dispatch.lock().deliver(report);
    }
}

impl GpioFacility for PigpioClient {
    fn set_pin_mode(&self, pin: Pin, mode: PinMode) -> Result<()> {
        let m = match mode {
            PinMode::Input => MODE_INPUT,
            PinMode::Output => MODE_OUTPUT,
        };
        self.command(cmd::MODES, pin, m, &[])?;
        Ok(())
    }

    fn write(&self, pin: Pin, level: bool) -> Result<()> {
        self.command(cmd::WRITE, pin, level as u32, &[])?;
        Ok(())
    }

    fn register_edge_callback(&self, pin: Pin, callback: EdgeCallback) -> Result<CallbackId> {
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        let mask = {
            let mut dispatch = self.dispatch.lock();
            dispatch.callbacks.insert(id, (pin, callback));
            dispatch.mask()
        };
        if let Err(e) = self.update_mask(mask) {
            self.dispatch.lock().callbacks.remove(&id);
            return Err(e);
        }
        Ok(CallbackId(id))
    }

    fn cancel_callback(&self, id: CallbackId) -> Result<()> {
        let mask = {
            let mut dispatch = self.dispatch.lock();
            dispatch.callbacks.remove(&id.0);
            dispatch.mask()
        };
        self.update_mask(mask)
    }

    fn current_tick(&self) -> Result<Tick> {
        // the tick is unsigned; every result word is a valid value
        self.command_raw(cmd::TICK, 0, 0, &[])
    }

    fn build_repeating_wave(&self, pulses: &[Pulse]) -> Result<WaveId> {
        self.clear_waves()?;
        self.command(cmd::WVAG, 0, 0, &encode_pulses(pulses))?;
        let id = self.command(cmd::WVCRE, 0, 0, &[])?;
        Ok(WaveId(id))
    }

    fn start_wave(&self, id: WaveId) -> Result<()> {
        self.command(cmd::WVTXR, id.0, 0, &[])?;
        Ok(())
    }

    fn stop_wave(&self, _id: WaveId) -> Result<()> {
        self.command(cmd::WVHLT, 0, 0, &[])?;
        Ok(())
    }

    fn delete_wave(&self, id: WaveId) -> Result<()> {
        self.command(cmd::WVDEL, id.0, 0, &[])?;
        Ok(())
    }
}

impl Drop for PigpioClient {
    fn drop(&mut self) {
        if let Err(e) = self.command(cmd::NC, self.handle, 0, &[]) {
            tracing::debug!("closing notification handle: {}", e);
        }
        let _ = self.notify.shutdown(Shutdown::Both);
        if let Some(handle) = self.listener.lock().take() {
            if handle.join().is_err() {
                tracing::error!("notification listener panicked");
            }
        }
    }
}
