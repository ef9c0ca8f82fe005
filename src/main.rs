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

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use cli::Cli;
use sonarray::config::{config_path, load_config, period_ticks, resolve_sensors, system_config_path, RangingConfig};
use sonarray::waveform::TriggerWave;
use sonarray::{PigpioClient, RangingController};

/// Granularity of the shutdown check while waiting for the next poll
const SLEEP_SLICE: Duration = Duration::from_millis(50);

fn default_config_path() -> PathBuf {
    let user = config_path();
    if user.exists() {
        user
    } else {
        system_config_path()
    }
}

fn print_schedule(config: &RangingConfig) -> anyhow::Result<()> {
    let sensors = resolve_sensors(&config.sensors, &config.defaults)?;
    let period = period_ticks(config.period_s)?;
    let wave = TriggerWave::build(&sensors, period)?;

    println!("period: {} ticks, {} pulses", wave.period(), wave.pulses().len());
    for (slot, sensor) in wave.slots().iter().zip(&sensors) {
        println!(
            "{:<16} trigger {:>2}  sense {:>2}  pulse {:>7}..{:<7}  {:?}",
            slot.sensor, slot.pin, sensor.sense, slot.start, slot.end, sensor.kind
        );
    }
    Ok(())
}

/// Sleep for `total`, returning early once `running` is cleared
fn wait(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();

    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&path).with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(host) = cli.host {
        config.pigpio.host = host;
    }
    if let Some(port) = cli.port {
        config.pigpio.port = port;
    }
    info!("config: {}", path.display());

    if cli.check {
        return print_schedule(&config);
    }

    let facility = Arc::new(
        PigpioClient::connect(&config.pigpio.host, config.pigpio.port)
            .context("connecting to the pigpio daemon")?,
    );
    let controller = RangingController::from_config(&config, facility).context("starting ranging")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: interrupt received, stopping");
        flag.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    let interval = Duration::from_millis(cli.interval_ms);
    while running.load(Ordering::SeqCst) {
        wait(interval, &running);
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let snapshot = controller.last_known_good();
        println!("{}", serde_json::to_string(&snapshot)?);
        if cli.once {
            break;
        }
    }

    let dropped = controller.dropped_log_records();
    if dropped > 0 {
        warn!(dropped, "event log records were dropped");
    }
    controller.stop().context("stopping ranging")?;
    Ok(())
}
