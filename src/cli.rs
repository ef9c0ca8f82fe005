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

//! Command Line Interface

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "sonarray")]
#[command(version)]
#[command(about = "Sonarray - multi-sensor ultrasonic ranging over pigpiod")]
#[command(long_about = "Sonarray - multi-sensor ultrasonic ranging over pigpiod

Fires every configured HC-SR04 from one repeating trigger wave, times the
echo pulses and prints the last good distance of each sensor as JSON.

EXAMPLES:
    sonarray                            Run with the default config file
    sonarray --check                    Validate config and show the trigger schedule
    sonarray --once --interval-ms 2000  Print a single snapshot and exit

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Diagnostic log filter (overridden by --log-level)

FILES:
    ~/.config/sonarray/config.json      User configuration
    /etc/sonarray/config.json           System configuration")]
pub struct Cli {
    /// Config file (defaults to the user config, then the system config)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// pigpio daemon host, overriding the config file
    #[arg(long)]
    pub host: Option<String>,

    /// pigpio daemon port, overriding the config file
    #[arg(long)]
    pub port: Option<u16>,

    /// Diagnostic log filter, e.g. `info` or `sonarray=debug`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Snapshot poll interval in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Print one snapshot after the first interval, then stop
    #[arg(long)]
    pub once: bool,

    /// Validate the config and print the trigger schedule without connecting
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sonarray"]);
        assert_eq!(cli.interval_ms, 1000);
        assert!(!cli.once);
        assert!(!cli.check);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "sonarray", "--config", "/tmp/s.json", "--host", "pi4", "--port", "9999", "--once",
            "--interval-ms", "250",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(cli.host.as_deref(), Some("pi4"));
        assert_eq!(cli.port, Some(9999));
        assert_eq!(cli.interval_ms, 250);
        assert!(cli.once);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Cli::try_parse_from(["sonarray", "--interval-ms", "0"]).is_err());
    }
}
