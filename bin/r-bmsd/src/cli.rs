//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Command line surface of the R-BMS daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use r_bms_common::{AppConfig, LogLevel};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "R-BMS daemon: LG Resu battery monitor",
    long_about = None
)]
pub struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long = "if", value_name = "NAME", help = "Bus interface name (can0, vcan0, or virtual0 for an in-process bus)")]
    pub interface: Option<String>,

    #[arg(
        short = 'd',
        long = "log-level",
        value_name = "LEVEL",
        value_parser = clap::value_parser!(LogLevel),
        help = "Log level: debug, info, warn or error"
    )]
    pub log_level: Option<LogLevel>,

    #[arg(short = 'p', long = "port", value_name = "PORT", help = "HTTP query interface port")]
    pub port: Option<u16>,

    #[arg(long = "dr", value_name = "DIR", help = "Root directory of the datafile tree")]
    pub data_root: Option<PathBuf>,

    #[arg(short = 'r', long = "retention", value_name = "DAYS", help = "Datafile retention period in days")]
    pub retention_days: Option<u32>,

    #[arg(long = "record-interval", value_name = "SECS", help = "Seconds between recorded status samples")]
    pub record_interval: Option<u64>,

    #[arg(long, help = "Drive the bus with the built-in battery simulator")]
    pub simulate: bool,

    #[arg(
        short = 'v',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    pub version: bool,
}

impl Cli {
    /// Layer command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(interface) = &self.interface {
            config.bus.interface = interface.clone();
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(port) = self.port {
            config.api.listen.set_port(port);
        }
        if let Some(root) = &self.data_root {
            config.recorder.root = root.clone();
        }
        if let Some(days) = self.retention_days {
            config.recorder.retention_days = days;
        }
        if let Some(secs) = self.record_interval {
            config.recorder.interval = Duration::from_secs(secs);
        }
        if self.simulate {
            config.bus.simulate = true;
        }
    }
}

pub fn version_string() -> String {
    format!("r-bmsd {}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_match_the_classic_cli() {
        let cli = Cli::try_parse_from([
            "r-bmsd", "--if", "vcan1", "-d", "debug", "-p", "8080", "--dr", "/tmp/bms", "-r", "3",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.bus.interface, "vcan1");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.api.listen.port(), 8080);
        assert_eq!(config.api.listen.ip(), AppConfig::default().api.listen.ip());
        assert_eq!(config.recorder.root, PathBuf::from("/tmp/bms"));
        assert_eq!(config.recorder.retention_days, 3);
        assert!(!config.bus.simulate);
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let cli = Cli::try_parse_from(["r-bmsd"]).unwrap();
        let mut config: AppConfig = "[recorder]\nretention_days = 30\ninterval = 10\n"
            .parse()
            .unwrap();
        cli.apply(&mut config);
        assert_eq!(config.recorder.retention_days, 30);
        assert_eq!(config.recorder.interval, Duration::from_secs(10));
    }

    #[test]
    fn simulate_and_record_interval() {
        let cli =
            Cli::try_parse_from(["r-bmsd", "--simulate", "--record-interval", "5"]).unwrap();
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert!(config.bus.simulate);
        assert_eq!(config.recorder.interval, Duration::from_secs(5));
    }

    #[test]
    fn version_flag_is_lowercase_v() {
        assert!(Cli::try_parse_from(["r-bmsd", "-v"]).unwrap().version);
        assert!(Cli::try_parse_from(["r-bmsd", "-d", "verbose"]).is_err());
    }
}
