//! Command-line interface handling for the Meridian binary.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config.toml";

/// Command line arguments parsed from user input.
///
/// Every option except `config_path` overrides a value from the
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Run as a slave host linked to this WebSocket URL instead of serving
    pub connect: Option<String>,
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            connect: matches.get_one::<String>("connect").cloned(),
        }
    }
}

fn command() -> Command {
    Command::new("Meridian")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Authoritative real-time multiplayer host")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:8080)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("connect")
                .long("connect")
                .value_name("URL")
                .help("Connect to an upstream server (ws://host:port) and run as its client"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serving_with_config_toml() {
        let args = CliArgs::try_parse_from(["meridian"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert_eq!(args.connect, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn parses_every_override() {
        let args = CliArgs::try_parse_from([
            "meridian",
            "--config",
            "prod.toml",
            "-b",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
            "--json-logs",
            "--connect",
            "ws://127.0.0.1:8080",
        ])
        .unwrap();

        assert_eq!(
            args,
            CliArgs {
                config_path: PathBuf::from("prod.toml"),
                bind_address: Some("0.0.0.0:9000".to_string()),
                log_level: Some("debug".to_string()),
                json_logs: true,
                connect: Some("ws://127.0.0.1:8080".to_string()),
            }
        );
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(CliArgs::try_parse_from(["meridian", "--plugins", "x"]).is_err());
    }
}
