//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the YAML file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Relays Alertmanager notifications to Feishu, Dingding and WeChat Work.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port for the inbound webhook server.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Default log filter (e.g. "debug" or "alertrelay=trace").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut server = Dict::new();
        if let Some(port) = self.port {
            server.insert("port".into(), Value::from(port));
        }

        let mut logging = Dict::new();
        if let Some(level) = &self.log_level {
            logging.insert("level".into(), Value::from(level.clone()));
        }

        let mut dict = Dict::new();
        if !server.is_empty() {
            dict.insert("server".into(), Value::from(server));
        }
        if !logging.is_empty() {
            dict.insert("logging".into(), Value::from(logging));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
