// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line arguments and configuration resolution.

use std::path::PathBuf;

use clap::Parser;

use scanwerk_core::config::ClientConfig;
use scanwerk_core::error::Result;

/// Config file looked for when `--config` is not given.
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Parser)]
#[command(name = "scanwerk")]
#[command(about = "Scan from eSCL (AirScan) network scanners.", version)]
pub struct CommandLine {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How long to search for scanners, in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Scanner to offer without mDNS, e.g. http://192.168.1.20/eSCL (repeatable)
    #[arg(short = 'd', long = "device-url")]
    pub device_urls: Vec<String>,

    /// Skip the network search and only use --device-url scanners
    #[arg(long, requires = "device_urls")]
    pub no_discovery: bool,

    /// Directory scanned pages are written to
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// File name prefix for scanned pages
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Reject self-signed scanner certificates
    #[arg(long)]
    pub strict_tls: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Settings from the config file (if any) with flags applied on top.
    ///
    /// An explicit `--config` must exist; the default location is optional.
    pub fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => {
                let path = config_dir().join(CONFIG_FILE);
                if path.is_file() {
                    ClientConfig::load(&path)?
                } else {
                    ClientConfig::default()
                }
            }
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ClientConfig) {
        if let Some(secs) = self.timeout {
            config.discovery_timeout_ms = secs.saturating_mul(1_000);
        }
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.file_prefix = prefix.clone();
        }
        if self.strict_tls {
            config.accept_invalid_certs = false;
        }
    }
}

/// `$XDG_CONFIG_HOME/scanwerk`, falling back to `~/.config/scanwerk`.
pub fn config_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config")
    } else {
        PathBuf::from(".")
    };
    base.join("scanwerk")
}
