//! Dispatcher configuration (env-driven).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::platform::DispatchMode;

/// Game server region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Region {
    #[default]
    Us,
    Uk,
    Aus,
    Ger,
    Nld,
}

impl Region {
    /// Base URL of the region's game server.
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Us => "https://www.missionchief.com/",
            Region::Uk => "https://www.missionchief.co.uk/",
            Region::Aus => "https://www.missionchief-australia.com/",
            Region::Ger => "https://www.leitstellenspiel.de/",
            Region::Nld => "https://www.meldkamerspel.com/",
        }
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Region::Us),
            "uk" => Ok(Region::Uk),
            "aus" => Ok(Region::Aus),
            "ger" => Ok(Region::Ger),
            "nld" => Ok(Region::Nld),
            other => Err(anyhow!("unknown region '{other}' (expected us, uk, aus, ger or nld)")),
        }
    }
}

/// What the allocator needs to know about dispatch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Send missions even when some requirements could not be met.
    pub allow_incomplete: bool,
    pub mode: DispatchMode,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub region: Region,

    pub policy: DispatchPolicy,

    /// Run one allocation worker per page instead of a single one.
    pub concurrent_missions: bool,

    /// Number of mission pages (and so allocation workers).
    pub workers: usize,

    /// Period of the dispatch cycle.
    pub mission_interval: Duration,

    /// Age after which the vehicle inventory is fetched again. Zero refetches
    /// on every cycle.
    pub inventory_refresh: Duration,

    /// Snapshots and table overrides.
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region: Region = lookup("MCD_REGION")
            .map(|v| v.parse())
            .transpose()
            .context("MCD_REGION is invalid.")?
            .unwrap_or_default();

        let allow_incomplete = lookup("MCD_DISPATCH_INCOMPLETE")
            .map(|v| parse_bool(&v))
            .transpose()
            .context("MCD_DISPATCH_INCOMPLETE must be true or false.")?
            .unwrap_or(false);

        let mode = lookup("MCD_DISPATCH_MODE")
            .map(|v| v.parse::<DispatchMode>().map_err(|e| anyhow!(e)))
            .transpose()
            .context("MCD_DISPATCH_MODE must be 'default' or 'alliance'.")?
            .unwrap_or_default();

        let concurrent_missions = lookup("MCD_CONCURRENT_MISSIONS")
            .map(|v| parse_bool(&v))
            .transpose()
            .context("MCD_CONCURRENT_MISSIONS must be true or false.")?
            .unwrap_or(true);

        let workers: usize = lookup("MCD_WORKERS")
            .map(|v| v.trim().parse())
            .transpose()
            .context("MCD_WORKERS must be an integer.")?
            .unwrap_or(2)
            .max(1);

        let interval_secs: u64 = lookup("MCD_MISSION_INTERVAL_SECS")
            .map(|v| v.trim().parse())
            .transpose()
            .context("MCD_MISSION_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(30);
        let mission_interval = Duration::from_secs(interval_secs.max(1));

        let refresh_secs: u64 = lookup("MCD_INVENTORY_REFRESH_SECS")
            .map(|v| v.trim().parse())
            .transpose()
            .context("MCD_INVENTORY_REFRESH_SECS must be an integer (seconds).")?
            .unwrap_or(3600);

        let data_dir = lookup("MCD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        let log_level = lookup("MCD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            region,
            policy: DispatchPolicy {
                allow_incomplete,
                mode,
            },
            concurrent_missions,
            workers,
            mission_interval,
            inventory_refresh: Duration::from_secs(refresh_secs),
            data_dir,
            log_level,
        })
    }

    /// Number of workers that allocate in parallel.
    pub fn allocation_workers(&self) -> usize {
        if self.concurrent_missions {
            self.workers
        } else {
            1
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("not a boolean: '{other}'")),
    }
}
