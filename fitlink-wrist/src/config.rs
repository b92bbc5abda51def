//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Wrist endpoint configuration. File: ~/.config/fitlink/wrist.toml or
/// /etc/fitlink/wrist.toml. Env override: FITLINK_DISCOVERY_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port the handheld beacons on (default 45710).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
}

fn default_discovery_port() -> u16 {
    45710
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("FITLINK_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/fitlink/wrist.toml"));
    }
    out.push(PathBuf::from("/etc/fitlink/wrist.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
