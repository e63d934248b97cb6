//! TOML configuration for arenas, pools and logging.
//!
//! ```toml
//! [arena]
//! reserve = "64M"
//! commit = "64K"
//! no_grow = false
//!
//! [pool]
//! align = 16
//!
//! [log]
//! level = "debug"
//! ```
//!
//! Sizes accept plain byte counts or `K`/`M`/`G` suffixes (binary units).

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::arena::ArenaFlags;
use crate::block::BlockFlags;
use crate::error::{Error, Result};
use crate::pool::{MAX_POOL_ALIGN, MIN_POOL_ALIGN};

/// File names searched by [`Config::discover`].
pub const CONFIG_FILE_NAMES: [&str; 2] = [".vmarena.toml", "vmarena.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub arena: ArenaConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    #[serde(default = "default_reserve", deserialize_with = "deserialize_size")]
    pub reserve: usize,

    #[serde(default = "default_commit", deserialize_with = "deserialize_size")]
    pub commit: usize,

    #[serde(default)]
    pub no_grow: bool,

    #[serde(default)]
    pub no_poison: bool,

    #[serde(default)]
    pub no_alloc_track: bool,

    #[serde(default)]
    pub alloc_can_leak: bool,

    /// Guard unallocated committed pages in every block.
    #[serde(default)]
    pub page_guard: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            reserve: default_reserve(),
            commit: default_commit(),
            no_grow: false,
            no_poison: false,
            no_alloc_track: false,
            alloc_can_leak: false,
            page_guard: false,
        }
    }
}

impl ArenaConfig {
    pub fn flags(&self) -> ArenaFlags {
        let mut flags = ArenaFlags::empty();
        if self.no_grow {
            flags |= ArenaFlags::NO_GROW;
        }
        if self.no_poison {
            flags |= ArenaFlags::NO_POISON;
        }
        if self.no_alloc_track {
            flags |= ArenaFlags::NO_ALLOC_TRACK;
        }
        if self.alloc_can_leak {
            flags |= ArenaFlags::ALLOC_CAN_LEAK;
        }
        flags
    }

    pub fn block_flags(&self) -> BlockFlags {
        if self.page_guard {
            BlockFlags::PAGE_GUARD
        } else {
            BlockFlags::empty()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.commit > self.reserve {
            return Err(Error::ConfigInvalid(format!(
                "arena commit ({}) exceeds reserve ({})",
                self.commit, self.reserve
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Payload alignment and minimum slot size.
    #[serde(default = "default_pool_align")]
    pub align: u8,

    #[serde(default = "default_pool_reserve", deserialize_with = "deserialize_size")]
    pub reserve: usize,

    #[serde(default = "default_commit", deserialize_with = "deserialize_size")]
    pub commit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            align: default_pool_align(),
            reserve: default_pool_reserve(),
            commit: default_commit(),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        let in_range = (MIN_POOL_ALIGN..=MAX_POOL_ALIGN).contains(&self.align);
        if !self.align.is_power_of_two() || !in_range {
            return Err(Error::ConfigInvalid(format!(
                "pool align {} must be a power of two between {} and {}",
                self.align, MIN_POOL_ALIGN, MAX_POOL_ALIGN
            )));
        }
        if self.commit > self.reserve {
            return Err(Error::ConfigInvalid(format!(
                "pool commit ({}) exceeds reserve ({})",
                self.commit, self.reserve
            )));
        }
        Ok(())
    }
}

/// `[log]` table; turned into a [`crate::logging::LogConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub spans: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
            spans: false,
        }
    }
}

fn default_reserve() -> usize { 64 * 1024 * 1024 }
fn default_commit() -> usize { 64 * 1024 }
fn default_pool_reserve() -> usize { 1024 * 1024 }
fn default_pool_align() -> u8 { 16 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;
        self.pool.validate()?;
        if crate::logging::parse_level(&self.log.level).is_none() {
            return Err(Error::ConfigInvalid(format!("unknown log level {:?}", self.log.level)));
        }
        Ok(())
    }

    /// Find a configuration file in the current directory or its parents.
    ///
    /// Falls back to defaults when nothing is found or the file is unreadable.
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            if let Some(config) = Self::discover_in(&dir) {
                return config;
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    fn discover_in(dir: &Path) -> Option<Self> {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            match Self::load(&path) {
                Ok(config) => return Some(config),
                Err(e) => tracing::warn!(
                    target: "vmarena::config",
                    path = %path.display(),
                    error = %e,
                    "ignoring config"
                ),
            }
        }
        None
    }

    /// Apply `VMARENA_RESERVE`, `VMARENA_COMMIT` and `VMARENA_NO_GROW`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup, e.g. a test map.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("VMARENA_RESERVE") {
            self.arena.reserve = parse_size(&value).ok_or(Error::EnvVar {
                name: "VMARENA_RESERVE",
                value,
            })?;
        }
        if let Some(value) = lookup("VMARENA_COMMIT") {
            self.arena.commit = parse_size(&value).ok_or(Error::EnvVar {
                name: "VMARENA_COMMIT",
                value,
            })?;
        }
        if let Some(value) = lookup("VMARENA_NO_GROW") {
            self.arena.no_grow = parse_bool(&value).ok_or(Error::EnvVar {
                name: "VMARENA_NO_GROW",
                value,
            })?;
        }
        self.validate()
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        fs::write(path, content).map_err(|source| Error::ConfigWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Parse `4096`, `64K`, `64KiB`, `2M` or `1G`.
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    let digits = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (number, unit) = value.split_at(digits);
    let number: usize = number.parse().ok()?;

    let shift = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        _ => return None,
    };
    number.checked_mul(1usize.checked_shl(shift)?)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(usize),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Bytes(bytes) => Ok(bytes),
        Size::Text(text) => {
            parse_size(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid size {:?}", text)))
        }
    }
}
