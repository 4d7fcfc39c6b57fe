//! Chunker settings.
//!
//! Only settings that change what gets learned are modeled. They can be
//! loaded from and saved to TOML, or set one option at a time with
//! [`ChunkerConfig::apply`], which takes the option names a command layer
//! would expose (`max-chunks 20`, `learning except`, `flag my-rule`, ...).

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EbcResult};

/// Global learning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    #[default]
    On,
    Off,
    /// Learn only from firings of flagged rules.
    Only,
    /// Learn from every rule except flagged ones.
    Except,
}

impl std::str::FromStr for LearningMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" | "true" | "enabled" => Ok(LearningMode::On),
            "off" | "false" | "disabled" => Ok(LearningMode::Off),
            "only" => Ok(LearningMode::Only),
            "except" => Ok(LearningMode::Except),
            _ => Err(()),
        }
    }
}

/// Behavior-relevant chunking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub learning: LearningMode,
    /// Rules consulted by `only` / `except`.
    pub flagged_rules: BTreeSet<String>,
    /// Learn chunks only from the bottom-most goal that is learning.
    pub bottom_only: bool,
    /// Build attempts allowed per decision cycle.
    pub max_chunks: u64,
    /// Duplicates one origin rule may produce per decision cycle.
    pub max_dupes: u64,
    pub allow_local_negations: bool,
    pub interrupt_on_chunk: bool,
    pub interrupt_on_watched_chunk: bool,
    /// Origin rules whose learned chunks are watched.
    pub watched_rules: BTreeSet<String>,
    pub dont_add_bad_justifications: bool,
    pub interrupt_on_warning: bool,
}

fn default_max_chunks() -> u64 {
    50
}
fn default_max_dupes() -> u64 {
    3
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            learning: LearningMode::On,
            flagged_rules: BTreeSet::new(),
            bottom_only: false,
            max_chunks: default_max_chunks(),
            max_dupes: default_max_dupes(),
            allow_local_negations: true,
            interrupt_on_chunk: false,
            interrupt_on_watched_chunk: false,
            watched_rules: BTreeSet::new(),
            dont_add_bad_justifications: false,
            interrupt_on_warning: false,
        }
    }
}

impl ChunkerConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> EbcResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<string>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> EbcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> EbcResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Limits must be positive.
    pub fn validate(&self) -> EbcResult<()> {
        if self.max_chunks == 0 {
            return Err(ConfigError::Invalid {
                message: "max-chunks must be at least 1".into(),
            }
            .into());
        }
        if self.max_dupes == 0 {
            return Err(ConfigError::Invalid {
                message: "max-dupes must be at least 1".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Set one option by name.
    pub fn apply(&mut self, option: &str, value: &str) -> EbcResult<()> {
        let invalid = || ConfigError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
        };
        match option {
            "learning" => self.learning = value.parse().map_err(|_| invalid())?,
            "bottom-only" => self.bottom_only = parse_bool(value).ok_or_else(invalid)?,
            "max-chunks" => self.max_chunks = parse_limit(value).ok_or_else(invalid)?,
            "max-dupes" => self.max_dupes = parse_limit(value).ok_or_else(invalid)?,
            "allow-local-negations" => {
                self.allow_local_negations = parse_bool(value).ok_or_else(invalid)?
            }
            "interrupt" => self.interrupt_on_chunk = parse_bool(value).ok_or_else(invalid)?,
            "interrupt-on-watched" => {
                self.interrupt_on_watched_chunk = parse_bool(value).ok_or_else(invalid)?
            }
            "interrupt-on-warning" => {
                self.interrupt_on_warning = parse_bool(value).ok_or_else(invalid)?
            }
            "dont-add-bad-justifications" => {
                self.dont_add_bad_justifications = parse_bool(value).ok_or_else(invalid)?
            }
            "watch" => {
                self.watched_rules.insert(non_empty(value).ok_or_else(invalid)?);
            }
            "flag" => {
                self.flagged_rules.insert(non_empty(value).ok_or_else(invalid)?);
            }
            "unflag" => {
                self.flagged_rules.remove(value);
            }
            _ => {
                return Err(ConfigError::UnknownOption {
                    option: option.to_string(),
                }
                .into());
            }
        }
        tracing::debug!(option, value, "chunker option set");
        Ok(())
    }

    /// Whether firings of this rule may be generalized under the current mode.
    pub fn learning_allowed_for(&self, rule: Option<&str>) -> bool {
        let flagged = rule.is_some_and(|r| self.flagged_rules.contains(r));
        match self.learning {
            LearningMode::On => true,
            LearningMode::Off => false,
            LearningMode::Only => flagged,
            LearningMode::Except => !flagged,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_limit(value: &str) -> Option<u64> {
    value.parse::<u64>().ok().filter(|n| *n > 0)
}

fn non_empty(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty()).then(|| v.to_string())
}
