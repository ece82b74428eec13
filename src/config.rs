//! Scheduling policy and runtime configuration.
//!
//! Every numeric constant the scheduler uses lives here so that it can be
//! tuned from `config.toml` and asserted exactly in tests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ConfigError;

const APP_DIR: &str = "mnemo";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_DB_NAME: &str = "mnemo.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub review: ReviewPolicy,
    #[serde(default)]
    pub mastery: MasteryThresholds,
    #[serde(default)]
    pub planner: PlannerPolicy,
    #[serde(default)]
    pub reconciler: ReconcilerPolicy,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load from `$MNEMO_CONFIG` or the user config dir. A missing file
    /// yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MNEMO_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn db_path() -> PathBuf {
        if let Ok(path) = std::env::var("MNEMO_DB") {
            return PathBuf::from(path);
        }

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        db_path_in(&config_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.review;
        if !(MIN_EASE..=MAX_EASE).contains(&r.initial_ease) {
            return Err(invalid(format!(
                "review.initial_ease {} outside [{MIN_EASE}, {MAX_EASE}]",
                r.initial_ease
            )));
        }
        if r.history_cap < 2 {
            return Err(invalid("review.history_cap must be at least 2"));
        }
        if r.fast_latency_ms >= r.slow_latency_ms {
            return Err(invalid(
                "review.fast_latency_ms must be below review.slow_latency_ms",
            ));
        }

        let m = &self.mastery;
        let ordered = 0.0 <= m.developing_rate
            && m.developing_rate < m.proficient_rate
            && m.proficient_rate < m.mastered_rate
            && m.mastered_rate <= 1.0;
        if !ordered {
            return Err(invalid(
                "mastery rates must satisfy 0 <= developing < proficient < mastered <= 1",
            ));
        }
        if m.mastered_min_reviews < m.min_reviews {
            return Err(invalid(
                "mastery.mastered_min_reviews must be >= mastery.min_reviews",
            ));
        }

        let p = &self.planner;
        if p.cards_per_session == 0 || p.max_sessions_per_day == 0 || p.quiz_every == 0 {
            return Err(invalid(
                "planner.cards_per_session, max_sessions_per_day and quiz_every must be positive",
            ));
        }
        if p.minutes_per_card == 0 || p.slot_gap_minutes == 0 {
            return Err(invalid(
                "planner.minutes_per_card and slot_gap_minutes must be positive",
            ));
        }

        if !(0.0..=100.0).contains(&self.reconciler.slack) {
            return Err(invalid("reconciler.slack must be within 0-100"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

pub const MIN_EASE: f64 = 1.3;
pub const MAX_EASE: f64 = 3.0;

/// Parameters of the per-card review update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    #[serde(default = "default_initial_ease")]
    pub initial_ease: f64,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_max_interval")]
    pub max_interval_days: u32,
    /// Answers faster than this nudge quality up by one.
    #[serde(default = "default_fast_latency")]
    pub fast_latency_ms: u64,
    /// Answers slower than this nudge quality down by one.
    #[serde(default = "default_slow_latency")]
    pub slow_latency_ms: u64,
}

fn default_initial_ease() -> f64 { 2.5 }
fn default_history_cap() -> usize { 20 }
fn default_max_interval() -> u32 { 36_500 }
fn default_fast_latency() -> u64 { 4_000 }
fn default_slow_latency() -> u64 { 15_000 }

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            initial_ease: default_initial_ease(),
            history_cap: default_history_cap(),
            max_interval_days: default_max_interval(),
            fast_latency_ms: default_fast_latency(),
            slow_latency_ms: default_slow_latency(),
        }
    }
}

/// Success-rate bands for the mastery classifier. Lower bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryThresholds {
    #[serde(default = "default_min_reviews")]
    pub min_reviews: u32,
    #[serde(default = "default_developing_rate")]
    pub developing_rate: f64,
    #[serde(default = "default_proficient_rate")]
    pub proficient_rate: f64,
    #[serde(default = "default_mastered_rate")]
    pub mastered_rate: f64,
    #[serde(default = "default_mastered_min_reviews")]
    pub mastered_min_reviews: u32,
}

fn default_min_reviews() -> u32 { 3 }
fn default_developing_rate() -> f64 { 0.5 }
fn default_proficient_rate() -> f64 { 0.75 }
fn default_mastered_rate() -> f64 { 0.9 }
fn default_mastered_min_reviews() -> u32 { 5 }

impl Default for MasteryThresholds {
    fn default() -> Self {
        Self {
            min_reviews: default_min_reviews(),
            developing_rate: default_developing_rate(),
            proficient_rate: default_proficient_rate(),
            mastered_rate: default_mastered_rate(),
            mastered_min_reviews: default_mastered_min_reviews(),
        }
    }
}

/// Session allocation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerPolicy {
    #[serde(default = "default_cards_per_session")]
    pub cards_per_session: u32,
    #[serde(default = "default_max_sessions_per_day")]
    pub max_sessions_per_day: u32,
    #[serde(default = "default_minutes_per_card")]
    pub minutes_per_card: u32,
    /// Every n-th session of a topic is a quiz.
    #[serde(default = "default_quiz_every")]
    pub quiz_every: u32,
    /// Preferred spacing between sessions on the same day.
    #[serde(default = "default_slot_gap")]
    pub slot_gap_minutes: u32,
}

fn default_cards_per_session() -> u32 { 15 }
fn default_max_sessions_per_day() -> u32 { 2 }
fn default_minutes_per_card() -> u32 { 2 }
fn default_quiz_every() -> u32 { 4 }
fn default_slot_gap() -> u32 { 180 }

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            cards_per_session: default_cards_per_session(),
            max_sessions_per_day: default_max_sessions_per_day(),
            minutes_per_card: default_minutes_per_card(),
            quiz_every: default_quiz_every(),
            slot_gap_minutes: default_slot_gap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerPolicy {
    /// Percentage points the learner may trail the expected trajectory
    /// before catch-up sessions are inserted.
    #[serde(default = "default_slack")]
    pub slack: f64,
}

fn default_slack() -> f64 { 10.0 }

impl Default for ReconcilerPolicy {
    fn default() -> Self {
        Self {
            slack: default_slack(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "warn".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Database file inside `dir`, creating the directory on the way. A
/// directory that cannot be created is logged and left for the open to
/// report.
fn db_path_in(dir: &Path) -> PathBuf {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "could not create data directory");
    }
    dir.join(DEFAULT_DB_NAME)
}
