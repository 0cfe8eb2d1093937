use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::drag::{DEFAULT_ACTIVATION_DISTANCE, DEFAULT_KEYBOARD_STEP, SensorConfig};

pub const API_URL_ENV: &str = "TASKBOARD_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_THEME: &str = "light";
const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const MIN_ARM_WINDOW_MS: u64 = 500;
const MAX_ARM_WINDOW_MS: u64 = 10_000;
const DEFAULT_ARM_WINDOW_MS: u64 = 3_000;
const MAX_ACTIVATION_DISTANCE: f64 = 64.0;
const MIN_KEYBOARD_STEP: f64 = 1.0;
const MAX_KEYBOARD_STEP: f64 = 200.0;

/// Light/dark flag handed to whatever renders the board.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" | "day" => Ok(Theme::Light),
            "dark" | "night" => Ok(Theme::Dark),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub request_timeout_ms: u64,
    pub arm_window_ms: u64,
    pub drag_activation_distance: f64,
    pub keyboard_step: f64,
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            arm_window_ms: DEFAULT_ARM_WINDOW_MS,
            drag_activation_distance: DEFAULT_ACTIVATION_DISTANCE,
            keyboard_step: DEFAULT_KEYBOARD_STEP,
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("taskboard");
        path.push("settings.toml");
        Some(path)
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    /// Writes the validated settings through a temp file and a rename.
    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Applies the API URL override, flag first, then environment.
    pub fn apply_overrides(&mut self, flag_api_url: Option<&str>) {
        let env_api_url = std::env::var(API_URL_ENV).ok();
        if let Some(api_url) = pick_api_url(flag_api_url, env_api_url.as_deref()) {
            self.api_url = api_url.to_string();
            self.validate();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn arm_window(&self) -> Duration {
        Duration::from_millis(self.arm_window_ms)
    }

    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            activation_distance: self.drag_activation_distance,
            keyboard_step: self.keyboard_step,
        }
    }

    /// Same settings with every value clamped into range.
    pub fn validated(mut self) -> Self {
        self.validate();
        self
    }

    pub fn theme(&self) -> Theme {
        Theme::from_str(&self.theme).unwrap_or(Theme::Light)
    }

    fn validate(&mut self) {
        self.request_timeout_ms = self
            .request_timeout_ms
            .clamp(MIN_REQUEST_TIMEOUT_MS, MAX_REQUEST_TIMEOUT_MS);
        self.arm_window_ms = self
            .arm_window_ms
            .clamp(MIN_ARM_WINDOW_MS, MAX_ARM_WINDOW_MS);
        self.drag_activation_distance =
            clamp_finite(self.drag_activation_distance, 0.0, MAX_ACTIVATION_DISTANCE, DEFAULT_ACTIVATION_DISTANCE);
        self.keyboard_step =
            clamp_finite(self.keyboard_step, MIN_KEYBOARD_STEP, MAX_KEYBOARD_STEP, DEFAULT_KEYBOARD_STEP);

        self.theme = match Theme::from_str(&self.theme) {
            Ok(theme) => theme.as_str().to_string(),
            Err(()) => {
                warn!(
                    "invalid theme '{}' in settings config; falling back to {}",
                    self.theme, DEFAULT_THEME
                );
                DEFAULT_THEME.to_string()
            }
        };

        let api_url = self.api_url.trim().trim_end_matches('/');
        self.api_url = if is_http_url(api_url) {
            api_url.to_string()
        } else {
            warn!(
                "invalid api_url '{}' in settings config; falling back to {}",
                self.api_url, DEFAULT_API_URL
            );
            DEFAULT_API_URL.to_string()
        };
    }
}

fn pick_api_url<'a>(flag: Option<&'a str>, env: Option<&'a str>) -> Option<&'a str> {
    flag.or(env)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn clamp_finite(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn is_http_url(raw: &str) -> bool {
    let rest = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"));
    match rest {
        Some(rest) => rest
            .split('/')
            .next()
            .is_some_and(|host| !host.is_empty() && !host.contains(char::is_whitespace)),
        None => false,
    }
}
