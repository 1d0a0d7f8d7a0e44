//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use aed_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cli::Cli;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub threads: usize,
    pub device: String,
    pub wav_path: Option<PathBuf>,
    pub top_k: usize,
    pub channel_capacity: usize,
    pub normalization_mean: f32,
    pub normalization_std: f32,
    pub output_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            threads: 2,
            device: "default".into(),
            wav_path: None,
            top_k: 5,
            channel_capacity: 10,
            normalization_mean: 0.0,
            normalization_std: 1.0,
            output_path: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.threads = self.threads.clamp(1, 64);
        self.top_k = self.top_k.clamp(1, 100);
        self.channel_capacity = self.channel_capacity.clamp(1, 1_000);
        if !self.normalization_std.is_finite() || self.normalization_std <= 0.0 {
            self.normalization_std = 1.0;
        }
        if !self.normalization_mean.is_finite() {
            self.normalization_mean = 0.0;
        }
        let device = self.device.trim();
        self.device = if device.is_empty() {
            "default".into()
        } else {
            device.into()
        };
    }

    /// Flags given on the command line win over file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(model) = &cli.model {
            self.model_path = Some(model.clone());
        }
        if let Some(labels) = &cli.labels {
            self.labels_path = Some(labels.clone());
        }
        if let Some(threads) = cli.threads {
            self.threads = threads;
        }
        if let Some(device) = &cli.device {
            self.device = device.clone();
            self.wav_path = None;
        }
        if let Some(wav) = &cli.wav {
            self.wav_path = Some(wav.clone());
        }
        if let Some(k) = cli.top_k {
            self.top_k = k;
        }
        if let Some(output) = &cli.output {
            self.output_path = Some(output.clone());
        }
        self.normalize();
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.top_k,
            channel_capacity: self.channel_capacity,
            ..PipelineConfig::default()
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aed")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("aed")
            .join("settings.json")
    }
}

/// A missing file yields defaults; a malformed one yields defaults with a
/// warning.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings file: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"topK": 3, "wavPath": "clip.wav", "normalizationStd": 0}"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.wav_path, Some(PathBuf::from("clip.wav")));
        assert_eq!(settings.threads, 2);
        // Non-positive std is replaced.
        assert_eq!(settings.normalization_std, 1.0);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut settings = AppSettings {
            wav_path: Some("from_file.wav".into()),
            threads: 8,
            ..AppSettings::default()
        };
        let cli = Cli {
            device: Some("2".into()),
            threads: Some(0),
            top_k: Some(7),
            ..Cli::default()
        };
        settings.apply_cli(&cli);
        assert_eq!(settings.wav_path, None);
        assert_eq!(settings.device, "2");
        assert_eq!(settings.threads, 1);
        assert_eq!(settings.pipeline_config().top_k, 7);
    }
}
