//! YAML session configuration.
//!
//! Deserialization is permissive — every optional field is an `Option` —
//! and `build()` turns a section into its validated runtime shape, filling
//! defaults and rejecting values a fetch session cannot run with. All
//! configuration errors surface here, before any browser or network work
//! starts.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use uuid::Uuid;

use crate::providers::OpenAiEngine;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default)]
    pub settings: SettingsSection,
    pub llm_config: LlmSection,
    pub fetch: Option<FetchSection>,
}

impl SessionConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: SessionConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to decode config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSection {
    #[serde(default)]
    pub verbose: bool,
    pub session_name: Option<String>,
}

/// General session settings with defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verbose: bool,
    pub session_name: String,
}

impl SettingsSection {
    pub fn build(self) -> Settings {
        Settings {
            verbose: self.verbose,
            session_name: self
                .session_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSection {
    #[serde(rename = "type")]
    pub kind: String,
    /// Engine-specific settings, parsed by the selected adapter.
    #[serde(default)]
    pub settings: serde_yaml::Value,
    pub try_limit: Option<u8>,
    pub max_tokens: Option<u16>,
    pub request_duration: Option<u16>,
    pub workers: Option<u8>,
}

/// Retry and pooling knobs for the chat side, with defaults applied.
#[derive(Debug, Clone, Copy)]
pub struct LlmOptions {
    /// Attempts per logical chat request.
    pub try_limit: u8,
    /// Per-attempt budget in seconds.
    pub request_duration: u16,
    /// Prompt-pool concurrency.
    pub workers: u8,
}

impl LlmSection {
    /// Instantiate the configured engine and resolve the retry knobs.
    pub fn build(self) -> anyhow::Result<(OpenAiEngine, LlmOptions)> {
        if self.kind.is_empty() {
            bail!("a type must be provided in the llmConfig section");
        }

        let max_tokens = self.max_tokens.unwrap_or(500);

        let engine = match self.kind.to_lowercase().as_str() {
            "openai" => OpenAiEngine::from_config(&self.settings, max_tokens)?,
            other => bail!("{} is not a valid llm type", other),
        };

        let try_limit = self.try_limit.unwrap_or(4);
        if try_limit == 0 {
            bail!("llmConfig setting: tryLimit cannot be 0");
        }

        let workers = self.workers.unwrap_or(2);
        if workers == 0 {
            bail!("llmConfig setting: workers cannot be 0");
        }

        Ok((
            engine,
            LlmOptions {
                try_limit,
                request_duration: self.request_duration.unwrap_or(100),
                workers,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSection {
    pub max_runtime: Option<u32>,
    #[serde(default)]
    pub headless: bool,
    pub max_samples: Option<u16>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub task: String,
    pub save_path: Option<String>,
    #[serde(default)]
    pub example_template: serde_json::Map<String, serde_json::Value>,
    pub workers: Option<u8>,
}

/// A validated fetch session description.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Whole-session budget in seconds.
    pub max_runtime: u32,
    pub headless: bool,
    pub max_samples: u16,
    pub urls: Vec<String>,
    pub task: String,
    pub save_path: PathBuf,
    pub example_template: serde_json::Map<String, serde_json::Value>,
    /// Concurrent per-URL scrapers.
    pub workers: u8,
}

impl FetchSection {
    pub fn build(self) -> anyhow::Result<FetchOptions> {
        if self.max_runtime == Some(0) {
            bail!("fetch setting: maxRuntime cannot be 0");
        }

        if self.max_samples == Some(0) {
            bail!("fetch setting: maxSamples cannot be 0");
        }

        if self.urls.is_empty() {
            bail!("fetch setting: urls cannot be empty");
        }

        if self.urls.iter().any(|url| url.is_empty()) {
            bail!("fetch setting: urls cannot contain empty entries");
        }

        if self.task.is_empty() {
            bail!("fetch setting: task is blank");
        }

        let save_path = PathBuf::from(self.save_path.unwrap_or_else(|| ".".to_string()));
        let info = std::fs::metadata(&save_path)
            .with_context(|| format!("fetch setting savePath: cannot stat {}", save_path.display()))?;
        if !info.is_dir() {
            bail!("fetch setting savePath: {} is not a directory", save_path.display());
        }

        if self.example_template.is_empty() {
            bail!("fetch setting exampleTemplate: contains no keys");
        }

        let workers = self.workers.unwrap_or(1);
        if workers == 0 {
            bail!("fetch setting: workers cannot be 0");
        }

        Ok(FetchOptions {
            max_runtime: self.max_runtime.unwrap_or(16),
            headless: self.headless,
            max_samples: self.max_samples.unwrap_or(1_000),
            urls: self.urls,
            task: self.task,
            save_path,
            example_template: self.example_template,
            workers,
        })
    }
}
