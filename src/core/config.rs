use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::state::StoryStyle;
use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;
use crate::services::tts::AudioConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    pub llm: LlmConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub storybook: StorybookConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoryConfig {
    #[serde(default)]
    pub style: StoryStyle,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            style: StoryStyle::default(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl StoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorybookConfig {
    #[serde(default = "default_life_context")]
    pub life_context: String,
    #[serde(default = "default_page_count")]
    pub page_count: usize,
}

impl Default for StorybookConfig {
    fn default() -> Self {
        Self {
            life_context: default_life_context(),
            page_count: default_page_count(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_request_timeout() -> u64 {
    90
}
fn default_page_count() -> usize {
    5
}
fn default_life_context() -> String {
    "A life of early dreams of flight, overcoming hardship, breaking records, \
     building a business, and inspiring the next generation of pilots."
        .to_string()
}

/// Reads an API key from the environment, tolerating the quotes people tend
/// to leave around values in `.env` files.
pub fn api_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|raw| clean_api_key(&raw))
        .find(|key| !key.is_empty())
}

pub fn clean_api_key(raw: &str) -> String {
    raw.replace(['"', '\''], "").trim().to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new("config.yml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
