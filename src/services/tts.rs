use crate::core::config::Config;
use crate::services::gemini::{GeminiApi, GeminiRequest, GenerationConfig, SpeechConfig};
use crate::services::llm::resolve_api_key;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

/// Raw speech as the service returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub name: String,
    pub gender: String,
    pub description: String,
}

#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<Voice>>;
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechAudio>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,
    #[serde(default)]
    pub gemini: GeminiTtsConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            gemini: GeminiTtsConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiTtsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub default_voice: String,
}

impl Default for GeminiTtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_tts_model(),
            default_voice: default_voice(),
        }
    }
}

fn default_tts_provider() -> String {
    "gemini".to_string()
}
fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}
fn default_voice() -> String {
    "Kore".to_string()
}

const GEMINI_VOICES: &[(&str, &str, &str)] = &[
    ("Kore", "Female", "Firm"),
    ("Puck", "Male", "Upbeat"),
    ("Charon", "Male", "Informative"),
    ("Fenrir", "Male", "Excitable"),
    ("Aoede", "Female", "Breezy"),
    ("Zephyr", "Female", "Bright"),
    ("Leda", "Female", "Youthful"),
    ("Orus", "Male", "Firm"),
];

pub async fn create_tts_client(config: &Config) -> Result<Box<dyn TtsClient>> {
    info!("Initializing TTS Client for provider: {}", config.audio.provider);
    match config.audio.provider.as_str() {
        "gemini" => {
            let cfg = &config.audio.gemini;
            let api_key = resolve_api_key(&cfg.api_key)?;
            Ok(Box::new(GeminiTtsClient::new(&api_key, &cfg.model)))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.audio.provider)),
    }
}

pub struct GeminiTtsClient {
    api: GeminiApi,
    model: String,
}

impl GeminiTtsClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api: GeminiApi::new(api_key),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl TtsClient for GeminiTtsClient {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(GEMINI_VOICES
            .iter()
            .map(|(name, gender, description)| Voice {
                name: name.to_string(),
                gender: gender.to_string(),
                description: description.to_string(),
            })
            .collect())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechAudio> {
        let request = GeminiRequest::user_text(text).with_config(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig::prebuilt(voice)),
            ..Default::default()
        });

        let response = self.api.generate_content(&self.model, &request).await?;
        let inline = response
            .inline_data()
            .ok_or_else(|| anyhow!("No audio data received from Gemini TTS"))?;

        Ok(SpeechAudio {
            data: inline.decode()?,
            mime_type: inline.mime_type.clone(),
        })
    }
}
