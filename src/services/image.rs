use crate::core::config::Config;
use crate::services::gemini::{self, GeminiApi, GeminiRequest, GenerationConfig};
use crate::services::llm::resolve_api_key;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl GeneratedImage {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            general_purpose::STANDARD.encode(&self.data)
        )
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// `Ok(None)` when the model answered without an image.
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Option<GeneratedImage>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_image_model")]
    pub model: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            api_key: String::new(),
            model: default_image_model(),
        }
    }
}

fn default_image_provider() -> String {
    "gemini".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

pub fn create_image_generator(config: &Config) -> Result<Box<dyn ImageGenerator>> {
    match config.image.provider.as_str() {
        "gemini" => {
            let api_key = resolve_api_key(&config.image.api_key)?;
            Ok(Box::new(GeminiImageClient::new(&api_key, &config.image.model)))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.image.provider)),
    }
}

pub struct GeminiImageClient {
    api: GeminiApi,
    model: String,
}

impl GeminiImageClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api: GeminiApi::new(api_key),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Option<GeneratedImage>> {
        let request = GeminiRequest::user_text(prompt).with_config(GenerationConfig {
            image_config: Some(gemini::ImageConfig {
                aspect_ratio: aspect_ratio.to_string(),
            }),
            ..Default::default()
        });

        let response = self.api.generate_content(&self.model, &request).await?;
        match response.inline_data() {
            Some(inline) => Ok(Some(GeneratedImage {
                mime_type: inline
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "image/png".to_string()),
                data: inline.decode()?,
            })),
            None => Ok(None),
        }
    }
}
