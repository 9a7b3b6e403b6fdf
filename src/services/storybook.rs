use crate::core::state::StoryPage;
use crate::services::image::ImageGenerator;
use crate::services::llm::LlmClient;
use crate::services::narration::synthesize_segment_audio;
use crate::services::script::{
    illustration_prompt, storybook_prompt, strip_code_blocks, STORYBOOK_SYSTEM_PROMPT,
};
use crate::services::tts::TtsClient;
use crate::utils::audio::AudioBackend;
use anyhow::{anyhow, Context, Result};
use futures_util::{stream, StreamExt};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const ILLUSTRATION_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDraft {
    #[serde(default)]
    page_number: Option<u32>,
    text: String,
    #[serde(default)]
    visual_prompt: String,
}

fn pages_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "pageNumber": { "type": "INTEGER" },
                "text": { "type": "STRING" },
                "visualPrompt": { "type": "STRING" }
            },
            "required": ["pageNumber", "text", "visualPrompt"]
        }
    })
}

/// Builds an illustrated picture book from a life summary. Returns an empty
/// list when the pages themselves could not be written; a page whose
/// illustration failed is kept without an image.
pub async fn generate_storybook_pages(
    llm: &dyn LlmClient,
    images: &dyn ImageGenerator,
    life_context: &str,
    page_count: usize,
    timeout: Duration,
) -> Vec<StoryPage> {
    let drafts = match tokio::time::timeout(timeout, request_pages(llm, life_context, page_count))
        .await
    {
        Ok(Ok(drafts)) => drafts,
        Ok(Err(e)) => {
            error!("Storybook generation failed: {:#}", e);
            return Vec::new();
        }
        Err(_) => {
            error!("Storybook generation timed out after {}s", timeout.as_secs());
            return Vec::new();
        }
    };
    info!("Storybook text ready: {} pages", drafts.len());

    stream::iter(drafts.into_iter().enumerate())
        .then(|(i, draft)| async move {
            let page_number = draft.page_number.unwrap_or(i as u32 + 1);
            let image_url = illustrate(images, &draft.visual_prompt, timeout)
                .await
                .unwrap_or_else(|e| {
                    warn!("Illustration for page {} failed: {:#}", page_number, e);
                    None
                });
            StoryPage {
                page_number,
                text: draft.text,
                image_url,
                audio: None,
            }
        })
        .collect::<Vec<_>>()
        .await
}

/// Reads every page aloud with one decoding context. A page whose speech
/// fails or times out keeps `audio: None`. Returns how many pages got audio.
pub async fn narrate_pages(
    tts: &dyn TtsClient,
    backend: &dyn AudioBackend,
    pages: &mut [StoryPage],
    voice: &str,
    timeout: Duration,
) -> usize {
    if pages.is_empty() {
        return 0;
    }
    let context = match backend.create_context() {
        Ok(context) => context,
        Err(e) => {
            warn!("No audio context, storybook stays silent: {:#}", e);
            return 0;
        }
    };

    let mut voiced = 0;
    for page in pages.iter_mut() {
        let speech = synthesize_segment_audio(tts, context.as_ref(), &page.text, voice);
        let result = tokio::time::timeout(timeout, speech).await;
        match result {
            Ok(Ok(audio)) => {
                page.audio = Some(audio);
                voiced += 1;
            }
            Ok(Err(e)) => warn!("Narration for page {} failed: {:#}", page.page_number, e),
            Err(_) => warn!(
                "Narration for page {} timed out after {}s",
                page.page_number,
                timeout.as_secs()
            ),
        }
    }
    context.close();
    info!("Narrated {} of {} storybook pages", voiced, pages.len());
    voiced
}

async fn request_pages(
    llm: &dyn LlmClient,
    life_context: &str,
    page_count: usize,
) -> Result<Vec<PageDraft>> {
    let prompt = storybook_prompt(life_context, page_count);
    let schema = pages_schema();
    let response = llm
        .chat_json(STORYBOOK_SYSTEM_PROMPT, &prompt, Some(&schema))
        .await?;

    let clean_json = strip_code_blocks(&response);
    if clean_json.is_empty() {
        return Err(anyhow!("No storybook pages generated"));
    }
    serde_json::from_str(&clean_json)
        .with_context(|| format!("Failed to parse storybook JSON: {}", clean_json))
}

async fn illustrate(
    images: &dyn ImageGenerator,
    visual_prompt: &str,
    timeout: Duration,
) -> Result<Option<String>> {
    let prompt = illustration_prompt(visual_prompt);
    let image = tokio::time::timeout(timeout, images.generate(&prompt, ILLUSTRATION_ASPECT_RATIO))
        .await
        .map_err(|_| anyhow!("Image request timed out"))??;

    if image.is_none() {
        warn!("Image model answered without an image");
    }
    Ok(image.map(|img| img.to_data_url()))
}
