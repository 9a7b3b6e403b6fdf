use crate::core::state::RouteDescriptor;
use crate::services::llm::LlmClient;
use crate::services::script::{outline_prompt, strip_code_blocks, OUTLINE_SYSTEM_PROMPT};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde_json::{json, Value};

/// Used for every chapter when no usable outline came back.
pub const OUTLINE_FALLBACK: &str = "Continue the immersive narrative of the journey.";
/// Fills chapters the model left out of a short outline.
pub const OUTLINE_PADDING: &str = "Continue the journey towards the destination.";

fn outline_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

/// Produces exactly `total_segments` chapter summaries. Never fails: any
/// problem with the model call or its output degrades to placeholders.
pub async fn generate_outline(
    llm: &dyn LlmClient,
    route: &RouteDescriptor,
    total_segments: usize,
) -> Vec<String> {
    let total_segments = total_segments.max(1);
    let prompt = outline_prompt(route, total_segments);
    let schema = outline_schema();

    let outcome = match llm.chat_json(OUTLINE_SYSTEM_PROMPT, &prompt, Some(&schema)).await {
        Ok(response) => parse_outline(&response),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(entries) => {
            info!(
                "Outline received with {} entries for {} segments",
                entries.len(),
                total_segments
            );
            fit_outline(entries, total_segments)
        }
        Err(e) => {
            warn!("Outline generation failed, using fallback outline: {:#}", e);
            fallback_outline(total_segments)
        }
    }
}

pub fn fallback_outline(total_segments: usize) -> Vec<String> {
    vec![OUTLINE_FALLBACK.to_string(); total_segments]
}

/// Pads with [`OUTLINE_PADDING`] or truncates to exactly `total_segments`.
pub fn fit_outline(mut entries: Vec<String>, total_segments: usize) -> Vec<String> {
    entries.truncate(total_segments);
    entries.resize(total_segments, OUTLINE_PADDING.to_string());
    entries
}

fn parse_outline(response: &str) -> Result<Vec<String>> {
    let clean_json = strip_code_blocks(response);
    if clean_json.is_empty() {
        return Err(anyhow!("No outline generated"));
    }

    let value: Value = serde_json::from_str(&clean_json)
        .with_context(|| format!("Failed to parse outline JSON: {}", clean_json))?;

    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid outline format received: not an array"))?;
    if items.is_empty() {
        return Err(anyhow!("Invalid outline format received: empty array"));
    }

    Ok(items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}
