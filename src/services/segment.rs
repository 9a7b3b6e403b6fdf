use crate::core::state::{RouteDescriptor, StorySegment};
use crate::services::llm::LlmClient;
use crate::services::script::{segment_prompt, SEGMENT_SYSTEM_PROMPT};
use anyhow::{anyhow, Context, Result};
use log::debug;

/// Writes the narration for one chapter. Errors are returned as-is; the
/// orchestrator decides what a failed chapter means for the run.
pub async fn generate_segment(
    llm: &dyn LlmClient,
    route: &RouteDescriptor,
    segment_index: usize,
    total_segments_estimate: usize,
    segment_outline: &str,
    previous_context: &str,
) -> Result<StorySegment> {
    let prompt = segment_prompt(
        route,
        segment_index,
        total_segments_estimate,
        segment_outline,
        previous_context,
    );

    let response = llm
        .chat(SEGMENT_SYSTEM_PROMPT, &prompt)
        .await
        .with_context(|| format!("Segment {} text generation failed", segment_index))?;

    let text = response.trim();
    if text.is_empty() {
        return Err(anyhow!("No text generated for segment {}", segment_index));
    }
    debug!("Segment {} generated ({} chars)", segment_index, text.chars().count());

    Ok(StorySegment {
        index: segment_index,
        text: text.to_string(),
        audio: None,
    })
}
