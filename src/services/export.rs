use crate::core::io::Storage;
use crate::core::state::{Story, StoryPage};
use crate::utils::audio::{encode_wav, merge_wav};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::time::Duration;

pub const STORY_TEXT_FILE: &str = "story.txt";
pub const JOURNEY_AUDIO_FILE: &str = "journey.wav";
pub const STORYBOOK_FILE: &str = "storybook.json";

fn output_path(folder: &str, name: &str) -> String {
    Path::new(folder).join(name).to_string_lossy().into_owned()
}

pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:04}.wav", index)
}

pub fn page_file_name(page_number: u32) -> String {
    format!("page_{:04}.wav", page_number)
}

/// Writes the story text, one WAV per voiced segment and the whole journey
/// as a single WAV. Returns the paths written.
pub async fn export_story(storage: &dyn Storage, folder: &str, story: &Story) -> Result<Vec<String>> {
    let mut written = Vec::new();

    let text = story
        .segments()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let text_path = output_path(folder, STORY_TEXT_FILE);
    storage.write(&text_path, text.as_bytes()).await?;
    written.push(text_path);

    let mut wavs = Vec::new();
    let mut narrated = Duration::ZERO;
    for segment in story.segments() {
        let Some(audio) = &segment.audio else {
            warn!("Segment {} has no audio, skipping", segment.index);
            continue;
        };
        let wav = encode_wav(audio)
            .with_context(|| format!("Failed to encode audio for segment {}", segment.index))?;
        let path = output_path(folder, &segment_file_name(segment.index));
        storage.write(&path, &wav).await?;
        written.push(path);
        wavs.push(wav);
        narrated += audio.duration();
    }

    if !wavs.is_empty() {
        match merge_wav(&wavs) {
            Ok(merged) => {
                let path = output_path(folder, JOURNEY_AUDIO_FILE);
                storage.write(&path, &merged).await?;
                written.push(path);
            }
            Err(e) => warn!("Could not merge segment audio: {:#}", e),
        }
    }

    info!(
        "Exported {} files to {} ({:.1}s of narration)",
        written.len(),
        folder,
        narrated.as_secs_f64()
    );
    Ok(written)
}

/// Writes `storybook.json` and one WAV per narrated page. The JSON comes
/// first in the returned paths.
pub async fn export_storybook(
    storage: &dyn Storage,
    folder: &str,
    pages: &[StoryPage],
) -> Result<Vec<String>> {
    let path = output_path(folder, STORYBOOK_FILE);
    let content = serde_json::to_string_pretty(pages)?;
    storage.write(&path, content.as_bytes()).await?;
    let mut written = vec![path];

    for page in pages {
        let Some(audio) = &page.audio else {
            continue;
        };
        let wav = encode_wav(audio)
            .with_context(|| format!("Failed to encode audio for page {}", page.page_number))?;
        let path = output_path(folder, &page_file_name(page.page_number));
        storage.write(&path, &wav).await?;
        written.push(path);
    }
    Ok(written)
}
