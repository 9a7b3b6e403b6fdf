use crate::core::state::AudioBuffer;
use crate::services::tts::TtsClient;
use crate::utils::audio::{parse_sample_rate, pcm_to_wav, AudioContext};
use anyhow::{anyhow, Context, Result};
use log::debug;

/// Speaks `text` with `voice` and decodes the result into a playable buffer.
pub async fn synthesize_segment_audio(
    tts: &dyn TtsClient,
    context: &dyn AudioContext,
    text: &str,
    voice: &str,
) -> Result<AudioBuffer> {
    let speech = tts.synthesize(text, voice).await?;
    if speech.data.is_empty() {
        return Err(anyhow!("No audio data received from speech synthesis"));
    }

    let sample_rate = parse_sample_rate(speech.mime_type.as_deref());
    debug!(
        "Received {} bytes of PCM at {} Hz for voice {}",
        speech.data.len(),
        sample_rate,
        voice
    );

    let wav = pcm_to_wav(&speech.data, sample_rate)?;
    context
        .decode_audio_data(&wav)
        .context("Failed to decode synthesized audio")
}
