//! Scripted stand-ins for the model, speech and image services.

use crate::core::state::{AudioBuffer, RouteDescriptor, StoryStyle, TravelMode};
use crate::services::image::{GeneratedImage, ImageGenerator};
use crate::services::llm::LlmClient;
use crate::services::tts::{SpeechAudio, TtsClient, Voice};
use crate::utils::audio::{AudioBackend, AudioContext, WavContext};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn route(style: StoryStyle) -> RouteDescriptor {
    RouteDescriptor {
        start_address: "Ferry Building, San Francisco".to_string(),
        end_address: "Coit Tower, San Francisco".to_string(),
        distance: "1.9 km".to_string(),
        duration: "21 mins".to_string(),
        duration_seconds: 1260,
        travel_mode: TravelMode::Walking,
        voice_name: "Kore".to_string(),
        story_style: style,
    }
}

/// Reads `k` out of "Segment k of approx n".
pub fn segment_index_of(prompt: &str) -> Option<usize> {
    let rest = prompt.split("Segment ").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Half a second of silence at the given rate, as the speech service sends it.
pub fn pcm_speech(rate: Option<u32>) -> SpeechAudio {
    let sample_rate = rate.unwrap_or(24000);
    SpeechAudio {
        data: vec![0u8; sample_rate as usize],
        mime_type: rate.map(|r| format!("audio/L16;codec=pcm;rate={}", r)),
    }
}

type LlmHandler = dyn Fn(&str, &str) -> Result<String> + Send + Sync;
type StallRule = dyn Fn(&str) -> bool + Send + Sync;

pub struct ScriptedLlm {
    handler: Box<LlmHandler>,
    prompts: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    stall: Option<Box<StallRule>>,
}

impl ScriptedLlm {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            prompts: Mutex::new(Vec::new()),
            gate: None,
            stall: None,
        }
    }

    /// Every call waits for a permit. The returned semaphore starts empty.
    pub fn gated<F>(handler: F) -> (Self, Arc<Semaphore>)
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        let gate = Arc::new(Semaphore::new(0));
        let mut llm = Self::new(handler);
        llm.gate = Some(gate.clone());
        (llm, gate)
    }

    /// Calls whose system prompt matches `stall` never answer.
    pub fn stalling<F, S>(handler: F, stall: S) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
        S: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let mut llm = Self::new(handler);
        llm.stall = Some(Box::new(stall));
        llm
    }

    /// User prompts in the order they arrived.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLlm")
            .field("calls", &self.prompts.lock().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        if self.stall.as_ref().is_some_and(|stall| stall(system)) {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        (self.handler)(system, user)
    }
}

type TtsHandler = dyn Fn(&str, &str) -> Result<SpeechAudio> + Send + Sync;

pub struct ScriptedTts {
    handler: Box<TtsHandler>,
    calls: Mutex<Vec<(String, String)>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTts {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &str) -> Result<SpeechAudio> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every call waits for a permit. The returned semaphore starts empty.
    pub fn gated<F>(handler: F) -> (Self, Arc<Semaphore>)
    where
        F: Fn(&str, &str) -> Result<SpeechAudio> + Send + Sync + 'static,
    {
        let gate = Arc::new(Semaphore::new(0));
        let mut tts = Self::new(handler);
        tts.gate = Some(gate.clone());
        (tts, gate)
    }

    /// `(text, voice)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsClient for ScriptedTts {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(vec![Voice {
            name: "Kore".to_string(),
            gender: "Female".to_string(),
            description: "Firm".to_string(),
        }])
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechAudio> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        (self.handler)(text, voice)
    }
}

/// Hands out real WAV contexts and remembers them.
#[derive(Default)]
pub struct CountingBackend {
    created: AtomicUsize,
    contexts: Mutex<Vec<Arc<WavContext>>>,
    fail: bool,
}

impl CountingBackend {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_closed())
            .count()
    }
}

impl AudioBackend for CountingBackend {
    fn create_context(&self) -> Result<Arc<dyn AudioContext>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("audio output unavailable"));
        }
        let context = Arc::new(WavContext::default());
        self.contexts.lock().unwrap().push(context.clone());
        Ok(context)
    }
}

type ImageHandler = dyn Fn(&str) -> Result<Option<GeneratedImage>> + Send + Sync;

pub struct ScriptedImages {
    handler: Box<ImageHandler>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedImages {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<Option<GeneratedImage>> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(prompt, aspect_ratio)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImages {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<Option<GeneratedImage>> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), aspect_ratio.to_string()));
        (self.handler)(prompt)
    }
}

pub fn png(bytes: &[u8]) -> GeneratedImage {
    GeneratedImage {
        mime_type: "image/png".to_string(),
        data: bytes.to_vec(),
    }
}

pub fn silent_buffer() -> AudioBuffer {
    AudioBuffer {
        sample_rate: 24000,
        channels: 1,
        samples: Arc::from(vec![0.0f32; 240]),
    }
}
