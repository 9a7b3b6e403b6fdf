use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TravelMode {
    Walking,
    Driving,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Driving => "driving",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoryStyle {
    #[default]
    Noir,
    Children,
    Historical,
    Fantasy,
    /// Neutral narration, used for any style tag we do not recognise.
    #[serde(other)]
    Immersive,
}

/// Route facts the story is told about. Produced once by route lookup and
/// only ever read afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RouteDescriptor {
    pub start_address: String,
    pub end_address: String,
    pub distance: String,
    pub duration: String,
    pub duration_seconds: u64,
    pub travel_mode: TravelMode,
    pub voice_name: String,
    pub story_style: StoryStyle,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentPlan {
    pub total_segments: usize,
    pub words_per_segment: usize,
}

/// Decoded PCM ready for playback. Samples are interleaved when
/// `channels > 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<[f32]>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StorySegment {
    pub index: usize,
    pub text: String,
    pub audio: Option<AudioBuffer>,
}

/// Chapters of one run, keyed by their 1-based index.
///
/// Segments only ever get appended in index order; the single mutation
/// allowed afterwards is attaching audio to an existing index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Story {
    segments: BTreeMap<usize, StorySegment>,
    total_segments_estimate: usize,
}

impl Story {
    pub fn new(total_segments_estimate: usize) -> Self {
        Self {
            segments: BTreeMap::new(),
            total_segments_estimate,
        }
    }

    pub fn total_segments_estimate(&self) -> usize {
        self.total_segments_estimate
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.total_segments_estimate > 0 && self.segments.len() == self.total_segments_estimate
    }

    pub fn get(&self, index: usize) -> Option<&StorySegment> {
        self.segments.get(&index)
    }

    pub fn segments(&self) -> impl Iterator<Item = &StorySegment> {
        self.segments.values()
    }

    pub fn append(&mut self, segment: StorySegment) -> Result<()> {
        let expected = self.segments.len() + 1;
        if segment.index != expected {
            return Err(anyhow!(
                "Segment {} appended out of order, expected {}",
                segment.index,
                expected
            ));
        }
        self.segments.insert(segment.index, segment);
        Ok(())
    }

    pub fn attach_audio(&mut self, index: usize, audio: AudioBuffer) -> bool {
        match self.segments.get_mut(&index) {
            Some(segment) => {
                segment.audio = Some(audio);
                true
            }
            None => false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    RouteFound,
    Generating,
    Playing,
}

/// Read-only view handed to whoever plays the story back.
#[derive(Clone, Debug, Default)]
pub struct StorySnapshot {
    pub state: RunState,
    pub story: Story,
    pub background_generating: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryPage {
    pub page_number: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Narration for the page. Exported as its own WAV, never as JSON.
    #[serde(skip)]
    pub audio: Option<AudioBuffer>,
}
