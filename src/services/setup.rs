use crate::core::config::Config;
use crate::core::state::{RouteDescriptor, StoryStyle, TravelMode};
use crate::services::route::{accept_route, RouteFacts};
use crate::services::tts::{TtsClient, Voice};
use anyhow::{anyhow, Result};
use inquire::{CustomType, Select, Text};

const TRAVEL_MODES: [TravelMode; 2] = [TravelMode::Walking, TravelMode::Driving];
const STORY_STYLES: [StoryStyle; 5] = [
    StoryStyle::Noir,
    StoryStyle::Children,
    StoryStyle::Historical,
    StoryStyle::Fantasy,
    StoryStyle::Immersive,
];

fn style_label(style: StoryStyle) -> &'static str {
    match style {
        StoryStyle::Noir => "Noir Thriller",
        StoryStyle::Children => "Children's Story",
        StoryStyle::Historical => "Historical Epic",
        StoryStyle::Fantasy => "Fantasy Adventure",
        StoryStyle::Immersive => "Immersive",
    }
}

/// Asks for the journey on the terminal and validates it.
pub async fn prompt_route(config: &Config, tts: &dyn TtsClient) -> Result<RouteDescriptor> {
    let start_address = Text::new("Start location:").prompt()?;
    let end_address = Text::new("Destination:").prompt()?;
    let distance_km = CustomType::<f64>::new("Distance (km):")
        .with_error_message("Please type a number")
        .prompt()?;
    let minutes = CustomType::<f64>::new("Travel time (minutes):")
        .with_error_message("Please type a number")
        .prompt()?;

    let mode_labels: Vec<&str> = TRAVEL_MODES.iter().map(|m| m.as_str()).collect();
    let mode = Select::new("Travel mode:", mode_labels).prompt()?;
    let travel_mode = TRAVEL_MODES
        .iter()
        .copied()
        .find(|m| m.as_str() == mode)
        .unwrap_or(TravelMode::Walking);

    let style_labels: Vec<&str> = STORY_STYLES.iter().map(|s| style_label(*s)).collect();
    let default_style = STORY_STYLES
        .iter()
        .position(|s| *s == config.story.style)
        .unwrap_or(0);
    let style = Select::new("Story style:", style_labels)
        .with_starting_cursor(default_style)
        .prompt()?;
    let story_style = STORY_STYLES
        .iter()
        .copied()
        .find(|s| style_label(*s) == style)
        .unwrap_or_default();

    let voices = tts.list_voices().await?;
    let voice = select_voice("Narrator voice:", &voices, &config.audio.gemini.default_voice)?;

    accept_route(
        facts_from_input(&start_address, &end_address, distance_km, minutes)?,
        travel_mode,
        &voice,
        story_style,
    )
}

/// Makes the style and voice of `route` the defaults for the next run.
/// Returns whether the config changed and needs saving.
pub fn remember_choices(config: &mut Config, route: &RouteDescriptor) -> bool {
    let mut needs_save = false;
    if config.story.style != route.story_style {
        config.story.style = route.story_style;
        needs_save = true;
    }
    if config.audio.gemini.default_voice != route.voice_name {
        config.audio.gemini.default_voice = route.voice_name.clone();
        needs_save = true;
    }
    needs_save
}

pub fn prompt_life_context(config: &Config) -> Result<String> {
    let context = Text::new("Life summary for the storybook:")
        .with_default(&config.storybook.life_context)
        .prompt()?;
    Ok(context)
}

pub fn facts_from_input(
    start_address: &str,
    end_address: &str,
    distance_km: f64,
    minutes: f64,
) -> Result<RouteFacts> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(anyhow!("Distance cannot be negative"));
    }
    if !minutes.is_finite() || minutes <= 0.0 {
        return Err(anyhow!("Travel time must be a positive number"));
    }

    Ok(RouteFacts {
        start_address: start_address.to_string(),
        end_address: end_address.to_string(),
        distance: format!("{:.1} km", distance_km),
        duration_seconds: (minutes * 60.0).round() as u64,
        duration: None,
    })
}

fn voice_option(voice: &Voice) -> String {
    format!("{} ({}) - {}", voice.name, voice.gender, voice.description)
}

fn select_voice(prompt: &str, voices: &[Voice], default: &str) -> Result<String> {
    if voices.is_empty() {
        return Err(anyhow!("No voices available"));
    }

    let options: Vec<String> = voices.iter().map(voice_option).collect();
    let cursor = voices.iter().position(|v| v.name == default).unwrap_or(0);
    let selection = Select::new(prompt, options).with_starting_cursor(cursor).prompt()?;

    voice_name_of(&selection).ok_or_else(|| anyhow!("Invalid voice selection: {}", selection))
}

fn voice_name_of(option: &str) -> Option<String> {
    option.split_whitespace().next().map(str::to_string)
}
