use crate::core::state::{RouteDescriptor, StoryStyle};
use crate::services::planner::{TARGET_SEGMENT_DURATION_SECS, WORDS_PER_SEGMENT};

/// Previous narration handed to the next segment, counted in characters.
pub const CONTEXT_WINDOW_CHARS: usize = 1500;

pub const OUTLINE_SYSTEM_PROMPT: &str =
    "You are an expert storyteller. Return only valid JSON.";
pub const SEGMENT_SYSTEM_PROMPT: &str =
    "You are a storytelling engine narrating a live journey. Return only narration text.";
pub const STORYBOOK_SYSTEM_PROMPT: &str =
    "You are a biographer writing a cinematic picture book. Return only valid JSON.";

pub fn style_instruction(style: StoryStyle) -> &'static str {
    match style {
        StoryStyle::Noir => {
            "Style: Noir Thriller. Gritty, cynical, atmospheric. Use inner monologue. \
             The traveler is a detective or someone with a troubled past. The city is a character \
             of its own, dark and rainy and hiding secrets. Lean on shadows, smoke and cold neon."
        }
        StoryStyle::Children => {
            "Style: Children's Story. Whimsical, magical, full of wonder and gentle humor. \
             The world is bright and alive; traffic lights or trees may have small personalities. \
             Simple but evocative language and a sense of delightful discovery."
        }
        StoryStyle::Historical => {
            "Style: Historical Epic. Grandiose, dramatic and timeless. Treat the journey as a \
             pilgrimage or quest in a bygone era layered over the modern day. Slightly archaic but \
             understandable language. Focus on endurance, destiny and the weight of history."
        }
        StoryStyle::Fantasy => {
            "Style: Fantasy Adventure. Heroic, mystical and epic. The real world is a veil over a \
             magical realm: streets are ancient paths, buildings are towers or ruins, shadows may \
             be lurking beasts. The traveler is on a vital quest."
        }
        StoryStyle::Immersive => {
            "Style: Immersive, in-the-moment narration. Focus on the sensation of movement and \
             the immediate environment."
        }
    }
}

fn journey_line(route: &RouteDescriptor) -> String {
    format!(
        "Journey: {} to {} by {}.",
        route.start_address,
        route.end_address,
        route.travel_mode.as_str()
    )
}

pub fn outline_prompt(route: &RouteDescriptor, total_segments: usize) -> String {
    format!(
        "Write an outline for a story that is exactly {total} chapters long, with a complete and \
         cohesive arc: set up, inciting incident, rising action, climax, success, falling action \
         and resolution.\n\
         \n\
         Tailor the outline to this journey:\n\
         {journey}\n\
         Total Duration: approx {duration}.\n\
         Chapters needed: {total}.\n\
         \n\
         {style}\n\
         \n\
         Output strictly valid JSON: an array of {total} strings, one summary per chapter. \
         Example: [\"Chapter 1 summary...\", \"Chapter 2 summary...\"]",
        total = total_segments,
        journey = journey_line(route),
        duration = route.duration,
        style = style_instruction(route.story_style),
    )
}

/// Last `max_chars` characters of `text`, never splitting a code point.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub fn segment_prompt(
    route: &RouteDescriptor,
    segment_index: usize,
    total_segments_estimate: usize,
    segment_outline: &str,
    previous_context: &str,
) -> String {
    let context_block = if segment_index > 1 {
        format!(
            "PREVIOUS NARRATIVE CONTEXT (the story so far):\n\
             ...{}\n\
             (CONTINUE SEAMLESSLY from the above. Do not repeat it. Do not open with \"And so...\" \
             or a similar connector every time.)\n",
            tail_chars(previous_context, CONTEXT_WINDOW_CHARS)
        )
    } else {
        String::new()
    };

    format!(
        "You are generating a continuous, immersive audio stream for a traveler.\n\
         {journey}\n\
         Current Status: Segment {index} of approx {total}.\n\
         \n\
         {style}\n\
         \n\
         CURRENT CHAPTER GOAL: {goal}\n\
         \n\
         {context}\n\
         Task: Write the next ~{secs} seconds of narration (approx {words} words) based on the \
         Current Chapter Goal. Keep the narrative moving forward; this is one part of a longer \
         journey.\n\
         \n\
         IMPORTANT: Output ONLY the raw narration text for this segment. No titles, chapter \
         headings or JSON. Just the text to be spoken.",
        journey = journey_line(route),
        index = segment_index,
        total = total_segments_estimate,
        style = style_instruction(route.story_style),
        goal = segment_outline,
        context = context_block,
        secs = TARGET_SEGMENT_DURATION_SECS,
        words = WORDS_PER_SEGMENT,
    )
}

pub fn storybook_prompt(life_context: &str, page_count: usize) -> String {
    format!(
        "Create a {pages}-page cinematic storybook narrative based on this life summary: \"{context}\".\n\
         Each page needs a 'text' description (2-3 sentences) and a 'visualPrompt' for image \
         generation. Number pages from 1 in 'pageNumber'.\n\
         Output a valid JSON array of objects.",
        pages = page_count,
        context = life_context,
    )
}

pub fn illustration_prompt(visual_prompt: &str) -> String {
    format!(
        "A professional, cinematic, high-end 3D claymation style illustration: {}. Dark \
         atmospheric lighting, premium aesthetic, like a high-end coffee table book illustration.",
        visual_prompt
    )
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
