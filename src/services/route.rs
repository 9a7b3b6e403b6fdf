use crate::core::state::{RouteDescriptor, StoryStyle, TravelMode};
use anyhow::{bail, Result};

/// Longest journey we narrate (4 hours).
pub const MAX_ROUTE_DURATION_SECS: u64 = 4 * 60 * 60;

/// What a directions lookup reports for a route.
#[derive(Debug, Clone)]
pub struct RouteFacts {
    pub start_address: String,
    pub end_address: String,
    pub distance: String,
    pub duration_seconds: u64,
    pub duration: Option<String>,
}

/// Turns looked-up route facts into a descriptor, rejecting routes the
/// pipeline should not narrate.
pub fn accept_route(
    facts: RouteFacts,
    travel_mode: TravelMode,
    voice_name: &str,
    story_style: StoryStyle,
) -> Result<RouteDescriptor> {
    let start_address = facts.start_address.trim().to_string();
    let end_address = facts.end_address.trim().to_string();
    if start_address.is_empty() || end_address.is_empty() {
        bail!("Please provide both a start and end location.");
    }
    if facts.duration_seconds > MAX_ROUTE_DURATION_SECS {
        bail!("Journey is too long (limit 4 hours).");
    }

    let duration = facts
        .duration
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format_duration(facts.duration_seconds));

    Ok(RouteDescriptor {
        start_address,
        end_address,
        distance: facts.distance,
        duration,
        duration_seconds: facts.duration_seconds,
        travel_mode,
        voice_name: voice_name.to_string(),
        story_style,
    })
}

/// Human label in the style directions services use: "1 hour 5 mins".
pub fn format_duration(duration_seconds: u64) -> String {
    let total_minutes = duration_seconds.div_ceil(60).max(1);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    let unit = |n: u64, one: &str, many: &str| format!("{} {}", n, if n == 1 { one } else { many });
    match (hours, minutes) {
        (0, m) => unit(m, "min", "mins"),
        (h, 0) => unit(h, "hour", "hours"),
        (h, m) => format!("{} {}", unit(h, "hour", "hours"), unit(m, "min", "mins")),
    }
}
