pub mod export;
pub mod gemini;
pub mod image;
pub mod llm;
pub mod narration;
pub mod outline;
pub mod planner;
pub mod route;
pub mod script;
pub mod segment;
pub mod setup;
pub mod storybook;
pub mod tts;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
