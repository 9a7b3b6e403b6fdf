use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select};
use journey2story::core::config::Config;
use journey2story::core::io::{NativeStorage, Storage};
use journey2story::core::state::RunState;
use journey2story::services::export::{
    export_story, export_storybook, STORYBOOK_FILE, STORY_TEXT_FILE,
};
use journey2story::services::image::create_image_generator;
use journey2story::services::llm::create_llm;
use journey2story::services::setup;
use journey2story::services::storybook::{generate_storybook_pages, narrate_pages};
use journey2story::services::tts::{create_tts_client, TtsClient};
use journey2story::services::workflow::{PipelineOptions, StoryPipeline};
use journey2story::utils::audio::WavBackend;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const JOURNEY: &str = "Journey story (narrated audio)";
const STORYBOOK: &str = "Life storybook (illustrated pages)";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage = NativeStorage::new();
    let choice = Select::new("What would you like to create?", vec![JOURNEY, STORYBOOK]).prompt()?;
    let previous = match choice {
        JOURNEY => STORY_TEXT_FILE,
        _ => STORYBOOK_FILE,
    };
    let previous = Path::new(&config.output_folder).join(previous);
    if storage.exists(&previous.to_string_lossy()).await? {
        let overwrite = Confirm::new("Output from an earlier run exists. Overwrite it?")
            .with_default(true)
            .prompt()?;
        if !overwrite {
            return Ok(());
        }
    }

    match choice {
        JOURNEY => run_journey(&mut config, &storage).await?,
        _ => run_storybook(&config, &storage).await?,
    }

    for path in storage.list(&config.output_folder).await? {
        println!("  {}", path);
    }
    Ok(())
}

async fn run_journey(config: &mut Config, storage: &dyn Storage) -> Result<()> {
    let llm = create_llm(config)?;
    let tts: Arc<dyn TtsClient> = Arc::from(create_tts_client(config).await?);
    let route = setup::prompt_route(config, tts.as_ref()).await?;
    if setup::remember_choices(config, &route) {
        config.save()?;
        println!("Configuration saved.");
    }

    let pipeline = StoryPipeline::new(
        Arc::from(llm),
        tts,
        Arc::new(WavBackend),
        PipelineOptions::from_config(config),
    );
    let mut handle = pipeline
        .start(route)
        .ok_or_else(|| anyhow!("A story is already being generated"))?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut announced = false;
    while let Ok(snapshot) = handle.changed().await {
        pb.set_length(snapshot.story.total_segments_estimate() as u64);
        pb.set_position(snapshot.story.len() as u64);
        pb.set_message(format!("{:?}", snapshot.state));
        if snapshot.state == RunState::Playing && !announced {
            pb.println("First segment is ready, the rest keeps generating.");
            announced = true;
        }
    }
    let snapshot = handle.wait().await;
    pb.finish_and_clear();

    if snapshot.story.is_empty() {
        bail!("Story generation failed before the first segment");
    }
    if !snapshot.story.is_complete() {
        warn!(
            "Story stopped after {} of {} segments",
            snapshot.story.len(),
            snapshot.story.total_segments_estimate()
        );
    }

    let written = export_story(storage, &config.output_folder, &snapshot.story).await?;
    info!("Journey story saved ({} files)", written.len());
    Ok(())
}

async fn run_storybook(config: &Config, storage: &dyn Storage) -> Result<()> {
    let llm = create_llm(config)?;
    let images = create_image_generator(config)?;
    let tts = create_tts_client(config).await?;
    let life_context = setup::prompt_life_context(config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_message("Writing storybook...");
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut pages = generate_storybook_pages(
        llm.as_ref(),
        images.as_ref(),
        &life_context,
        config.storybook.page_count,
        config.story.request_timeout(),
    )
    .await;
    if pages.is_empty() {
        pb.finish_and_clear();
        bail!("Storybook generation failed");
    }

    pb.set_message("Narrating pages...");
    let voiced = narrate_pages(
        tts.as_ref(),
        &WavBackend,
        &mut pages,
        &config.audio.gemini.default_voice,
        config.story.request_timeout(),
    )
    .await;
    pb.finish_and_clear();
    if voiced < pages.len() {
        warn!("{} of {} pages have no narration", pages.len() - voiced, pages.len());
    }

    let missing = pages.iter().filter(|p| p.image_url.is_none()).count();
    if missing > 0 {
        warn!("{} of {} pages have no illustration", missing, pages.len());
    }

    let written = export_storybook(storage, &config.output_folder, &pages).await?;
    info!("Storybook saved ({} files)", written.len());
    Ok(())
}
