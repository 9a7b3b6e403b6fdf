use crate::core::config::Config;
use crate::core::state::{RouteDescriptor, RunState, SegmentPlan, Story, StorySnapshot};
use crate::services::llm::LlmClient;
use crate::services::narration::synthesize_segment_audio;
use crate::services::outline::{fallback_outline, generate_outline};
use crate::services::segment::generate_segment;
use crate::services::tts::TtsClient;
use crate::utils::audio::{AudioBackend, AudioContext};
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Goal used when the outline has no entry for a segment.
const MISSING_OUTLINE_ENTRY: &str = "Continue the journey.";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound for every single model or speech call.
    pub call_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(90),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: config.story.request_timeout(),
        }
    }
}

/// Turns a route into a narrated story, one run at a time.
pub struct StoryPipeline {
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn TtsClient>,
    audio: Arc<dyn AudioBackend>,
    options: PipelineOptions,
    active: Arc<AtomicBool>,
}

impl StoryPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn TtsClient>,
        audio: Arc<dyn AudioBackend>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            llm,
            tts,
            audio,
            options,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts a run in the background. Returns `None` without side effects
    /// while another run is still going.
    pub fn start(&self, route: RouteDescriptor) -> Option<RunHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("A story is already being generated, ignoring new request");
            return None;
        }
        let token = RunToken(self.active.clone());

        let (snapshot_tx, snapshot_rx) = watch::channel(StorySnapshot {
            state: RunState::RouteFound,
            ..StorySnapshot::default()
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let run = Run {
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            audio: self.audio.clone(),
            timeout: self.options.call_timeout,
            snapshot: snapshot_tx,
            cancel: cancel_rx,
            context: None,
        };

        let task = tokio::spawn(async move {
            let _token = token;
            run.execute(route).await;
        });

        Some(RunHandle {
            snapshot: snapshot_rx,
            cancel: cancel_tx,
            task: Some(task),
        })
    }
}

/// Clears the pipeline's active flag when the run task finishes.
struct RunToken(Arc<AtomicBool>);

impl Drop for RunToken {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The consumer's side of a run. Dropping it cancels the run.
pub struct RunHandle {
    snapshot: watch::Receiver<StorySnapshot>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn snapshot(&self) -> StorySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StorySnapshot> {
        self.snapshot.clone()
    }

    /// Waits for the next published snapshot. Errors once the run is over
    /// and every update has been seen.
    pub async fn changed(&mut self) -> Result<StorySnapshot> {
        self.snapshot
            .changed()
            .await
            .map_err(|_| anyhow!("Story run has finished"))?;
        Ok(self.snapshot.borrow_and_update().clone())
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Waits for the run to end and returns the final snapshot.
    pub async fn wait(mut self) -> StorySnapshot {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Story run task failed: {}", e);
            }
        }
        self.snapshot()
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Run handle dropped, cancelling story run");
        }
        self.cancel.send_replace(true);
    }
}

enum Step<T> {
    Done(T),
    Failed(anyhow::Error),
    Cancelled,
}

enum RunEnd {
    Completed,
    Failed(anyhow::Error),
    Cancelled,
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // a closed channel means the handle is gone
    let _ = cancel.wait_for(|c| *c).await;
}

/// Runs one external call under the timeout, giving up early on cancel.
async fn bounded<T, F>(
    cancel: &mut watch::Receiver<bool>,
    timeout: Duration,
    what: &str,
    call: F,
) -> Step<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Step::Cancelled,
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(Ok(value)) => Step::Done(value),
            Ok(Err(e)) => Step::Failed(e),
            Err(_) => Step::Failed(anyhow!("{} timed out after {}s", what, timeout.as_secs_f32())),
        },
    }
}

struct Run {
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn TtsClient>,
    audio: Arc<dyn AudioBackend>,
    timeout: Duration,
    snapshot: watch::Sender<StorySnapshot>,
    cancel: watch::Receiver<bool>,
    context: Option<Arc<dyn AudioContext>>,
}

impl Run {
    fn publish(&self, update: impl FnOnce(&mut StorySnapshot)) {
        self.snapshot.send_modify(update);
    }

    async fn execute(mut self, route: RouteDescriptor) {
        let plan = SegmentPlan::for_duration(route.duration_seconds);
        info!(
            "Route {} -> {} ({}): {} segments of ~{} words",
            route.start_address,
            route.end_address,
            route.duration,
            plan.total_segments,
            plan.words_per_segment
        );
        self.publish(|s| {
            s.state = RunState::Generating;
            s.story = Story::new(plan.total_segments);
            s.background_generating = true;
        });

        let end = self.narrate(&route, plan.total_segments).await;

        let completed = matches!(end, RunEnd::Completed);
        match end {
            RunEnd::Completed => info!("Story complete: {} segments", plan.total_segments),
            RunEnd::Failed(e) => error!("Story generation stopped: {:#}", e),
            RunEnd::Cancelled => info!("Story generation cancelled"),
        }
        self.publish(|s| {
            s.background_generating = false;
            if !completed {
                s.state = RunState::Idle;
            }
        });

        if let Some(context) = self.context.take() {
            context.close();
        }
    }

    async fn narrate(&mut self, route: &RouteDescriptor, total: usize) -> RunEnd {
        let llm = self.llm.clone();
        let tts = self.tts.clone();

        let outline = match bounded(&mut self.cancel, self.timeout, "Outline", async {
            Ok::<_, anyhow::Error>(generate_outline(llm.as_ref(), route, total).await)
        })
        .await
        {
            Step::Done(outline) => outline,
            Step::Failed(e) => {
                warn!("{:#}, using fallback outline", e);
                fallback_outline(total)
            }
            Step::Cancelled => return RunEnd::Cancelled,
        };

        let mut previous_text = String::new();
        for index in 1..=total {
            let goal = outline
                .get(index - 1)
                .map(String::as_str)
                .unwrap_or(MISSING_OUTLINE_ENTRY);

            let what = format!("Segment {} text", index);
            let segment = match bounded(
                &mut self.cancel,
                self.timeout,
                &what,
                generate_segment(llm.as_ref(), route, index, total, goal, &previous_text),
            )
            .await
            {
                Step::Done(segment) => segment,
                Step::Failed(e) => return RunEnd::Failed(e),
                Step::Cancelled => return RunEnd::Cancelled,
            };
            let text = segment.text.clone();

            let mut appended = Ok(());
            self.publish(|s| {
                appended = s.story.append(segment);
                if appended.is_ok() && index == 1 {
                    s.state = RunState::Playing;
                }
            });
            if let Err(e) = appended {
                return RunEnd::Failed(e);
            }
            info!("Segment {}/{} text ready", index, total);

            match self.audio_context() {
                Ok(context) => {
                    let what = format!("Segment {} audio", index);
                    match bounded(
                        &mut self.cancel,
                        self.timeout,
                        &what,
                        synthesize_segment_audio(
                            tts.as_ref(),
                            context.as_ref(),
                            &text,
                            &route.voice_name,
                        ),
                    )
                    .await
                    {
                        Step::Done(audio) => {
                            self.publish(|s| {
                                s.story.attach_audio(index, audio);
                            });
                            debug!("Segment {}/{} audio attached", index, total);
                        }
                        Step::Failed(e) => {
                            warn!("Audio for segment {} failed, keeping text only: {:#}", index, e)
                        }
                        Step::Cancelled => return RunEnd::Cancelled,
                    }
                }
                Err(e) => warn!("No audio context for segment {}: {:#}", index, e),
            }

            previous_text = text;
        }

        RunEnd::Completed
    }

    /// The run's one decoding context, opened on first use.
    fn audio_context(&mut self) -> Result<Arc<dyn AudioContext>> {
        if let Some(context) = &self.context {
            return Ok(context.clone());
        }
        let context = self
            .audio
            .create_context()
            .context("Failed to open audio context")?;
        self.context = Some(context.clone());
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StoryStyle;
    use crate::services::outline::OUTLINE_FALLBACK;
    use crate::services::script::OUTLINE_SYSTEM_PROMPT;
    use crate::services::test_support::{
        pcm_speech, route, segment_index_of, CountingBackend, ScriptedLlm, ScriptedTts,
    };
    use anyhow::bail;

    fn three_minute_route() -> RouteDescriptor {
        let mut route = route(StoryStyle::Noir);
        route.duration_seconds = 180;
        route.duration = "3 mins".to_string();
        route
    }

    fn story_handler(
        fail_at: Option<usize>,
    ) -> impl Fn(&str, &str) -> Result<String> + Send + Sync + 'static {
        move |system, user| {
            if system == OUTLINE_SYSTEM_PROMPT {
                return Ok(r#"["Arrive at the pier.", "Climb the hill.", "Reach the tower."]"#
                    .to_string());
            }
            let index = segment_index_of(user).ok_or_else(|| anyhow!("unexpected prompt"))?;
            if Some(index) == fail_at {
                bail!("model overloaded");
            }
            Ok(format!("Text of segment {}.", index))
        }
    }

    fn pipeline(
        llm: Arc<ScriptedLlm>,
        tts: Arc<ScriptedTts>,
        backend: Arc<CountingBackend>,
        call_timeout: Duration,
    ) -> StoryPipeline {
        StoryPipeline::new(llm, tts, backend, PipelineOptions { call_timeout })
    }

    fn working_tts() -> Arc<ScriptedTts> {
        Arc::new(ScriptedTts::new(|_, _| Ok(pcm_speech(Some(24000)))))
    }

    #[tokio::test]
    async fn test_full_run_appends_every_segment_with_audio() {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let tts = working_tts();
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline(llm.clone(), tts.clone(), backend.clone(), Duration::from_secs(5));

        let handle = pipeline.start(three_minute_route()).unwrap();
        let snapshot = handle.wait().await;

        assert_eq!(snapshot.state, RunState::Playing);
        assert!(!snapshot.background_generating);
        assert_eq!(snapshot.story.len(), 3);
        assert!(snapshot.story.is_complete());
        for (i, segment) in snapshot.story.segments().enumerate() {
            assert_eq!(segment.index, i + 1);
            assert_eq!(segment.text, format!("Text of segment {}.", i + 1));
            assert!(segment.audio.is_some());
        }

        let calls = tts.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, voice)| voice == "Kore"));

        // outline plus one call per segment, each with its own goal
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[2].contains("CURRENT CHAPTER GOAL: Climb the hill."));
        assert!(prompts[3].contains("Text of segment 2."));

        assert_eq!(backend.created(), 1);
        assert_eq!(backend.closed(), 1);
        // the finished run released the pipeline
        assert!(pipeline.start(three_minute_route()).is_some());
    }

    #[tokio::test]
    async fn test_audio_failure_keeps_text_and_continues() {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let tts = Arc::new(ScriptedTts::new(|text, _| {
            if text.contains("segment 2") {
                bail!("speech quota exceeded");
            }
            Ok(pcm_speech(None))
        }));
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline(llm.clone(), tts, backend, Duration::from_secs(5));

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Playing);
        assert_eq!(snapshot.story.len(), 3);
        assert!(snapshot.story.get(1).unwrap().audio.is_some());
        assert!(snapshot.story.get(2).unwrap().audio.is_none());
        assert!(snapshot.story.get(3).unwrap().audio.is_some());

        let third = llm
            .prompts()
            .into_iter()
            .find(|p| segment_index_of(p) == Some(3))
            .unwrap();
        assert!(third.contains("Text of segment 2."));
    }

    #[tokio::test]
    async fn test_text_failure_stops_run_and_keeps_prefix() {
        let llm = Arc::new(ScriptedLlm::new(story_handler(Some(2))));
        let tts = working_tts();
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline(llm.clone(), tts.clone(), backend.clone(), Duration::from_secs(5));

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Idle);
        assert!(!snapshot.background_generating);
        assert_eq!(snapshot.story.len(), 1);
        assert!(snapshot.story.get(1).unwrap().audio.is_some());
        assert!(llm.prompts().iter().all(|p| segment_index_of(p) != Some(3)));
        assert_eq!(tts.calls().len(), 1);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn test_outline_failure_uses_fallback() {
        let llm = Arc::new(ScriptedLlm::new(|system, user| {
            if system == OUTLINE_SYSTEM_PROMPT {
                bail!("invalid api key");
            }
            Ok(format!("Segment text {:?}.", segment_index_of(user)))
        }));
        let pipeline = pipeline(
            llm.clone(),
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_secs(5),
        );

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Playing);
        assert_eq!(snapshot.story.len(), 3);
        let prompts = llm.prompts();
        assert!(prompts[1].contains(OUTLINE_FALLBACK));
    }

    #[tokio::test]
    async fn test_missing_audio_context_leaves_text_only() {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let tts = working_tts();
        let backend = Arc::new(CountingBackend::failing());
        let pipeline = pipeline(llm, tts.clone(), backend.clone(), Duration::from_secs(5));

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.story.len(), 3);
        assert!(snapshot.story.segments().all(|s| s.audio.is_none()));
        assert!(tts.calls().is_empty());
        assert_eq!(backend.created(), 3);
    }

    #[tokio::test]
    async fn test_second_start_is_ignored_while_running() {
        let (llm, gate) = ScriptedLlm::gated(story_handler(None));
        let pipeline = pipeline(
            Arc::new(llm),
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_secs(5),
        );

        let first = pipeline.start(three_minute_route()).unwrap();
        assert!(pipeline.start(three_minute_route()).is_none());

        first.cancel();
        let snapshot = first.wait().await;
        assert_eq!(snapshot.state, RunState::Idle);

        gate.add_permits(10);
        let again = pipeline.start(three_minute_route()).unwrap();
        assert_eq!(again.wait().await.story.len(), 3);
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_run() -> Result<()> {
        let (llm, gate) = ScriptedLlm::gated(story_handler(None));
        let llm = Arc::new(llm);
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline(llm.clone(), working_tts(), backend.clone(), Duration::from_secs(5));

        // outline and segment 1 only
        gate.add_permits(2);
        let handle = pipeline.start(three_minute_route()).unwrap();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.story.len() == 1 && s.state == RunState::Playing)
            .await?;

        drop(handle);
        while rx.changed().await.is_ok() {}
        let snapshot = rx.borrow().clone();

        assert_eq!(snapshot.state, RunState::Idle);
        assert!(!snapshot.background_generating);
        assert_eq!(snapshot.story.len(), 1);
        assert!(llm.prompts().iter().all(|p| segment_index_of(p) != Some(3)));
        assert_eq!(backend.closed(), backend.created());
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_on_text_is_fatal() {
        let (llm, gate) = ScriptedLlm::gated(story_handler(None));
        // outline passes, segment 1 never answers
        gate.add_permits(1);
        let pipeline = pipeline(
            Arc::new(llm),
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_millis(50),
        );

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Idle);
        assert!(!snapshot.background_generating);
        assert!(snapshot.story.is_empty());
        assert_eq!(snapshot.story.total_segments_estimate(), 3);
    }

    #[tokio::test]
    async fn test_changed_reports_progress() -> Result<()> {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let pipeline = pipeline(
            llm,
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_secs(5),
        );

        let mut handle = pipeline.start(three_minute_route()).unwrap();
        let mut last = handle.snapshot();
        while let Ok(snapshot) = handle.changed().await {
            assert!(snapshot.story.len() >= last.story.len());
            last = snapshot;
        }
        assert_eq!(last.story.len(), 3);
        assert!(!last.background_generating);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_starts_at_route_found() {
        let (llm, _gate) = ScriptedLlm::gated(story_handler(None));
        let pipeline = pipeline(
            Arc::new(llm),
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_secs(5),
        );

        let handle = pipeline.start(three_minute_route()).unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, RunState::RouteFound);
        assert!(snapshot.story.is_empty());
        assert!(!snapshot.background_generating);
    }

    #[tokio::test]
    async fn test_outline_timeout_uses_fallback() {
        let llm = Arc::new(ScriptedLlm::stalling(story_handler(None), |system| {
            system == OUTLINE_SYSTEM_PROMPT
        }));
        let pipeline = pipeline(
            llm.clone(),
            working_tts(),
            Arc::new(CountingBackend::default()),
            Duration::from_millis(50),
        );

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Playing);
        assert!(snapshot.story.is_complete());
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[1..].iter().all(|p| p.contains(OUTLINE_FALLBACK)));
    }

    #[tokio::test]
    async fn test_audio_timeout_leaves_text_only() {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let (tts, _gate) = ScriptedTts::gated(|_, _| Ok(pcm_speech(None)));
        let tts = Arc::new(tts);
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline(llm, tts.clone(), backend.clone(), Duration::from_millis(50));

        let snapshot = pipeline.start(three_minute_route()).unwrap().wait().await;

        assert_eq!(snapshot.state, RunState::Playing);
        assert!(!snapshot.background_generating);
        assert_eq!(snapshot.story.len(), 3);
        assert!(snapshot.story.segments().all(|s| s.audio.is_none()));
        assert_eq!(tts.calls().len(), 3);
        assert_eq!(backend.closed(), 1);
    }

    #[tokio::test]
    async fn test_text_is_published_before_its_audio() -> Result<()> {
        let llm = Arc::new(ScriptedLlm::new(story_handler(None)));
        let (tts, gate) = ScriptedTts::gated(|_, _| Ok(pcm_speech(None)));
        let pipeline = pipeline(
            llm,
            Arc::new(tts),
            Arc::new(CountingBackend::default()),
            Duration::from_secs(5),
        );

        let handle = pipeline.start(three_minute_route()).unwrap();
        let mut rx = handle.subscribe();
        let early = rx.wait_for(|s| s.story.len() == 1).await?.clone();

        assert_eq!(early.state, RunState::Playing);
        assert!(early.background_generating);
        assert!(early.story.get(1).unwrap().audio.is_none());

        gate.add_permits(3);
        let snapshot = handle.wait().await;
        assert_eq!(snapshot.story.len(), 3);
        assert!(snapshot.story.segments().all(|s| s.audio.is_some()));
        assert!(!snapshot.background_generating);
        Ok(())
    }
}
