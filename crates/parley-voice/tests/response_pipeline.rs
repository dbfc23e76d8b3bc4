//! Integration tests for `ResponsePipeline`.
//!
//! Turns run end to end against the mock collaborators in `common::mocks`:
//! a scripted or streaming model, a speech generator that synthesizes
//! instantly and a callback output that plays instantly.
//!
//! # What is tested
//!
//! - A spoken turn plays every segment, in order, and completes
//! - The tool loop feeds tool output back to the model
//! - The tool loop stops at the configured iteration cap
//! - A panicking worker fails the turn and names the worker
//! - A model error fails the turn; finalize still closes TTS
//! - Concurrent cancels tear the turn down exactly once
//! - Cancelling the caller's token cancels the turn
//! - Pause is only accepted once until resumed
//! - Pause then resume replays unplayed audio and the turn completes
//! - Pausing after everything was played still lets the turn end
//! - Stop speaking drops queued marks, freezes what was heard and the turn
//!   still completes

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::mocks::{
    ChattyModel, EchoTools, FailingModel, InstantOutput, InstantSpeech, PanickingModel,
    QueuedOutput, ScriptedModel, SpeechLog, ToolHungryModel,
};
use common::{TEST_TIMEOUT, events_until, init_tracing, names, played_segments, wait_until};
use parley_core::{
    AudioOutputClient, ChannelTurnEvents, ChatRole, LanguageModel, ModelResponse, ToolCall,
    ToolOutcome, Trigger, TtsClient, Turn, TurnEvent, VoiceSettings,
};
use parley_voice::{PipelineConfig, PipelineError, PipelineState, ResponsePipeline};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

// ── Helpers ────────────────────────────────────────────────────────

struct Harness {
    pipeline: ResponsePipeline,
    events: UnboundedReceiver<TurnEvent>,
    speech: Arc<SpeechLog>,
    output: Arc<InstantOutput>,
}

fn harness(settings: &VoiceSettings, llm: LanguageModel) -> Harness {
    init_tracing();
    let speech = InstantSpeech::default();
    let log = Arc::clone(&speech.log);
    let output = Arc::new(InstantOutput::default());
    let (sink, events) = ChannelTurnEvents::new();

    let config = PipelineConfig::from_settings(settings)
        .with_llm(llm)
        .with_tts(TtsClient::Generator(Arc::new(speech)))
        .with_output(AudioOutputClient::Callback(output.clone()));
    Harness {
        pipeline: ResponsePipeline::new(config, Arc::new(sink)),
        events,
        speech: log,
        output,
    }
}

/// Start a turn answering "Hello. World." against an output that holds
/// marks until the test plays them.
fn start_queued_turn(
    sample_rate: u32,
) -> (
    ResponsePipeline,
    UnboundedReceiver<TurnEvent>,
    Arc<QueuedOutput>,
    JoinHandle<(Turn, Result<(), PipelineError>)>,
) {
    init_tracing();
    let model = Arc::new(ScriptedModel::new([reply("Hello. World.")]));
    let output = Arc::new(QueuedOutput::new(sample_rate));
    let (sink, events) = ChannelTurnEvents::new();
    let config = PipelineConfig::from_settings(&VoiceSettings::default())
        .with_llm(LanguageModel::Prompt(model))
        .with_tts(TtsClient::Generator(Arc::new(InstantSpeech::default())))
        .with_output(AudioOutputClient::Callback(output.clone()));
    let pipeline = ResponsePipeline::new(config, Arc::new(sink));

    let runner = pipeline.clone();
    let run = tokio::spawn(async move {
        runner
            .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
            .await
    });
    (pipeline, events, output, run)
}

async fn finished(
    run: JoinHandle<(Turn, Result<(), PipelineError>)>,
) -> (Turn, Result<(), PipelineError>) {
    tokio::time::timeout(TEST_TIMEOUT, run)
        .await
        .expect("turn never finished")
        .unwrap()
}

fn reply(content: &str) -> ModelResponse {
    ModelResponse {
        content: content.to_string(),
        tool_calls: Vec::new(),
    }
}

fn is_terminal(event: &TurnEvent) -> bool {
    matches!(
        event,
        TurnEvent::TurnCompleted { .. }
            | TurnEvent::TurnFailed { .. }
            | TurnEvent::TurnCancelled { .. }
    )
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn spoken_turn_plays_every_segment() {
    let model = Arc::new(ScriptedModel::new([reply("Hello. World")]));
    let mut h = harness(&VoiceSettings::default(), LanguageModel::Prompt(model));

    let (turn, result) = h
        .pipeline
        .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
        .await;
    result.unwrap();

    assert!(turn.finalized);
    assert_eq!(turn.responses, vec!["Hello. World".to_string()]);
    assert_eq!(turn.spoken_text, "Hello. World");
    assert_eq!(h.pipeline.state(), PipelineState::Done);

    let events = events_until(&mut h.events, is_terminal).await;
    assert_eq!(played_segments(&events), vec!["Hello.", " World"]);
    let names = names(&events);
    assert_eq!(names.first(), Some(&"turn_started"));
    assert_eq!(names.last(), Some(&"turn_completed"));
    let started = names.iter().position(|n| *n == "playback_started").unwrap();
    let ended = names.iter().position(|n| *n == "playback_ended").unwrap();
    assert!(started < ended);

    assert_eq!(h.speech.spoken(), "Hello. World");
    assert_eq!(h.output.bytes_played(), "Hello. World".len() * 2);
    // Two segment marks plus end of speech.
    assert_eq!(h.output.marks.lock().unwrap().len(), 3);
    assert_eq!(SpeechLog::count(&h.speech.closes), 1);
    assert_eq!(SpeechLog::count(&h.speech.cancels), 0);
}

#[tokio::test]
async fn tool_output_is_fed_back_to_the_model() {
    let call = ToolCall::new("c1", "weather", serde_json::json!({ "city": "Oslo" }));
    let model = Arc::new(ScriptedModel::new([
        ModelResponse {
            content: "Let me check. ".into(),
            tool_calls: vec![call],
        },
        reply("It is sunny."),
    ]));
    let config = PipelineConfig::from_settings(&VoiceSettings::default())
        .with_llm(LanguageModel::Prompt(model.clone()))
        .with_tools(Arc::new(EchoTools));
    let (sink, mut events) = ChannelTurnEvents::new();
    let pipeline = ResponsePipeline::new(config, Arc::new(sink));

    let (turn, result) = pipeline
        .run(&CancellationToken::new(), Turn::new(Trigger::manual("weather?")), &[])
        .await;
    result.unwrap();

    assert_eq!(turn.responses, vec!["Let me check. ", "It is sunny."]);
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(
        turn.tool_calls[0].outcome,
        ToolOutcome::Completed(r#"weather({"city":"Oslo"})"#.into())
    );

    assert_eq!(model.call_count(), 2);
    let second = model.calls.lock().unwrap()[1].clone();
    let last = second.last().unwrap();
    assert_eq!(last.role, ChatRole::Tool);
    assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(second[second.len() - 2].role, ChatRole::Assistant);

    let names = names(&events_until(&mut events, is_terminal).await);
    assert!(names.contains(&"tool_call_started"));
    assert!(names.contains(&"tool_call_completed"));
    assert_eq!(names.iter().filter(|n| **n == "response_final").count(), 2);
}

#[tokio::test]
async fn tool_loop_stops_at_the_cap() {
    let settings = VoiceSettings {
        max_tool_iterations: Some(2),
        ..VoiceSettings::default()
    };
    let mut h = harness(&settings, LanguageModel::Prompt(Arc::new(ToolHungryModel)));

    let (turn, result) = h
        .pipeline
        .run(&CancellationToken::new(), Turn::new(Trigger::manual("go")), &[])
        .await;

    assert!(matches!(result, Err(PipelineError::ToolLoopExhausted(2))));
    // Round two asks again but is not executed.
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.responses.len(), 2);
    let events = events_until(&mut h.events, is_terminal).await;
    assert!(matches!(events.last(), Some(TurnEvent::TurnFailed { .. })));
}

#[tokio::test]
async fn panicking_worker_fails_the_turn_by_name() {
    let mut h = harness(
        &VoiceSettings::default(),
        LanguageModel::Prompt(Arc::new(PanickingModel)),
    );

    let (turn, result) = h
        .pipeline
        .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
        .await;

    let errors = result.unwrap_err().into_vec();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        PipelineError::WorkerPanicked { worker, message } => {
            assert_eq!(*worker, "generate");
            assert_eq!(message, "model exploded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!turn.cancelled);
    assert!(turn.finished_at.is_some());

    let events = events_until(&mut h.events, is_terminal).await;
    match events.last() {
        Some(TurnEvent::TurnFailed { error, .. }) => {
            assert_eq!(error, "generate worker panicked: model exploded");
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn model_error_still_finalizes() {
    let h = harness(
        &VoiceSettings::default(),
        LanguageModel::Prompt(Arc::new(FailingModel)),
    );

    let (turn, result) = h
        .pipeline
        .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
        .await;

    assert_eq!(
        result.unwrap_err().to_string(),
        "generate worker failed: rate limited"
    );
    assert!(turn.responses.is_empty());
    assert_eq!(h.pipeline.state(), PipelineState::Done);
    // The session may or may not have opened before the failure; it is
    // never closed more than once.
    assert!(SpeechLog::count(&h.speech.closes) <= SpeechLog::count(&h.speech.opened));
}

#[tokio::test]
async fn concurrent_cancels_tear_down_once() {
    let mut h = harness(
        &VoiceSettings::default(),
        LanguageModel::Streaming(Arc::new(ChattyModel)),
    );
    let cancelled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cancelled);
    h.pipeline.on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let pipeline = h.pipeline.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(&CancellationToken::new(), Turn::new(Trigger::manual("wait for it")), &[])
            .await
    });

    events_until(&mut h.events, |e| {
        matches!(e, TurnEvent::PlaybackTranscriptSegment { .. })
    })
    .await;

    let (a, b) = tokio::join!(h.pipeline.cancel(), h.pipeline.cancel());
    assert!(a ^ b, "exactly one cancel wins");

    let (turn, result) = run.await.unwrap();
    result.unwrap();
    assert!(turn.cancelled);
    assert!(!turn.finalized);
    assert_eq!(turn.spoken_text, "Working on it.");

    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(SpeechLog::count(&h.speech.cancels), 1);
    assert_eq!(SpeechLog::count(&h.speech.closes), 1);
    assert_eq!(h.output.clears.load(Ordering::SeqCst), 1);

    let events = events_until(&mut h.events, is_terminal).await;
    assert!(matches!(events.last(), Some(TurnEvent::TurnCancelled { .. })));
    assert!(!names(&events).contains(&"playback_ended"));
}

#[tokio::test]
async fn parent_token_cancels_the_turn() {
    let mut h = harness(
        &VoiceSettings::default(),
        LanguageModel::Streaming(Arc::new(ChattyModel)),
    );
    let parent = CancellationToken::new();

    let pipeline = h.pipeline.clone();
    let token = parent.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(&token, Turn::new(Trigger::manual("wait")), &[])
            .await
    });

    events_until(&mut h.events, |e| {
        matches!(e, TurnEvent::ResponseTextSegment { .. })
    })
    .await;
    parent.cancel();

    let (turn, result) = run.await.unwrap();
    result.unwrap();
    assert!(turn.cancelled);
    assert!(!h.pipeline.is_cancelled(), "cancel() itself was never called");
}

#[tokio::test]
async fn pause_is_accepted_once_until_resumed() {
    let mut h = harness(
        &VoiceSettings::default(),
        LanguageModel::Streaming(Arc::new(ChattyModel)),
    );
    let pipeline = h.pipeline.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(&CancellationToken::new(), Turn::new(Trigger::manual("wait")), &[])
            .await
    });

    events_until(&mut h.events, |e| {
        matches!(e, TurnEvent::PlaybackTranscriptSegment { .. })
    })
    .await;

    assert!(h.pipeline.pause().await);
    assert!(!h.pipeline.pause().await);
    assert_eq!(h.output.clears.load(Ordering::SeqCst), 1);
    assert!(h.pipeline.unpause());
    assert!(!h.pipeline.unpause());

    h.pipeline.cancel().await;
    let (turn, _) = run.await.unwrap();
    assert!(turn.cancelled);
}

#[tokio::test]
async fn pause_then_resume_replays_unplayed_audio() {
    // 20 bytes per second: nothing is estimated played before the pause.
    let (pipeline, mut events, output, run) = start_queued_turn(10);
    // "Hello.", " World." and end of speech.
    wait_until("three queued marks", || output.pending_marks() == 3).await;
    assert_eq!(output.frames.load(Ordering::SeqCst), 2);

    assert!(pipeline.pause().await);
    assert_eq!(output.pending_marks(), 0, "clear drops queued marks");
    assert!(pipeline.unpause());

    wait_until("marks sent again", || output.pending_marks() == 3).await;
    assert_eq!(output.frames.load(Ordering::SeqCst), 4);
    assert_eq!(output.play_all(), 3);

    let (turn, result) = finished(run).await;
    assert_ok!(result);
    assert!(turn.finalized);
    assert_eq!(turn.spoken_text, "Hello. World.");

    let events = events_until(&mut events, is_terminal).await;
    assert_eq!(played_segments(&events), vec!["Hello.", " World."]);
    assert!(matches!(events.last(), Some(TurnEvent::TurnCompleted { .. })));
}

#[tokio::test]
async fn pause_after_everything_played_lets_the_turn_end() {
    // 2000 bytes per second: the whole reply plays in about 13ms.
    let (pipeline, mut events, output, run) = start_queued_turn(1000);
    wait_until("three queued marks", || output.pending_marks() == 3).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(pipeline.pause().await);
    assert!(!pipeline.unpause(), "nothing is left to resume");

    let (turn, result) = finished(run).await;
    assert_ok!(result);
    assert!(turn.finalized);
    assert_eq!(turn.spoken_text, "Hello. World.");
    let events = events_until(&mut events, is_terminal).await;
    assert!(matches!(events.last(), Some(TurnEvent::TurnCompleted { .. })));
}

#[tokio::test]
async fn stop_speaking_drops_queued_marks_and_completes() {
    let (pipeline, mut events, output, run) = start_queued_turn(10);
    wait_until("three queued marks", || output.pending_marks() == 3).await;
    assert!(output.play_next().is_some());

    pipeline.stop_speaking().await;
    assert_eq!(output.clears.load(Ordering::SeqCst), 1);
    assert_eq!(output.pending_marks(), 0);
    // A second request changes nothing.
    pipeline.stop_speaking().await;
    assert_eq!(output.clears.load(Ordering::SeqCst), 1);

    let (turn, result) = finished(run).await;
    assert_ok!(result);
    assert!(turn.finalized);
    assert!(!turn.cancelled);
    assert_eq!(turn.responses, vec!["Hello. World.".to_string()]);
    assert_eq!(turn.spoken_text, "Hello.");

    let events = events_until(&mut events, is_terminal).await;
    assert_eq!(played_segments(&events), vec!["Hello."]);
    assert!(matches!(events.last(), Some(TurnEvent::TurnCompleted { .. })));
}
