//! Shared helpers for parley-voice integration tests.

// Each test binary uses a different subset.
#![allow(dead_code)]

pub mod mocks;

use std::time::Duration;

use parley_core::TurnEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receive events until one matches, returning everything seen up to and
/// including it.
pub async fn events_until(
    rx: &mut UnboundedReceiver<TurnEvent>,
    done: impl Fn(&TurnEvent) -> bool,
) -> Vec<TurnEvent> {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("event channel closed");
            let stop = done(&event);
            seen.push(event);
            if stop {
                return seen;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `ready` until it holds.
pub async fn wait_until(what: &str, ready: impl Fn() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Drain whatever is already queued.
pub fn drain(rx: &mut UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Event names, for compact ordering assertions.
pub fn names(events: &[TurnEvent]) -> Vec<&'static str> {
    events.iter().map(TurnEvent::event_name).collect()
}

/// Texts of `PlaybackTranscriptSegment` events, in order.
pub fn played_segments(events: &[TurnEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::PlaybackTranscriptSegment { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}
