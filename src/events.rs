//! Event sinks for chain progress.
//!
//! The engine never talks to a global bus. Whoever builds it hands in an
//! [`EventSink`] and decides where events go: a channel for the CLI progress
//! view, the tracing log, a recording buffer in tests, or several at once.

use std::sync::{Arc, Mutex};
use stepchain_common::ChainEvent;
use tokio::sync::mpsc;

/// Receiver of [`ChainEvent`]s.
///
/// `emit` is synchronous and must not block; sinks that do real work should
/// hand the event off to a channel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChainEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ChainEvent) {}
}

/// Forwards events to an unbounded tokio channel.
///
/// A dropped receiver is not an error; events are silently discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ChainEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ChainEvent) {
        let _ = self.tx.send(event);
    }
}

/// Mirrors events into the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ChainEvent) {
        let id = event.subject_id();
        let message = event.message().unwrap_or_default();
        match &event {
            ChainEvent::TaskProgress {
                chain_id, percent, ..
            } => {
                tracing::debug!(%chain_id, task_id = id, percent, %message, "Task progress");
            }
            ChainEvent::TaskCompleted { success: false, .. } => {
                tracing::warn!(task_id = id, %message, "Task failed");
            }
            ChainEvent::TaskCompleted { .. } => {
                tracing::debug!(task_id = id, %message, "Task completed");
            }
            ChainEvent::ChainFailed { failed_tasks, .. } => {
                tracing::error!(chain_id = id, ?failed_tasks, %message, "Chain failed");
            }
            ChainEvent::ChainAbandoned { .. } => {
                tracing::warn!(chain_id = id, %message, "Chain abandoned");
            }
            _ => {
                tracing::info!(chain_id = id, %message, "Chain event");
            }
        }
    }
}

/// Sends each event to every inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: ChainEvent) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.emit(event.clone());
        }
        last.emit(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ChainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<ChainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count_matching(&self, predicate: impl Fn(&ChainEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ChainEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
