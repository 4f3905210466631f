//! Event types for the Melo event system
//!
//! Provides the shared event enum and an EventBus for observers (console
//! renderers, loggers, tests). Emission is fire-and-forget: an interview
//! never depends on anyone listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Melo event types
///
/// Serialized with an internal `type` tag so a stream of events can be
/// written out as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeloEvent {
    /// Interviewer asked a question
    QuestionAsked {
        turn: u32,
        question: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Participant answer appended to the transcript
    AnswerRecorded {
        turn: u32,
        answer: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Ambience loop started with a new URL set
    AmbienceStarted {
        session_id: Uuid,
        keywords: Vec<String>,
        url_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Ambience loop drained and stopped
    AmbienceStopped {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track selected for the conversation so far (or the whole interview)
    TrackSelected {
        track_id: String,
        title: String,
        artist: String,
        score: f64,
        overall: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Turn loop ended
    InterviewFinished {
        turns: u32,
        answers: usize,
        interrupted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for [`MeloEvent`]
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeloEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MeloEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: MeloEvent) -> Result<usize, broadcast::error::SendError<MeloEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MeloEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
