//! Event types emitted to the UI layer
//!
//! Events are sent from the scenario to the host application, which renders
//! messages and answers prompts through
//! [`Scenario::resolve_prompt`](crate::Scenario::resolve_prompt).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::metadata::AbortInfo;
use crate::types::{PrimitiveName, ScenarioState};

/// Trait for sending scenario events
///
/// This abstracts over the transport mechanism (platform bridge, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: ScenarioEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while a scenario runs
///
/// Variants carrying a `prompt_id` suspend the emitting branch until the
/// host answers that prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScenarioEvent {
    /// Lifecycle state changed
    State { state: ScenarioState },

    /// Show (or clear) a message; texts are already formatted
    #[serde(rename_all = "camelCase")]
    DisplayMessage {
        primitive_name: PrimitiveName,
        title: Option<String>,
        msg: Option<String>,
        text: Option<String>,
        section: Option<String>,
        step: Option<String>,
    },

    /// Show progress `value` out of `count`
    #[serde(rename_all = "camelCase")]
    DisplayProgress {
        text: Option<String>,
        value: f64,
        count: f64,
        step: Option<String>,
    },

    /// Wait for the user to advance
    #[serde(rename_all = "camelCase")]
    WaitNext { prompt_id: u64 },

    /// Run a countdown, answer when it elapses
    #[serde(rename_all = "camelCase")]
    WaitCountdown { prompt_id: u64, countdown: f64 },

    /// Ask the user to pick one option; the answer is the option index
    #[serde(rename_all = "camelCase")]
    WaitOption {
        prompt_id: u64,
        title: Option<String>,
        msg: Option<String>,
        options: Vec<String>,
    },

    /// Enable or disable screen sleep, answer once applied
    #[serde(rename_all = "camelCase")]
    ScreenSleep { prompt_id: u64, enable: bool },

    /// Microphone recording started or stopped
    #[serde(rename = "mic.recording")]
    MicRecording { recording: bool },

    /// The scenario stopped
    Finished {
        error: Option<String>,
        abort: Option<AbortInfo>,
    },
}

impl ScenarioEvent {
    /// Prompt id of a suspending event
    pub fn prompt_id(&self) -> Option<u64> {
        match self {
            Self::WaitNext { prompt_id }
            | Self::WaitCountdown { prompt_id, .. }
            | Self::WaitOption { prompt_id, .. }
            | Self::ScreenSleep { prompt_id, .. } => Some(*prompt_id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ScenarioEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<ScenarioEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ScenarioEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ScenarioEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ScenarioEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScenarioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: ScenarioEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}
