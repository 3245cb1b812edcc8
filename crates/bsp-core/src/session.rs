//! Acquisition session state and lifecycle events
//!
//! Connection and recording flags live in an explicit [`SessionState`] that is
//! handed to whoever drives the acquisition. State changes travel as
//! [`AcquisitionEvent`] values, either over a channel or through an
//! [`AcquisitionObserver`].

use crate::frame::{Frame, SequenceTracker};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Events emitted by an acquisition source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionEvent {
    /// Source opened (port name, file path, or other label)
    Connected { port: String },
    /// Source closed
    Disconnected,
    /// Sample acquisition started; filters should start from rest
    Started,
    /// Sample acquisition stopped
    Stopped,
    /// One decoded frame
    PacketReceived(Frame),
}

/// Synchronous receiver of acquisition events
pub trait AcquisitionObserver {
    /// Handle one event
    fn on_event(&mut self, event: &AcquisitionEvent);
}

/// Explicit session status for one acquisition source
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Label of the connected source, if any
    pub port: Option<String>,
    /// Samples are being acquired
    pub acquiring: bool,
    /// Filtered samples are being recorded
    pub recording: bool,
    /// Frames received in the current session
    pub packet_count: u64,
    /// Sequence gap detection for the current session
    pub sequence: SequenceTracker,
    started_at: Option<Instant>,
}

impl SessionState {
    /// Create an idle, disconnected session
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a source is connected
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Time since acquisition started
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    /// Average frame rate since acquisition started
    pub fn packet_rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.packet_count as f64 / secs
        } else {
            0.0
        }
    }

    fn begin(&mut self) {
        self.acquiring = true;
        self.packet_count = 0;
        self.sequence.reset();
        self.started_at = Some(Instant::now());
    }
}

impl AcquisitionObserver for SessionState {
    fn on_event(&mut self, event: &AcquisitionEvent) {
        match event {
            AcquisitionEvent::Connected { port } => {
                self.port = Some(port.clone());
            }
            AcquisitionEvent::Disconnected => {
                self.port = None;
                self.acquiring = false;
                self.recording = false;
            }
            AcquisitionEvent::Started => self.begin(),
            AcquisitionEvent::Stopped => {
                self.acquiring = false;
            }
            AcquisitionEvent::PacketReceived(frame) => {
                self.packet_count += 1;
                self.sequence.observe(frame.sequence);
            }
        }
    }
}
