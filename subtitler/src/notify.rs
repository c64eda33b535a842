//! Messages pushed to clients and the channel they travel over.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// WebSocket close code used when a newer connection replaces an older one.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Where a single file is in its processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Waiting,
    LoadingModel,
    Transcribing,
    LanguageCheck,
    WritingOutput,
    Completed,
    Skipped,
    Cancelled,
    Error,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Skipped | UnitStatus::Cancelled | UnitStatus::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub file_path: String,
    pub status: UnitStatus,
    pub message: String,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_preview: Option<String>,
    /// Wall-clock seconds spent holding the model slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl StatusUpdate {
    pub fn new(
        file_path: impl Into<String>,
        status: UnitStatus,
        message: impl Into<String>,
        progress_percent: u8,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            status,
            message: message.into(),
            progress_percent,
            language: None,
            output_path: None,
            subtitle_preview: None,
            processing_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub file_path: String,
    #[serde(rename = "status")]
    pub level: LogLevel,
    pub message: String,
    pub progress_percent: u8,
}

/// Per-category tally sent when a batch ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub completed_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub cancelled_count: usize,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.completed_count + self.skipped_count + self.error_count + self.cancelled_count
    }
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StatusUpdate(StatusUpdate),
    Log(LogLine),
    BatchStart { total_files: usize },
    BatchComplete(BatchSummary),
    BatchCancelled(BatchSummary),
    StopAcknowledged,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::StatusUpdate(_) => "status_update",
            Notification::Log(_) => "log",
            Notification::BatchStart { .. } => "batch_start",
            Notification::BatchComplete(_) => "batch_complete",
            Notification::BatchCancelled(_) => "batch_cancelled",
            Notification::StopAcknowledged => "stop_acknowledged",
        }
    }
}

/// Client → server message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StopProcessing,
}

/// A live, bidirectional connection to one client.
///
/// Identity matters: the connection registry compares channels by pointer,
/// so each physical connection must be wrapped in exactly one `Arc`.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Activate the channel. Transports that are live on creation keep the default.
    async fn accept(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, message: &Notification) -> Result<()>;

    async fn close(&self, code: u16) -> Result<()>;
}
