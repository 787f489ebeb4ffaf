//! Core types for campaign-dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;

/// Unique identifier for a campaign
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub i64);

/// Unique identifier for a recipient record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

// Both ids are plain INTEGER primary keys; give them the same conversions and
// sqlx bindings.
macro_rules! integer_id {
    ($name:ident) => {
        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

integer_id!(CampaignId);
integer_id!(RecipientId);

/// Lifecycle state of a campaign run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet sending
    #[default]
    Pending,
    /// Submitting and delivering messages
    Running,
    /// Paused by the operator; no new submissions
    Paused,
    /// Every pending recipient was processed
    Completed,
    /// Stopped by the operator
    Cancelled,
    /// Run-fatal failure, or every attempted send failed
    Error,
}

impl RunStatus {
    /// Convert integer status code to RunStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => RunStatus::Pending,
            1 => RunStatus::Running,
            2 => RunStatus::Paused,
            3 => RunStatus::Completed,
            4 => RunStatus::Cancelled,
            _ => RunStatus::Error, // Unknown codes surface as Error
        }
    }

    /// Convert RunStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            RunStatus::Paused => 2,
            RunStatus::Completed => 3,
            RunStatus::Cancelled => 4,
            RunStatus::Error => 5,
        }
    }

    /// Lowercase name used in events and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Error => "error",
        }
    }

    /// True once the run can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Error
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a single recipient
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Not yet attempted in the current run
    #[default]
    Pending,
    /// Delivered to the transport successfully
    Sent,
    /// All attempts failed
    Error,
    /// Excluded from sending
    Skipped,
}

impl DeliveryStatus {
    /// Convert integer status code to DeliveryStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => DeliveryStatus::Pending,
            1 => DeliveryStatus::Sent,
            3 => DeliveryStatus::Skipped,
            _ => DeliveryStatus::Error,
        }
    }

    /// Convert DeliveryStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Error => 2,
            DeliveryStatus::Skipped => 3,
        }
    }

    /// Outcome keyword written to the delivery log
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Error => "error",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

/// Severity of a campaign event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Progress information
    Info,
    /// A message was delivered
    Success,
    /// Something was skipped or degraded but the run continues
    Warning,
    /// A send or the run itself failed
    Error,
    /// Diagnostic detail (e.g. how an attachment was matched)
    Debug,
}

impl EventLevel {
    /// Lowercase name stored in the durable event log
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Success => "success",
            EventLevel::Warning => "warning",
            EventLevel::Error => "error",
            EventLevel::Debug => "debug",
        }
    }

    /// Parse a stored level name, defaulting to Info
    pub fn parse(level: &str) -> Self {
        match level {
            "success" => EventLevel::Success,
            "warning" => EventLevel::Warning,
            "error" => EventLevel::Error,
            "debug" => EventLevel::Debug,
            _ => EventLevel::Info,
        }
    }
}

/// Event emitted while a campaign runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignEvent {
    /// Severity
    pub level: EventLevel,
    /// Human-readable message
    pub message: String,
    /// Optional structured details (recipient address, search term, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
    /// When the event was produced
    pub created_at: DateTime<Utc>,
}

impl CampaignEvent {
    /// Create an event stamped with the current time
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A fixed file attached to every message of a campaign
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    /// Location on disk
    pub path: PathBuf,
    /// Name shown to the recipient
    pub filename: String,
}

impl AttachmentDescriptor {
    /// Descriptor whose display name is the file's own name
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, filename }
    }
}

/// Per-recipient attachment resolution settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicAttachment {
    /// Whether a personalised attachment is looked up per recipient
    #[serde(default)]
    pub enabled: bool,
    /// File name template rendered with the recipient context (e.g. "Invitation {{name}}.pdf")
    #[serde(default)]
    pub pattern: Option<String>,
    /// Folder holding the candidate files
    #[serde(default)]
    pub folder: Option<PathBuf>,
}

/// Immutable snapshot of a campaign's settings, read once at run start
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Subject template
    pub subject: String,
    /// HTML body template
    pub html_body: String,
    /// Optional plain-text body template (derived from the HTML when absent)
    #[serde(default)]
    pub text_body: Option<String>,
    /// Worker pool size (falls back to the dispatcher default)
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Attempt budget per message (falls back to the transport default)
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Pause between submissions
    #[serde(default, with = "crate::config::duration_secs")]
    pub batch_pause: Duration,
    /// Substitute every destination with a rotation of demo addresses
    #[serde(default)]
    pub demo_mode: bool,
    /// Demo addresses, used round-robin
    #[serde(default)]
    pub demo_emails: Vec<String>,
    /// Personalised attachment settings
    #[serde(default)]
    pub dynamic_attachment: DynamicAttachment,
    /// Attachments sent to every recipient
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
}

impl CampaignSettings {
    /// Minimal settings with just the content templates
    pub fn new(subject: impl Into<String>, html_body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
            max_workers: None,
            max_retries: None,
            batch_pause: Duration::ZERO,
            demo_mode: false,
            demo_emails: Vec::new(),
            dynamic_attachment: DynamicAttachment::default(),
            attachments: Vec::new(),
        }
    }
}

/// A campaign as held by the store
#[derive(Clone, Debug)]
pub struct Campaign {
    /// Campaign ID
    pub id: CampaignId,
    /// Display name
    pub name: String,
    /// Current settings
    pub settings: CampaignSettings,
    /// Last persisted tally
    pub tally: CampaignTally,
}

/// Final (or last persisted) counters of a campaign run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignTally {
    /// Run status
    pub status: RunStatus,
    /// Number of recipients in the run
    pub total: u64,
    /// Delivered
    pub sent: u64,
    /// Failed after all attempts
    pub errors: u64,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,
}

/// One recipient of a campaign
#[derive(Clone, Debug, PartialEq)]
pub struct Recipient {
    /// Recipient ID
    pub id: RecipientId,
    /// Owning campaign
    pub campaign_id: CampaignId,
    /// Destination address
    pub email: String,
    /// Personalisation context
    pub data: HashMap<String, String>,
    /// Delivery state
    pub status: DeliveryStatus,
    /// Attempts consumed by the last send
    pub attempts: u32,
    /// Last error message
    pub error_message: Option<String>,
    /// When the message was delivered
    pub sent_at: Option<DateTime<Utc>>,
}

/// Result of delivering one message
#[derive(Clone, Debug, PartialEq)]
pub struct SendOutcome {
    /// Whether the transport accepted the message
    pub success: bool,
    /// Original (pre-demo substitution) destination address
    pub destination: String,
    /// Last status code observed, if any
    pub status_code: Option<u16>,
    /// Human-readable result
    pub message: String,
    /// Attempts actually consumed
    pub attempts: u32,
    /// Error kind of the last failed attempt
    pub error: Option<TransportError>,
}

impl SendOutcome {
    /// Successful delivery
    pub fn delivered(destination: impl Into<String>, status_code: u16, attempts: u32) -> Self {
        Self {
            success: true,
            destination: destination.into(),
            status_code: Some(status_code),
            message: "Delivered".to_string(),
            attempts,
            error: None,
        }
    }

    /// Failed delivery after `attempts` attempts
    pub fn failed(destination: impl Into<String>, error: TransportError, attempts: u32) -> Self {
        Self {
            success: false,
            destination: destination.into(),
            status_code: error.status_code(),
            message: format!("Failed after {attempts} attempt(s): {error}"),
            attempts,
            error: Some(error),
        }
    }
}

/// Progress snapshot returned by `Dispatcher::get_status`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    /// Run status
    pub status: RunStatus,
    /// Recipients in the run
    pub total: u64,
    /// Delivered so far
    pub sent: u64,
    /// Failed so far
    pub errors: u64,
    /// Not yet processed
    pub pending: u64,
    /// Processed share (0.0 to 100.0)
    pub progress_percent: f64,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since start (live runs only)
    pub elapsed_seconds: Option<f64>,
    /// Linear-rate estimate of the remaining time (live runs only)
    pub estimated_remaining_seconds: Option<f64>,
}

impl RunStatusReport {
    /// Build a report from counters, computing the derived fields
    pub fn from_counts(
        status: RunStatus,
        total: u64,
        sent: u64,
        errors: u64,
        started_at: Option<DateTime<Utc>>,
        elapsed: Option<Duration>,
    ) -> Self {
        let processed = sent + errors;
        let progress_percent = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let elapsed_seconds = elapsed.map(|e| e.as_secs_f64());
        let estimated_remaining_seconds = elapsed_seconds.and_then(|secs| {
            if processed == 0 || total <= processed || secs <= 0.0 {
                return None;
            }
            let rate = processed as f64 / secs;
            Some((total - processed) as f64 / rate)
        });

        Self {
            status,
            total,
            sent,
            errors,
            pending: total.saturating_sub(processed),
            progress_percent,
            started_at,
            elapsed_seconds,
            estimated_remaining_seconds,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn run_status_round_trips_through_i32() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Completed,
            RunStatus::Cancelled,
            RunStatus::Error,
        ] {
            assert_eq!(RunStatus::from_i32(status.to_i32()), status);
        }
        assert_eq!(RunStatus::from_i32(42), RunStatus::Error);
    }

    #[test]
    fn only_finished_runs_are_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }

    #[test]
    fn delivery_status_unknown_code_is_error() {
        assert_eq!(DeliveryStatus::from_i32(1), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::from_i32(-4), DeliveryStatus::Error);
    }

    #[test]
    fn campaign_id_parses_and_displays() {
        let id = CampaignId::from_str("12").unwrap();
        assert_eq!(id, CampaignId(12));
        assert_eq!(id.to_string(), "12");
        assert!(CampaignId::from_str("twelve").is_err());
    }

    #[test]
    fn event_serializes_lowercase_level_and_skips_empty_details() {
        let event = CampaignEvent::new(EventLevel::Warning, "attachment missing");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "warning");
        assert!(json.get("details").is_none());

        let event = event.with_detail("email", "ana@example.com");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["details"]["email"], "ana@example.com");
    }

    #[test]
    fn report_estimates_remaining_time_linearly() {
        let report = RunStatusReport::from_counts(
            RunStatus::Running,
            10,
            3,
            1,
            None,
            Some(Duration::from_secs(8)),
        );
        assert_eq!(report.pending, 6);
        assert!((report.progress_percent - 40.0).abs() < f64::EPSILON);
        // 4 processed in 8s = 0.5/s, 6 remaining = 12s
        let eta = report.estimated_remaining_seconds.unwrap();
        assert!((eta - 12.0).abs() < 1e-9);
    }

    #[test]
    fn report_has_no_estimate_before_first_completion() {
        let report = RunStatusReport::from_counts(
            RunStatus::Running,
            5,
            0,
            0,
            None,
            Some(Duration::from_secs(3)),
        );
        assert_eq!(report.estimated_remaining_seconds, None);
        assert_eq!(report.pending, 5);
    }

    #[test]
    fn failed_outcome_carries_status_code_and_attempts() {
        let outcome = SendOutcome::failed(
            "ana@example.com",
            TransportError::Http {
                status: 503,
                body: "unavailable".to_string(),
            },
            2,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.message.contains("2 attempt(s)"));
    }

    #[test]
    fn descriptor_from_path_uses_file_name() {
        let att = AttachmentDescriptor::from_path("/srv/files/terms.pdf");
        assert_eq!(att.filename, "terms.pdf");
    }
}
