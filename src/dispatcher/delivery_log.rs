//! Per-run CSV delivery log
//!
//! Each run writes one file named after the campaign and the run's start
//! time, `campaign_{id}_{YYYYmmdd_HHMMSS}.csv`, with one line per completed
//! send: `timestamp,email,status,attempts,message`. The file is opened once
//! by the run and written only by its draining task.

use crate::error::Result;
use crate::types::{CampaignId, DeliveryStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Header line of every delivery log
pub const HEADER: &str = "timestamp,email,status,attempts,message";

/// Append-only delivery log of one run
#[derive(Debug)]
pub struct DeliveryLog {
    path: PathBuf,
    file: tokio::fs::File,
}

impl DeliveryLog {
    /// Create the log for a run started at `started_at` and write its header
    ///
    /// Creates `logs_dir` if needed.
    pub async fn create(
        logs_dir: &Path,
        campaign_id: CampaignId,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(logs_dir).await?;

        let path = logs_dir.join(file_name(campaign_id, started_at));
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(HEADER.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(Self { path, file })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one completed send
    pub async fn append(
        &mut self,
        email: &str,
        status: DeliveryStatus,
        attempts: u32,
        message: &str,
    ) -> Result<()> {
        let line = format!(
            "{},{},{},{},{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            escape_field(email),
            status.as_str(),
            attempts,
            escape_field(message),
        );
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Deterministic log file name for a run
pub fn file_name(campaign_id: CampaignId, started_at: DateTime<Utc>) -> String {
    format!(
        "campaign_{}_{}.csv",
        campaign_id,
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Most recent delivery log of a campaign in `logs_dir`
///
/// Returns `None` when the directory or a matching file does not exist.
pub async fn latest_for(logs_dir: &Path, campaign_id: CampaignId) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(logs_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("campaign_{}_", campaign_id);
    let mut latest: Option<String> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stamp) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".csv"))
        else {
            continue;
        };
        // YYYYmmdd_HHMMSS
        if stamp.len() != 15 || !stamp.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        // Timestamps sort lexically
        if latest.as_ref().is_none_or(|current| name > *current) {
            latest = Some(name);
        }
    }

    Ok(latest.map(|name| logs_dir.join(name)))
}

/// Quote a CSV field when it contains a separator, quote or line break
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
