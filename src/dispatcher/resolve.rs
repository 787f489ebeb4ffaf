//! Per-recipient attachment resolution.
//!
//! Fixed attachments go to everyone. With dynamic attachments enabled, one
//! personalised file is looked up per recipient, first by rendering the
//! file-name pattern (exact, then case-insensitive match in the folder), then
//! through the run's [`AttachmentIndex`] using the recipient's name.

use crate::attachment_index::{AttachmentIndex, name_from_context, tokenize};
use crate::error::Result;
use crate::template;
use crate::transport::message::ORIGINAL_ADDRESS_KEY;
use crate::types::{
    AttachmentDescriptor, CampaignEvent, CampaignSettings, DynamicAttachment, EventLevel,
    Recipient,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use super::{Dispatcher, RunState};

/// Result of a dynamic lookup for one recipient
#[derive(Debug, PartialEq)]
enum Resolution {
    Found { path: PathBuf, how: &'static str },
    NotFound { search_term: String },
}

impl Dispatcher {
    /// Attachments for one recipient: the fixed list plus an optional personalised file
    ///
    /// Never fails: a miss or an I/O error is recorded as a warning event and
    /// the recipient is sent without the personalised file.
    pub(crate) async fn resolve_attachments(
        &self,
        run: &RunState,
        settings: &CampaignSettings,
        index: Option<&AttachmentIndex>,
        recipient: &Recipient,
    ) -> Vec<AttachmentDescriptor> {
        let mut attachments = settings.attachments.clone();
        if !settings.dynamic_attachment.enabled {
            return attachments;
        }

        match resolve_dynamic(&settings.dynamic_attachment, index, recipient).await {
            Ok(Resolution::Found { path, how }) => {
                let descriptor = AttachmentDescriptor::from_path(path);
                tracing::debug!(
                    campaign_id = run.campaign_id.0,
                    recipient = %recipient.email,
                    file = %descriptor.filename,
                    rule = how,
                    "Personalised attachment matched"
                );
                self.emit_event(
                    run,
                    CampaignEvent::new(
                        EventLevel::Debug,
                        format!("Attachment {} matched for {}", descriptor.filename, recipient.email),
                    )
                    .with_detail("email", recipient.email.clone())
                    .with_detail("file", descriptor.filename.clone())
                    .with_detail("rule", how),
                )
                .await;
                attachments.push(descriptor);
            }
            Ok(Resolution::NotFound { search_term }) => {
                tracing::warn!(
                    campaign_id = run.campaign_id.0,
                    recipient = %recipient.email,
                    search_term = %search_term,
                    "No personalised attachment found"
                );
                self.emit_event(
                    run,
                    CampaignEvent::new(
                        EventLevel::Warning,
                        format!(
                            "No attachment found for {} (searched: '{}')",
                            recipient.email, search_term
                        ),
                    )
                    .with_detail("email", recipient.email.clone())
                    .with_detail("search_term", search_term),
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = run.campaign_id.0,
                    recipient = %recipient.email,
                    error = %e,
                    "Attachment lookup failed"
                );
                self.emit_event(
                    run,
                    CampaignEvent::new(
                        EventLevel::Warning,
                        format!("Attachment lookup failed for {}: {}", recipient.email, e),
                    )
                    .with_detail("email", recipient.email.clone()),
                )
                .await;
            }
        }

        attachments
    }
}

async fn resolve_dynamic(
    dynamic: &DynamicAttachment,
    index: Option<&AttachmentIndex>,
    recipient: &Recipient,
) -> Result<Resolution> {
    let mut search_term = None;

    let pattern = dynamic.pattern.as_deref().filter(|p| !p.trim().is_empty());
    if let (Some(pattern), Some(folder)) = (pattern, dynamic.folder.as_deref()) {
        let mut context = recipient.data.clone();
        context.insert(ORIGINAL_ADDRESS_KEY.to_string(), recipient.email.clone());
        let expected = template::render(pattern, &context).trim().to_string();

        if let Some((path, how)) = find_by_name(folder, &expected).await? {
            return Ok(Resolution::Found { path, how });
        }
        search_term = Some(expected);
    }

    if let Some(name) = name_from_context(&recipient.data) {
        if let Some((path, rule)) = index.and_then(|i| i.lookup_with_rule(&tokenize(&name))) {
            return Ok(Resolution::Found {
                path: path.to_path_buf(),
                how: rule.as_str(),
            });
        }
        search_term = Some(name);
    }

    Ok(Resolution::NotFound {
        search_term: search_term.unwrap_or_default(),
    })
}

/// File named `expected` in `folder`, matched exactly, then ignoring case
async fn find_by_name(folder: &Path, expected: &str) -> Result<Option<(PathBuf, &'static str)>> {
    // Only bare file names; a rendered name must not escape the folder
    if expected.is_empty() || Path::new(expected).file_name() != Some(OsStr::new(expected)) {
        return Ok(None);
    }

    let candidate = folder.join(expected);
    match tokio::fs::metadata(&candidate).await {
        Ok(meta) if meta.is_file() => return Ok(Some((candidate, "exact"))),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let wanted = expected.to_lowercase();
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut found: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().to_lowercase() != wanted {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        // read_dir order is unspecified; keep the result stable
        if found.as_ref().is_none_or(|f| path < *f) {
            found = Some(path);
        }
    }

    Ok(found.map(|path| (path, "case-insensitive")))
}
