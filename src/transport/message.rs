//! Message assembly: rendering, plain-text fallback, attachments, hygiene headers

use crate::config::DeliveryConfig;
use crate::template::render;
use crate::transport::SendRequest;
use crate::types::AttachmentDescriptor;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;

/// Render-context key that always carries the recipient's real address
pub const ORIGINAL_ADDRESS_KEY: &str = "email";

/// One body part of a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BodyPart {
    /// MIME type ("text/plain" or "text/html")
    pub content_type: &'static str,
    /// Rendered content
    pub value: String,
}

/// Attachment ready for the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedAttachment {
    /// Name shown to the recipient
    pub filename: String,
    /// MIME type guessed from the file name
    pub content_type: &'static str,
    /// Base64 file content
    pub content: String,
}

/// Fully rendered message for one destination
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    /// Address the message is actually delivered to
    pub to: String,
    /// Sender address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
    /// Rendered subject
    pub subject: String,
    /// Body parts, plain text first
    pub parts: Vec<BodyPart>,
    /// Attachments that could be read
    pub attachments: Vec<EncodedAttachment>,
    /// Generated delivery-hygiene headers
    pub headers: BTreeMap<String, String>,
}

impl OutgoingMessage {
    /// Render `request` and load its attachments
    ///
    /// The original address is injected into the render context under
    /// [`ORIGINAL_ADDRESS_KEY`], so demo-mode sends still personalise with the
    /// real recipient. Without a plain-text template the text part is derived
    /// from the rendered HTML.
    pub async fn compose(request: &SendRequest, config: &DeliveryConfig) -> Self {
        let mut context = request.context.clone();
        context.insert(
            ORIGINAL_ADDRESS_KEY.to_string(),
            request.original_address.clone(),
        );

        let subject = render(&request.subject, &context);
        let html = render(&request.html, &context);
        let text = request
            .text
            .as_deref()
            .map(|t| render(t, &context))
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| html_to_text(&html));

        let mut attachments = Vec::with_capacity(request.attachments.len());
        for descriptor in &request.attachments {
            if let Some(encoded) = load_attachment(descriptor).await {
                attachments.push(encoded);
            }
        }

        Self {
            to: request.destination.clone(),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            subject,
            parts: vec![
                BodyPart {
                    content_type: "text/plain",
                    value: text,
                },
                BodyPart {
                    content_type: "text/html",
                    value: html,
                },
            ],
            attachments,
            headers: hygiene_headers(&config.from_email, &config.mailer_name),
        }
    }
}

/// Read and encode one attachment
///
/// Missing files, directories and empty files are skipped with a warning.
pub async fn load_attachment(descriptor: &AttachmentDescriptor) -> Option<EncodedAttachment> {
    let path = descriptor.path.as_path();
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "attachment not found, skipping");
            return None;
        }
    };
    if metadata.is_dir() {
        tracing::warn!(path = %path.display(), "attachment is a directory, skipping");
        return None;
    }
    if metadata.len() == 0 {
        tracing::warn!(path = %path.display(), "attachment is empty, skipping");
        return None;
    }

    let data = match tokio::fs::read(path).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read attachment, skipping");
            return None;
        }
    };

    let filename = if descriptor.filename.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        descriptor.filename.clone()
    };

    Some(EncodedAttachment {
        content_type: guess_mime_type(&filename),
        content: STANDARD.encode(data),
        filename,
    })
}

/// MIME type for a file name, by extension
pub fn guess_mime_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Headers added to every message
///
/// `Message-ID` is `<unix-millis.random@sender-domain>`; the unsubscribe
/// directive mails the sender.
pub fn hygiene_headers(from_email: &str, mailer_name: &str) -> BTreeMap<String, String> {
    let domain = from_email
        .rsplit_once('@')
        .map(|(_, d)| d)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    let nonce: u64 = rand::thread_rng().r#gen();

    BTreeMap::from([
        (
            "Message-ID".to_string(),
            format!(
                "<{}.{:016x}@{}>",
                chrono::Utc::now().timestamp_millis(),
                nonce,
                domain
            ),
        ),
        (
            "List-Unsubscribe".to_string(),
            format!("<mailto:{from_email}?subject=unsubscribe>"),
        ),
        (
            "List-Unsubscribe-Post".to_string(),
            "List-Unsubscribe=One-Click".to_string(),
        ),
        ("X-Mailer".to_string(), mailer_name.to_string()),
    ])
}

const PARAGRAPH_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6"];

const BLOCK_TAGS: &[&str] = &[
    "div", "li", "tr", "table", "ul", "ol", "hr", "blockquote", "section", "article", "header",
    "footer",
];

const SKIPPED_TAGS: &[&str] = &["style", "script", "head", "title"];

/// Plain-text rendition of an HTML body
///
/// Tags are dropped, block and line-break elements become newlines, entities
/// are decoded and whitespace is collapsed (at most one blank line in a row).
///
/// ```
/// use campaign_dispatch::transport::message::html_to_text;
///
/// let text = html_to_text("<p>Hello&nbsp;<b>Ana</b></p><p>See   you</p>");
/// assert_eq!(text, "Hello Ana\n\nSee you");
/// ```
pub fn html_to_text(html: &str) -> String {
    let mut raw = String::with_capacity(html.len());
    let mut rest = html;
    let mut skipping: Option<&str> = None;

    while let Some(open) = rest.find('<') {
        if skipping.is_none() {
            raw.push_str(&rest[..open]);
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            if skipping.is_none() {
                raw.push_str(&rest[open..]);
            }
            rest = "";
            break;
        };

        let tag = &after[..close];
        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        match skipping {
            Some(skipped) => {
                if closing && name == skipped {
                    skipping = None;
                }
            }
            None => {
                if let Some(skipped) = SKIPPED_TAGS.iter().find(|t| **t == name) {
                    if !closing && !tag.ends_with('/') {
                        skipping = Some(*skipped);
                    }
                } else if name == "br" {
                    raw.push('\n');
                } else if PARAGRAPH_TAGS.contains(&name.as_str()) {
                    end_with_newlines(&mut raw, 2);
                } else if BLOCK_TAGS.contains(&name.as_str()) {
                    end_with_newlines(&mut raw, 1);
                }
            }
        }

        rest = &after[close + 1..];
    }
    if skipping.is_none() {
        raw.push_str(rest);
    }

    collapse_whitespace(&decode_entities(&raw))
}

fn end_with_newlines(raw: &mut String, count: usize) {
    let trailing = raw.chars().rev().take_while(|c| *c == '\n').count();
    for _ in trailing..count {
        raw.push('\n');
    }
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&after[..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || lines.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
