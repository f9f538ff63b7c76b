//! Attachment descriptors stored as a JSON array in
//! `payment_requests.attachment_file_path`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Soft cap on attachments per payment request.
pub const MAX_ATTACHMENT_COUNT: usize = 5;

/// Soft cap on the aggregate attachment size per payment request (5 MB).
pub const MAX_ATTACHMENT_BYTES: i64 = 5 * 1024 * 1024;

/// One uploaded file, as persisted into the attachment JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub name: String,
    pub url: String,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
    pub size: i64,
}

impl AttachmentDescriptor {
    /// Parse the stored JSON column. An absent or unreadable column reads as
    /// an empty list; the store stays authoritative either way.
    pub fn parse_list(raw: Option<&str>) -> Vec<AttachmentDescriptor> {
        match raw {
            None => Vec::new(),
            Some(s) if s.trim().is_empty() => Vec::new(),
            Some(s) => serde_json::from_str(s).unwrap_or_else(|e| {
                tracing::warn!("Unreadable attachment list, treating as empty: {}", e);
                Vec::new()
            }),
        }
    }

    /// Serialize a list back into the column format. Empty lists store as NULL.
    pub fn serialize_list(
        list: &[AttachmentDescriptor],
    ) -> Result<Option<String>, serde_json::Error> {
        if list.is_empty() {
            Ok(None)
        } else {
            serde_json::to_string(list).map(Some)
        }
    }
}

/// A single file that can never fit under the aggregate cap.
#[derive(Debug, Error)]
#[error("attachment {name} ({size} bytes) exceeds the {MAX_ATTACHMENT_BYTES}-byte cap")]
pub struct AttachmentTooLarge {
    pub name: String,
    pub size: i64,
}

/// Append a descriptor under the file-count and aggregate-size caps, evicting
/// the oldest uploads (earliest `uploadedAt`) until the new file fits.
/// Returns the evicted descriptors so callers can clean up object storage.
/// A file too large to ever fit is refused outright, leaving the list as is.
pub fn push_with_eviction(
    list: &mut Vec<AttachmentDescriptor>,
    new: AttachmentDescriptor,
) -> Result<Vec<AttachmentDescriptor>, AttachmentTooLarge> {
    if new.size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentTooLarge {
            name: new.name,
            size: new.size,
        });
    }

    let mut evicted = Vec::new();

    let over_caps = |list: &[AttachmentDescriptor], incoming: i64| {
        list.len() >= MAX_ATTACHMENT_COUNT
            || list.iter().map(|a| a.size).sum::<i64>() + incoming > MAX_ATTACHMENT_BYTES
    };

    while !list.is_empty() && over_caps(list, new.size) {
        let oldest = list
            .iter()
            .enumerate()
            .min_by_key(|(_, a)| a.uploaded_at)
            .map(|(i, _)| i)
            .unwrap_or(0);
        evicted.push(list.remove(oldest));
    }

    list.push(new);
    Ok(evicted)
}
