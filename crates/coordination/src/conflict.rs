/// Conflict detection between a local cached rundown and a remote snapshot
/// Pure comparison; conflicts are surfaced, never auto-resolved
use serde::{Deserialize, Serialize};

use rundown::{Item, Rundown};

/// Why two snapshots were classified as conflicting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    /// Item content differs (field values on corresponding rows)
    ItemContent,

    /// Document title differs
    Title,

    /// Scheduling metadata differs, both sides populated
    Timing,

    /// Document notes differ, both sides populated
    Notes,
}

/// A detected divergence between local and remote state
///
/// Ephemeral: produced by the detector, consumed by the UI layer, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub reasons: Vec<ConflictReason>,
    pub local_signature: String,
    pub remote_signature: String,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Order-stable content signature for a single item
///
/// Covers identity-relevant content fields only; layout state (floated) is
/// excluded so hiding a row is never reported as a content conflict.
pub fn item_signature(item: &Item) -> String {
    let mut fields: Vec<(&String, &String)> = item.fields.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let mut signature = format!("{}|{:?}", item.id, item.kind);
    for (key, value) in fields {
        signature.push('|');
        signature.push_str(key);
        signature.push('=');
        signature.push_str(value);
    }
    signature
}

fn document_signature(rundown: &Rundown) -> String {
    rundown
        .items
        .iter()
        .map(item_signature)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A value present on only one side is legitimate progress, not a conflict.
/// Only a populated-vs-populated difference counts.
fn both_present_and_differ(local: Option<&str>, remote: Option<&str>) -> bool {
    match (non_empty(local), non_empty(remote)) {
        (Some(local), Some(remote)) => local != remote,
        _ => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Compare two rundown snapshots and classify any divergence
///
/// Multiple simultaneous classifications combine into one record listing
/// all reasons.
pub fn detect_conflict(local: &Rundown, remote: &Rundown) -> Option<ConflictRecord> {
    let mut reasons = Vec::new();

    let local_signature = document_signature(local);
    let remote_signature = document_signature(remote);
    if local_signature != remote_signature {
        reasons.push(ConflictReason::ItemContent);
    }

    if local.title != remote.title {
        reasons.push(ConflictReason::Title);
    }

    if both_present_and_differ(local.start_time.as_deref(), remote.start_time.as_deref())
        || both_present_and_differ(local.timezone.as_deref(), remote.timezone.as_deref())
    {
        reasons.push(ConflictReason::Timing);
    }

    if both_present_and_differ(local.notes.as_deref(), remote.notes.as_deref()) {
        reasons.push(ConflictReason::Notes);
    }

    if reasons.is_empty() {
        return None;
    }

    Some(ConflictRecord {
        reasons,
        local_signature,
        remote_signature,
        detected_at: chrono::Utc::now(),
    })
}
