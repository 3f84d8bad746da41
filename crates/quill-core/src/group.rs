// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use quill_chat::{ForwardOrigin, IncomingEvent, MediaRef};

/// A coalesced batch of chat events from one user, emitted by the
/// aggregator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub user_id: i64,
    pub chat_id: i64,
    pub events: Vec<IncomingEvent>,
    /// Event texts joined with blank lines, in timestamp order.
    pub combined_text: String,
    pub media: Vec<MediaRef>,
    /// Deterministic content hash; the dedup key.
    pub fingerprint: String,
    /// Timestamp of the last event; per-user emission order follows it.
    pub last_event_at: DateTime<Utc>,
}

impl MessageGroup {
    /// Build a group from buffered events.  Returns `None` when nothing in
    /// the buffer carries content.
    pub fn from_events(mut events: Vec<IncomingEvent>) -> Option<MessageGroup> {
        events.retain(|e| !e.is_empty());
        if events.is_empty() {
            return None;
        }
        events.sort_by_key(|e| (e.timestamp, e.event_id));

        let user_id = events[0].user_id;
        let chat_id = events[0].chat_id;
        let last_event_at = events.last().map(|e| e.timestamp)?;

        let combined_text = events
            .iter()
            .map(|e| e.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let media: Vec<MediaRef> = events.iter().flat_map(|e| e.media.clone()).collect();
        let forward = events.iter().find_map(|e| e.forwarded_from.as_ref());

        let fingerprint = fingerprint(&combined_text, &media, forward);

        Some(MessageGroup {
            user_id,
            chat_id,
            events,
            combined_text,
            media,
            fingerprint,
            last_event_at,
        })
    }

    /// First few words of the combined text, for log previews.
    pub fn preview(&self) -> String {
        if self.combined_text.is_empty() {
            return format!("[{} media item(s)]", self.media.len());
        }
        self.combined_text.chars().take(60).collect()
    }
}

/// Deterministic SHA-256 over the canonicalized group content: the
/// combined text, the sorted media digests, and the forward source if
/// any.  Stable under re-parsing the same events.
pub fn fingerprint(
    combined_text: &str,
    media: &[MediaRef],
    forward: Option<&ForwardOrigin>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(combined_text.as_bytes());

    let mut digests: Vec<&str> = media.iter().map(|m| m.file_unique_id.as_str()).collect();
    digests.sort_unstable();
    for digest in digests {
        hasher.update(b"\x00media:");
        hasher.update(digest.as_bytes());
    }
    if let Some(origin) = forward {
        hasher.update(b"\x00forward:");
        hasher.update(origin.source_id.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quill_chat::MediaKind;

    fn media(id: &str) -> MediaRef {
        MediaRef {
            kind: MediaKind::Photo,
            file_unique_id: id.to_string(),
            file_handle: format!("handle-{id}"),
            caption: None,
            filename: None,
        }
    }

    #[test]
    fn empty_buffer_yields_no_group() {
        assert!(MessageGroup::from_events(vec![]).is_none());
        let blank = IncomingEvent::text(1, 1, 1, "   ");
        assert!(MessageGroup::from_events(vec![blank]).is_none());
    }

    #[test]
    fn texts_join_with_blank_lines_in_time_order() {
        let mut a = IncomingEvent::text(1, 1, 1, "first");
        let mut b = IncomingEvent::text(2, 1, 1, "second");
        a.timestamp = Utc::now();
        b.timestamp = a.timestamp + chrono::Duration::seconds(1);
        // Deliver out of order; the group re-sorts.
        let g = MessageGroup::from_events(vec![b, a]).unwrap();
        assert_eq!(g.combined_text, "first\n\nsecond");
        assert_eq!(g.events.len(), 2);
    }

    #[test]
    fn fingerprint_is_stable_under_reparse() {
        let a = IncomingEvent::text(1, 1, 1, "hello");
        let g1 = MessageGroup::from_events(vec![a.clone()]).unwrap();
        let g2 = MessageGroup::from_events(vec![a]).unwrap();
        assert_eq!(g1.fingerprint, g2.fingerprint);
    }

    #[test]
    fn fingerprint_differs_for_different_text() {
        let g1 = MessageGroup::from_events(vec![IncomingEvent::text(1, 1, 1, "a")]).unwrap();
        let g2 = MessageGroup::from_events(vec![IncomingEvent::text(1, 1, 1, "b")]).unwrap();
        assert_ne!(g1.fingerprint, g2.fingerprint);
    }

    #[test]
    fn media_order_does_not_change_fingerprint() {
        let f1 = fingerprint("t", &[media("a"), media("b")], None);
        let f2 = fingerprint("t", &[media("b"), media("a")], None);
        assert_eq!(f1, f2);
    }

    #[test]
    fn media_content_changes_fingerprint() {
        let f1 = fingerprint("t", &[media("a")], None);
        let f2 = fingerprint("t", &[media("c")], None);
        assert_ne!(f1, f2);
    }

    #[test]
    fn forward_origin_changes_fingerprint() {
        let origin = ForwardOrigin {
            source_id: 42,
            title: "Channel".into(),
        };
        let f1 = fingerprint("t", &[], None);
        let f2 = fingerprint("t", &[], Some(&origin));
        assert_ne!(f1, f2);
    }

    #[test]
    fn media_only_event_produces_valid_group() {
        let mut e = IncomingEvent::text(1, 1, 1, "");
        e.media.push(media("m1"));
        let g = MessageGroup::from_events(vec![e]).unwrap();
        assert!(g.combined_text.is_empty());
        assert_eq!(g.media.len(), 1);
        // The fingerprint still covers the media digest.
        assert_ne!(g.fingerprint, fingerprint("", &[], None));
        assert!(g.preview().contains("media"));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let g = MessageGroup::from_events(vec![IncomingEvent::text(1, 1, 1, "x")]).unwrap();
        assert_eq!(g.fingerprint.len(), 64);
        assert!(g.fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
