// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad shape of a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Photo,
    Document,
    Forwarded,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
    Audio,
    Video,
}

/// A media attachment.  The handle is opaque and only the chat transport
/// can resolve it to bytes; the stable unique id doubles as the digest
/// input for group fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Transport-stable identifier for this exact content.
    pub file_unique_id: String,
    /// Transport handle used for downloads; opaque to everything else.
    pub file_handle: String,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

/// Where a forwarded message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOrigin {
    pub source_id: i64,
    pub title: String,
}

/// Platform-neutral DTO produced at the chat boundary.  Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    /// May be empty for media-only events.
    pub text: String,
    pub content_type: ContentType,
    pub timestamp: DateTime<Utc>,
    pub forwarded_from: Option<ForwardOrigin>,
    pub media: Vec<MediaRef>,
    /// Platform "album" identifier: events sharing it belong together and
    /// bypass the idle wait.
    pub media_group_id: Option<String>,
}

impl IncomingEvent {
    /// Minimal constructor for a plain text event.
    pub fn text(event_id: i64, chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        Self {
            event_id,
            chat_id,
            user_id,
            text: text.into(),
            content_type: ContentType::Text,
            timestamp: Utc::now(),
            forwarded_from: None,
            media: Vec::new(),
            media_group_id: None,
        }
    }

    /// Whether this event contributes any content at all.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.media.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
