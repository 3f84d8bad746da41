// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-user message aggregation.
//!
//! Events append to the sender's buffer and (re)arm an idle timer; when
//! the timer fires with no newer event, the buffer flushes as one
//! [`MessageGroup`] into a single-consumer channel.  Platform media
//! groups (albums) bypass the idle wait: they flush after a short tail
//! window following the last event of the album.
//!
//! Timers are best-effort: on restart, in-flight buffers are lost and
//! users simply resend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use quill_chat::IncomingEvent;

use crate::group::MessageGroup;

/// Tail window after the last event of a media group.
const MEDIA_GROUP_TAIL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct UserBuffer {
    events: Vec<IncomingEvent>,
    /// Bumped on every append; a timer only flushes if its generation is
    /// still current, which is what "re-arm" means here.
    generation: u64,
    /// The album id currently collecting, if the newest event carried one.
    media_group: Option<String>,
}

/// Coalesces events per user and emits groups.
pub struct Aggregator {
    buffers: Arc<Mutex<HashMap<i64, UserBuffer>>>,
    tx: mpsc::Sender<MessageGroup>,
}

impl Aggregator {
    /// `tx` is the single-consumer channel the router reads from.
    pub fn new(tx: mpsc::Sender<MessageGroup>) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            tx,
        }
    }

    /// Append an event to the user's buffer and (re)arm its idle timer.
    /// No I/O happens here.
    pub async fn add(&self, event: IncomingEvent, idle_timeout: Duration) {
        let user_id = event.user_id;
        let (wait, generation) = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(user_id).or_default();
            buffer.media_group = event.media_group_id.clone();
            buffer.events.push(event);
            buffer.generation += 1;
            // Album parts arrive in a burst; the tail window flushes the
            // album shortly after its last part instead of waiting out the
            // full idle window.
            let wait = if buffer.media_group.is_some() {
                MEDIA_GROUP_TAIL
            } else {
                idle_timeout
            };
            (wait, buffer.generation)
        };

        let buffers = self.buffers.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let group = {
                let mut map = buffers.lock().await;
                // A newer event re-armed the timer; a stale one must not fire.
                if map.get(&user_id).map(|b| b.generation) == Some(generation) {
                    map.remove(&user_id)
                        .and_then(|b| MessageGroup::from_events(b.events))
                } else {
                    None
                }
            };
            if let Some(group) = group {
                debug!(user_id, fingerprint = %group.fingerprint, events = group.events.len(), "group emitted");
                let _ = tx.send(group).await;
            }
        });
    }

    /// Emit the user's buffer immediately if non-empty.
    pub async fn flush(&self, user_id: i64) {
        let group = {
            let mut buffers = self.buffers.lock().await;
            buffers
                .remove(&user_id)
                .and_then(|b| MessageGroup::from_events(b.events))
        };
        if let Some(group) = group {
            debug!(user_id, fingerprint = %group.fingerprint, "group flushed explicitly");
            let _ = self.tx.send(group).await;
        }
    }

    /// Number of users with buffered events (diagnostics).
    pub async fn pending_users(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    fn agg() -> (Aggregator, mpsc::Receiver<MessageGroup>) {
        let (tx, rx) = mpsc::channel(16);
        (Aggregator::new(tx), rx)
    }

    #[tokio::test]
    async fn single_event_flushes_after_idle_window() {
        let (agg, mut rx) = agg();
        agg.add(IncomingEvent::text(1, 10, 100, "hello"), SHORT).await;
        let group = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.combined_text, "hello");
        assert_eq!(group.user_id, 100);
        assert_eq!(agg.pending_users().await, 0);
    }

    #[tokio::test]
    async fn rapid_events_coalesce_into_one_group() {
        let (agg, mut rx) = agg();
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let mut e = IncomingEvent::text(i as i64 + 1, 10, 100, *text);
            e.timestamp = chrono::Utc::now() + chrono::Duration::milliseconds(i as i64);
            agg.add(e, Duration::from_millis(150)).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let group = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.events.len(), 3);
        assert_eq!(group.combined_text, "one\n\ntwo\n\nthree");
        // No second group arrives.
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn users_are_buffered_independently() {
        let (agg, mut rx) = agg();
        agg.add(IncomingEvent::text(1, 10, 100, "from A"), SHORT).await;
        agg.add(IncomingEvent::text(2, 20, 200, "from B"), SHORT).await;
        let mut users = Vec::new();
        for _ in 0..2 {
            let g = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            users.push(g.user_id);
        }
        users.sort_unstable();
        assert_eq!(users, vec![100, 200]);
    }

    #[tokio::test]
    async fn explicit_flush_bypasses_timer() {
        let (agg, mut rx) = agg();
        agg.add(
            IncomingEvent::text(1, 10, 100, "waiting"),
            Duration::from_secs(600),
        )
        .await;
        agg.flush(100).await;
        let group = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.combined_text, "waiting");
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_a_noop() {
        let (agg, mut rx) = agg();
        agg.flush(55).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn media_group_flushes_on_tail_window_not_idle_timeout() {
        let (agg, mut rx) = agg();
        let mut e1 = IncomingEvent::text(1, 10, 100, "");
        e1.media_group_id = Some("album1".into());
        e1.media.push(quill_chat::MediaRef {
            kind: quill_chat::MediaKind::Photo,
            file_unique_id: "p1".into(),
            file_handle: "h1".into(),
            caption: Some("caption".into()),
            filename: None,
        });
        let mut e2 = e1.clone();
        e2.event_id = 2;
        e2.media[0].file_unique_id = "p2".into();

        // Idle timeout is huge; only the album tail window can flush.
        agg.add(e1, Duration::from_secs(600)).await;
        agg.add(e2, Duration::from_secs(600)).await;

        let group = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("album must flush on the tail window")
            .unwrap();
        assert_eq!(group.media.len(), 2);
    }

    #[tokio::test]
    async fn groups_from_one_user_are_ordered_by_last_event_time() {
        let (agg, mut rx) = agg();
        agg.add(IncomingEvent::text(1, 10, 100, "first batch"), SHORT).await;
        let g1 = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        agg.add(IncomingEvent::text(2, 10, 100, "second batch"), SHORT).await;
        let g2 = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(g2.last_event_at >= g1.last_event_at);
    }
}
