// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One completed exchange: what the user sent and what the agent answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Bounded per-user conversation history for the ask and task modes.
/// Purely in-memory; restarts begin with a clean slate.
#[derive(Default)]
pub struct ContextStore {
    turns: Mutex<HashMap<i64, VecDeque<Turn>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, evicting the oldest beyond `cap`.
    pub fn push(&self, user_id: i64, turn: Turn, cap: usize) {
        if cap == 0 {
            return;
        }
        let mut map = self.turns.lock().unwrap();
        let ring = map.entry(user_id).or_default();
        ring.push_back(turn);
        while ring.len() > cap {
            ring.pop_front();
        }
    }

    /// Oldest-first history for a user.
    pub fn history(&self, user_id: i64) -> Vec<Turn> {
        self.turns
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, user_id: i64) {
        self.turns.lock().unwrap().remove(&user_id);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
