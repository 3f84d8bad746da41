// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

/// The fixed persisted-state layout, rooted at the data directory.
///
/// These paths are deliberately not user-configurable beyond the roots; the
/// layout is part of the service contract:
///
/// ```text
/// data/
///   processed.json
///   user_settings_overrides.json
///   credentials.json
///   kb_bindings.json
///   user_modes.json
///   memory/user_{id}/
///   mcp_servers/            (+ user_{id}/)
/// knowledge_bases/<kb_name>/
/// logs/bot.log, logs/mcp_hub.log
/// ```
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub kb_root_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl DataPaths {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        kb_root_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            kb_root_dir: kb_root_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    pub fn processed_log(&self) -> PathBuf {
        self.data_dir.join("processed.json")
    }

    pub fn settings_overrides(&self) -> PathBuf {
        self.data_dir.join("user_settings_overrides.json")
    }

    pub fn credentials(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn kb_bindings(&self) -> PathBuf {
        self.data_dir.join("kb_bindings.json")
    }

    pub fn user_modes(&self) -> PathBuf {
        self.data_dir.join("user_modes.json")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir.join("memory")
    }

    pub fn user_memory_dir(&self, user_id: i64) -> PathBuf {
        self.memory_dir().join(format!("user_{user_id}"))
    }

    pub fn mcp_servers_dir(&self) -> PathBuf {
        self.data_dir.join("mcp_servers")
    }

    pub fn user_mcp_servers_dir(&self, user_id: i64) -> PathBuf {
        self.mcp_servers_dir().join(format!("user_{user_id}"))
    }

    pub fn kb_dir(&self, kb_name: &str) -> PathBuf {
        self.kb_root_dir.join(kb_name)
    }

    pub fn bot_log(&self) -> PathBuf {
        self.log_dir.join("bot.log")
    }

    pub fn hub_log(&self) -> PathBuf {
        self.log_dir.join("mcp_hub.log")
    }

    /// Create the directories the service expects to exist at startup.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.as_path(),
            &self.memory_dir(),
            &self.mcp_servers_dir(),
            self.kb_root_dir.as_path(),
            self.log_dir.as_path(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Lexically clean a path: drop `.` components and resolve `..` against
/// preceding components without touching the filesystem.  Used to produce
/// stable lock keys for paths that may not exist yet.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
