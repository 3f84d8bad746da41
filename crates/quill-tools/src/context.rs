// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use quill_hub::HubClient;

/// Everything a tool needs about the invocation it runs inside.
///
/// Built once per service invocation and shared by every tool in the
/// registry.  The working directory is the KB root, or its `topics/`
/// subtree when `KB_TOPICS_ONLY` is in effect.
pub struct ToolContext {
    pub user_id: i64,
    pub kb_name: String,
    /// The KB root (Git working tree).  Paths reported in tool outputs are
    /// relative to this.
    pub kb_root: PathBuf,
    /// Sandbox root for all file/folder tools.
    pub working_dir: PathBuf,
    /// Hub connection; `None` degrades hub-backed tools to errors without
    /// taking the service down.
    pub hub: Option<Arc<HubClient>>,
    pub github_token: Option<String>,
    pub web_search_key: Option<String>,
    pub vector_top_k: usize,
    pub http_timeout: std::time::Duration,
}

impl ToolContext {
    /// Render a resolved path relative to the KB root for tool output.
    pub fn rel_to_kb(&self, path: &std::path::Path) -> String {
        path.strip_prefix(&self.kb_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens stay out of debug output.
        f.debug_struct("ToolContext")
            .field("user_id", &self.user_id)
            .field("kb_name", &self.kb_name)
            .field("working_dir", &self.working_dir)
            .field("hub", &self.hub.is_some())
            .finish_non_exhaustive()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kb_root: PathBuf) -> ToolContext {
        ToolContext {
            user_id: 1,
            kb_name: "kb1".into(),
            working_dir: kb_root.join("topics"),
            kb_root,
            hub: None,
            github_token: Some("ghp_secret".into()),
            web_search_key: None,
            vector_top_k: 5,
            http_timeout: std::time::Duration::from_secs(30),
        }
    }

    #[test]
    fn rel_to_kb_strips_root() {
        let c = ctx(PathBuf::from("/kb"));
        assert_eq!(
            c.rel_to_kb(std::path::Path::new("/kb/topics/tech/a.md")),
            "topics/tech/a.md"
        );
    }

    #[test]
    fn rel_to_kb_passes_foreign_paths_through() {
        let c = ctx(PathBuf::from("/kb"));
        assert_eq!(c.rel_to_kb(std::path::Path::new("other/x")), "other/x");
    }

    #[test]
    fn debug_omits_tokens() {
        let c = ctx(PathBuf::from("/kb"));
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("ghp_secret"));
    }
}
