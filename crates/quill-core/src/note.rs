// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Knowledge-base note format.
//!
//! Notes are Markdown files with a YAML front-matter block carrying at
//! least `title`, `category`, and `created_at`.  Filenames are
//! `<YYYY-MM-DD>-<slug>.md` under `topics/<category>[/<subcategory>]/`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const SLUG_MAX_CHARS: usize = 50;

/// Front-matter metadata of one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMeta {
    pub title: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Arbitrary scalar extras; preserved verbatim across render/parse.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Render a note: front-matter block, blank line, body.
pub fn render_note(meta: &NoteMeta, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(meta)?;
    Ok(format!("---\n{yaml}---\n\n{body}"))
}

/// Parse a note into its metadata and body.  Returns `None` when there is
/// no well-formed front-matter block.
pub fn parse_note(text: &str) -> Option<(NoteMeta, String)> {
    let rest = text.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    let yaml = &rest[..end];
    let body = rest[end + "\n---\n".len()..]
        .strip_prefix('\n')
        .unwrap_or(&rest[end + "\n---\n".len()..]);
    let meta: NoteMeta = serde_yaml::from_str(yaml).ok()?;
    Some((meta, body.to_string()))
}

/// Lowercase, alphanumerics and hyphens, at most [`SLUG_MAX_CHARS`] chars,
/// `untitled` when nothing survives.  Idempotent.
pub fn slugify(input: &str) -> String {
    let mut slug = String::new();
    let mut last_was_hyphen = true;
    for c in input.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    let slug: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// `<YYYY-MM-DD>-<slug>.md`
pub fn note_filename(date: NaiveDate, title: &str) -> String {
    format!("{}-{}.md", date.format("%Y-%m-%d"), slugify(title))
}

/// Relative path under the working directory for a categorized note.
pub fn note_rel_path(category: &str, subcategory: Option<&str>, filename: &str) -> String {
    match subcategory {
        Some(sub) => format!("{}/{}/{}", slugify(category), slugify(sub), filename),
        None => format!("{}/{}", slugify(category), filename),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
