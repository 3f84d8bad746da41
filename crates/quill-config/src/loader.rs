// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::fields::{self, FieldValue};
use crate::store::SettingsError;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/quill/config.yaml"),
        PathBuf::from("/etc/quill/config.yml"),
        PathBuf::from("quill.yaml"),
        PathBuf::from("quill.yml"),
    ]
}

/// Load the global config value map by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (`--config` CLI flag).
///
/// The file format is a flat mapping of setting name to value:
///
/// ```yaml
/// MESSAGE_GROUP_TIMEOUT: 45
/// KB_TOPICS_ONLY: true
/// ALLOWED_USER_IDS: [1042, 2077]
/// ```
///
/// Unknown keys are warned about and skipped; a value that cannot be read
/// as the declared type is an error.
pub fn load_config_file(extra: Option<&Path>) -> Result<HashMap<String, FieldValue>, SettingsError> {
    let mut merged: HashMap<String, FieldValue> = HashMap::new();

    for path in config_search_paths() {
        if path.is_file() {
            merge_file(&mut merged, &path)?;
        }
    }
    if let Some(p) = extra {
        merge_file(&mut merged, p)?;
    }
    Ok(merged)
}

fn merge_file(dst: &mut HashMap<String, FieldValue>, path: &Path) -> Result<(), SettingsError> {
    debug!(path = %path.display(), "loading config layer");
    let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Store {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| SettingsError::Store {
            path: path.display().to_string(),
            reason: format!("parse: {e}"),
        })?;
    let mapping = match doc {
        serde_yaml::Value::Null => return Ok(()),
        serde_yaml::Value::Mapping(m) => m,
        other => {
            return Err(SettingsError::Store {
                path: path.display().to_string(),
                reason: format!("expected a mapping at top level, found {other:?}"),
            })
        }
    };

    for (key, value) in mapping {
        let name = match key.as_str() {
            Some(s) => s.to_string(),
            None => {
                warn!(path = %path.display(), ?key, "non-string config key skipped");
                continue;
            }
        };
        let spec = match fields::lookup(&name) {
            Some(s) => s,
            None => {
                warn!(path = %path.display(), name, "unknown setting in config file skipped");
                continue;
            }
        };
        let parsed =
            fields::parse_yaml_value(spec.ty, &value).map_err(|reason| SettingsError::Invalid {
                name: name.clone(),
                reason,
            })?;
        spec.constraint
            .check(&parsed)
            .map_err(|reason| SettingsError::Invalid {
                name: name.clone(),
                reason,
            })?;
        dst.insert(name, parsed);
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
