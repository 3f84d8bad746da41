// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Layered settings access.
//!
//! Effective value resolution, highest priority first:
//!
//! 1. Process environment: `QUILL_<NAME>`
//! 2. Per-user overlay (unless the field is readonly)
//! 3. Main YAML config file
//! 4. Built-in default from the field registry
//!
//! Changes take effect on the next read; nothing is cached across calls.

use std::collections::HashMap;

use tracing::warn;

use crate::fields::{self, FieldType, FieldValue};
use crate::overlay::OverlayStore;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unknown setting: {0}")]
    Unknown(String),
    #[error("setting {0} is read-only and cannot be overridden per user")]
    Readonly(String),
    #[error("setting {0} is secret and cannot be set through this surface")]
    Secret(String),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("settings storage error at {path}: {reason}")]
    Store { path: String, reason: String },
}

/// Introspection record for one setting, safe to render to users.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub category: String,
    pub ty: String,
    pub readonly: bool,
    pub secret: bool,
    pub description: String,
    /// Effective value for the queried user; `"***"` when secret.
    pub value: String,
    /// Whether a per-user override is active for the queried user.
    pub overridden: bool,
}

/// The settings store: global config values plus the per-user overlay.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_values: HashMap<String, FieldValue>,
    overlay: OverlayStore,
}

impl SettingsStore {
    pub fn new(config_values: HashMap<String, FieldValue>, overlay: OverlayStore) -> Self {
        Self {
            config_values,
            overlay,
        }
    }

    /// Effective value of `name` for `user_id` (or the global value when
    /// `None`), following the documented precedence.
    pub fn get(&self, user_id: Option<i64>, name: &str) -> Result<FieldValue, SettingsError> {
        let spec = fields::lookup(name).ok_or_else(|| SettingsError::Unknown(name.to_string()))?;

        if let Some(raw) = env_override(name) {
            let value =
                fields::parse_value(spec.ty, &raw).map_err(|reason| SettingsError::Invalid {
                    name: name.to_string(),
                    reason: format!("environment override: {reason}"),
                })?;
            spec.constraint
                .check(&value)
                .map_err(|reason| SettingsError::Invalid {
                    name: name.to_string(),
                    reason: format!("environment override: {reason}"),
                })?;
            return Ok(value);
        }

        if let Some(uid) = user_id {
            if !spec.readonly {
                if let Some(json) = self.overlay.get(uid, name)? {
                    match FieldValue::from_json(spec.ty, &json) {
                        Some(v) => return Ok(v),
                        None => {
                            // A stale overlay written before a type change is
                            // ignored rather than wedging every read.
                            warn!(name, user_id = uid, "overlay value has wrong type; ignoring");
                        }
                    }
                }
            }
        }

        if let Some(v) = self.config_values.get(name) {
            return Ok(v.clone());
        }

        Ok(spec.default)
    }

    // ── Typed convenience getters ─────────────────────────────────────────────

    pub fn get_i64(&self, user_id: Option<i64>, name: &str) -> Result<i64, SettingsError> {
        self.get(user_id, name)?
            .as_i64()
            .ok_or_else(|| type_mismatch(name, FieldType::Int))
    }

    pub fn get_f64(&self, user_id: Option<i64>, name: &str) -> Result<f64, SettingsError> {
        self.get(user_id, name)?
            .as_f64()
            .ok_or_else(|| type_mismatch(name, FieldType::Float))
    }

    pub fn get_bool(&self, user_id: Option<i64>, name: &str) -> Result<bool, SettingsError> {
        self.get(user_id, name)?
            .as_bool()
            .ok_or_else(|| type_mismatch(name, FieldType::Bool))
    }

    pub fn get_string(&self, user_id: Option<i64>, name: &str) -> Result<String, SettingsError> {
        self.get(user_id, name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_mismatch(name, FieldType::Str))
    }

    pub fn get_path(
        &self,
        user_id: Option<i64>,
        name: &str,
    ) -> Result<std::path::PathBuf, SettingsError> {
        self.get(user_id, name)?
            .as_path()
            .map(std::path::Path::to_path_buf)
            .ok_or_else(|| type_mismatch(name, FieldType::Path))
    }

    pub fn get_int_list(
        &self,
        user_id: Option<i64>,
        name: &str,
    ) -> Result<Vec<i64>, SettingsError> {
        self.get(user_id, name)?
            .as_int_list()
            .map(<[i64]>::to_vec)
            .ok_or_else(|| type_mismatch(name, FieldType::IntList))
    }

    // ── Mutation ──────────────────────────────────────────────────────────────

    /// Set a per-user override from a raw string, with type conversion and
    /// validation.  Readonly and secret fields are rejected before any
    /// storage is touched.
    pub fn set_user_override(
        &self,
        user_id: i64,
        name: &str,
        raw: &str,
    ) -> Result<FieldValue, SettingsError> {
        let spec = fields::lookup(name).ok_or_else(|| SettingsError::Unknown(name.to_string()))?;
        if spec.readonly {
            return Err(SettingsError::Readonly(name.to_string()));
        }
        if spec.secret {
            return Err(SettingsError::Secret(name.to_string()));
        }
        let value = fields::parse_value(spec.ty, raw).map_err(|reason| SettingsError::Invalid {
            name: name.to_string(),
            reason,
        })?;
        spec.constraint
            .check(&value)
            .map_err(|reason| SettingsError::Invalid {
                name: name.to_string(),
                reason,
            })?;
        self.overlay.set(user_id, name, value.to_json())?;
        Ok(value)
    }

    /// Remove a per-user override.  Returns whether one existed.
    pub fn reset_user_override(&self, user_id: i64, name: &str) -> Result<bool, SettingsError> {
        let spec = fields::lookup(name).ok_or_else(|| SettingsError::Unknown(name.to_string()))?;
        if spec.readonly {
            return Err(SettingsError::Readonly(name.to_string()));
        }
        if spec.secret {
            return Err(SettingsError::Secret(name.to_string()));
        }
        Ok(self.overlay.reset(user_id, name)?)
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Describe settings (optionally filtered by category) with effective
    /// values for `user_id`.  Secret values are masked.
    pub fn describe(
        &self,
        user_id: Option<i64>,
        category: Option<&str>,
    ) -> Result<Vec<FieldInfo>, SettingsError> {
        let overrides = match user_id {
            Some(uid) => self.overlay.all_for(uid)?,
            None => HashMap::new(),
        };
        let mut out = Vec::new();
        for spec in fields::field_registry() {
            if let Some(cat) = category {
                if !spec.category().eq_ignore_ascii_case(cat) {
                    continue;
                }
            }
            let value = if spec.secret {
                "***".to_string()
            } else {
                self.get(user_id, spec.name)?.display()
            };
            out.push(FieldInfo {
                name: spec.name.to_string(),
                category: spec.category().to_string(),
                ty: spec.ty.to_string(),
                readonly: spec.readonly,
                secret: spec.secret,
                description: spec.description.to_string(),
                value,
                overridden: overrides.contains_key(spec.name),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Distinct categories in the registry, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = fields::field_registry()
            .iter()
            .map(|s| s.category().to_string())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    /// Whether a user id passes the allow-list gate.
    pub fn user_allowed(&self, user_id: i64) -> Result<bool, SettingsError> {
        let allowed = self.get_int_list(None, "ALLOWED_USER_IDS")?;
        Ok(allowed.is_empty() || allowed.contains(&user_id))
    }
}

fn type_mismatch(name: &str, expected: FieldType) -> SettingsError {
    SettingsError::Invalid {
        name: name.to_string(),
        reason: format!("value is not of type {expected}"),
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(format!("QUILL_{name}")).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
