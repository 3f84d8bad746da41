// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Declarative registry of every setting the service understands.
//!
//! Settings are flat, SCREAMING_SNAKE names.  The category of a setting is
//! derived from its name prefix (`KB_LOCK_TIMEOUT_SECS` → `KB`), which is
//! what `/viewsettings <category>` filters on.  Metadata (type, constraints,
//! readonly/secret flags) lives here in code; only the *values* are
//! persisted.

use std::path::PathBuf;

/// Declared type of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    Path,
    /// String restricted to a fixed choice set (see [`Constraint::OneOf`]).
    Enum,
    IntList,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "string",
            FieldType::Path => "path",
            FieldType::Enum => "enum",
            FieldType::IntList => "list<int>",
        };
        write!(f, "{s}")
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    Enum(String),
    IntList(Vec<i64>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Str(_) => FieldType::Str,
            FieldValue::Path(_) => FieldType::Path,
            FieldValue::Enum(_) => FieldType::Enum,
            FieldValue::IntList(_) => FieldType::IntList,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) | FieldValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            FieldValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            FieldValue::IntList(v) => Some(v),
            _ => None,
        }
    }

    /// Render for user-visible surfaces.  Secrets are masked by the caller
    /// before this is ever reached.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Str(s) | FieldValue::Enum(s) => s.clone(),
            FieldValue::Path(p) => p.display().to_string(),
            FieldValue::IntList(v) => v
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Convert into the JSON representation used by the overlay file.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Str(s) | FieldValue::Enum(s) => serde_json::Value::String(s.clone()),
            FieldValue::Path(p) => serde_json::Value::String(p.display().to_string()),
            FieldValue::IntList(v) => {
                serde_json::Value::Array(v.iter().map(|i| serde_json::Value::from(*i)).collect())
            }
        }
    }

    /// Reconstruct a value of the declared type from its JSON representation.
    pub fn from_json(ty: FieldType, v: &serde_json::Value) -> Option<FieldValue> {
        match (ty, v) {
            (FieldType::Bool, serde_json::Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            (FieldType::Int, serde_json::Value::Number(n)) => n.as_i64().map(FieldValue::Int),
            (FieldType::Float, serde_json::Value::Number(n)) => n.as_f64().map(FieldValue::Float),
            (FieldType::Str, serde_json::Value::String(s)) => Some(FieldValue::Str(s.clone())),
            (FieldType::Enum, serde_json::Value::String(s)) => Some(FieldValue::Enum(s.clone())),
            (FieldType::Path, serde_json::Value::String(s)) => {
                Some(FieldValue::Path(PathBuf::from(s)))
            }
            (FieldType::IntList, serde_json::Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.as_i64()?);
                }
                Some(FieldValue::IntList(out))
            }
            _ => None,
        }
    }
}

/// Validation constraint attached to a [`FieldSpec`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    None,
    IntRange { min: i64, max: i64 },
    FloatRange { min: f64, max: f64 },
    OneOf(&'static [&'static str]),
}

impl Constraint {
    /// Check a parsed value against this constraint.
    pub fn check(&self, value: &FieldValue) -> Result<(), String> {
        match (self, value) {
            (Constraint::None, _) => Ok(()),
            (Constraint::IntRange { min, max }, FieldValue::Int(i)) => {
                if i < min || i > max {
                    Err(format!("must be in [{min}, {max}], got {i}"))
                } else {
                    Ok(())
                }
            }
            (Constraint::FloatRange { min, max }, FieldValue::Float(f)) => {
                if f < min || f > max {
                    Err(format!("must be in [{min}, {max}], got {f}"))
                } else {
                    Ok(())
                }
            }
            (Constraint::OneOf(choices), FieldValue::Enum(s)) => {
                if choices.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!("must be one of {choices:?}, got {s:?}"))
                }
            }
            _ => Ok(()),
        }
    }
}

/// Static description of one setting.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub default: FieldValue,
    /// Cannot be overridden per user (global/topology concerns).
    pub readonly: bool,
    /// Never rendered on user-visible surfaces or logs.
    pub secret: bool,
    pub constraint: Constraint,
    pub description: &'static str,
}

impl FieldSpec {
    /// Category derived from the name prefix: everything before the first `_`.
    pub fn category(&self) -> &'static str {
        category_of(self.name)
    }
}

/// Category of a setting name: the prefix before the first underscore.
pub fn category_of(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}

/// Parse a raw user-supplied string into a value of the declared type.
///
/// Booleans accept `true/1/yes/on` and `false/0/no/off` (case-insensitive).
/// Int lists accept comma-separated integers; the empty string is the empty
/// list.
pub fn parse_value(ty: FieldType, raw: &str) -> Result<FieldValue, String> {
    let raw = raw.trim();
    match ty {
        FieldType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FieldValue::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(FieldValue::Bool(false)),
            other => Err(format!("not a boolean: {other:?}")),
        },
        FieldType::Int => raw
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|e| format!("not an integer: {e}")),
        FieldType::Float => raw
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|e| format!("not a number: {e}")),
        FieldType::Str => Ok(FieldValue::Str(raw.to_string())),
        FieldType::Enum => Ok(FieldValue::Enum(raw.to_string())),
        FieldType::Path => {
            if raw.is_empty() {
                Err("path must not be empty".to_string())
            } else {
                Ok(FieldValue::Path(PathBuf::from(raw)))
            }
        }
        FieldType::IntList => {
            if raw.is_empty() {
                return Ok(FieldValue::IntList(Vec::new()));
            }
            let mut out = Vec::new();
            for part in raw.split(',') {
                let part = part.trim();
                out.push(
                    part.parse::<i64>()
                        .map_err(|e| format!("bad list element {part:?}: {e}"))?,
                );
            }
            Ok(FieldValue::IntList(out))
        }
    }
}

/// Coerce a YAML config value into the declared type.
pub fn parse_yaml_value(ty: FieldType, v: &serde_yaml::Value) -> Result<FieldValue, String> {
    match (ty, v) {
        (FieldType::Bool, serde_yaml::Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
        (FieldType::Int, serde_yaml::Value::Number(n)) => n
            .as_i64()
            .map(FieldValue::Int)
            .ok_or_else(|| "not an integer".to_string()),
        (FieldType::Float, serde_yaml::Value::Number(n)) => n
            .as_f64()
            .map(FieldValue::Float)
            .ok_or_else(|| "not a number".to_string()),
        (FieldType::IntList, serde_yaml::Value::Sequence(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(
                    item.as_i64()
                        .ok_or_else(|| format!("bad list element: {item:?}"))?,
                );
            }
            Ok(FieldValue::IntList(out))
        }
        // Strings (and anything scalar rendered as a string) go through the
        // same parser the user-facing surfaces use.
        (ty, serde_yaml::Value::String(s)) => parse_value(ty, s),
        (ty, other) => Err(format!("cannot read {other:?} as {ty}")),
    }
}

/// The full registry of settings.
///
/// Rebuilt on each call; cheap enough, and keeps the registry a plain
/// function like the model catalog.
pub fn field_registry() -> Vec<FieldSpec> {
    fn spec(
        name: &'static str,
        ty: FieldType,
        default: FieldValue,
        constraint: Constraint,
        description: &'static str,
    ) -> FieldSpec {
        FieldSpec {
            name,
            ty,
            default,
            readonly: false,
            secret: false,
            constraint,
            description,
        }
    }
    fn readonly(mut s: FieldSpec) -> FieldSpec {
        s.readonly = true;
        s
    }
    fn secret(mut s: FieldSpec) -> FieldSpec {
        s.secret = true;
        s
    }

    vec![
        // ── Message aggregation ──────────────────────────────────────────────
        spec(
            "MESSAGE_GROUP_TIMEOUT",
            FieldType::Int,
            FieldValue::Int(30),
            Constraint::IntRange { min: 1, max: 3600 },
            "Idle seconds before a user's buffered messages flush as one group",
        ),
        // ── Knowledge base ───────────────────────────────────────────────────
        spec(
            "KB_TOPICS_ONLY",
            FieldType::Bool,
            FieldValue::Bool(true),
            Constraint::None,
            "Restrict the agent's working directory to the topics/ subtree",
        ),
        spec(
            "KB_LOCK_TIMEOUT_SECS",
            FieldType::Int,
            FieldValue::Int(300),
            Constraint::IntRange { min: 1, max: 3600 },
            "Maximum seconds to wait for the per-KB lock",
        ),
        spec(
            "KB_GIT_REMOTE",
            FieldType::Str,
            FieldValue::Str("origin".into()),
            Constraint::None,
            "Git remote name used for pull/push",
        ),
        spec(
            "KB_GIT_BRANCH",
            FieldType::Str,
            FieldValue::Str("main".into()),
            Constraint::None,
            "Git branch used for pull/push",
        ),
        readonly(spec(
            "KB_ROOT_DIR",
            FieldType::Path,
            FieldValue::Path(PathBuf::from("knowledge_bases")),
            Constraint::None,
            "Directory holding all KB working trees",
        )),
        spec(
            "KB_COMMIT_AUTHOR",
            FieldType::Str,
            FieldValue::Str("quill".into()),
            Constraint::None,
            "Author name on commits produced by the service",
        ),
        spec(
            "KB_COMMIT_EMAIL",
            FieldType::Str,
            FieldValue::Str("quill@localhost".into()),
            Constraint::None,
            "Author email on commits produced by the service",
        ),
        // ── Agent driver ─────────────────────────────────────────────────────
        spec(
            "AGENT_KIND",
            FieldType::Enum,
            FieldValue::Enum("openai".into()),
            Constraint::OneOf(&["openai", "subprocess", "mock"]),
            "Agent driver backend: in-process API loop, external CLI, or mock",
        ),
        spec(
            "AGENT_MODEL",
            FieldType::Str,
            FieldValue::Str("gpt-4o".into()),
            Constraint::None,
            "Model identifier forwarded to the provider API",
        ),
        spec(
            "AGENT_BASE_URL",
            FieldType::Str,
            FieldValue::Str("https://api.openai.com/v1".into()),
            Constraint::None,
            "OpenAI-compatible API base URL",
        ),
        secret(spec(
            "AGENT_API_KEY",
            FieldType::Str,
            FieldValue::Str(String::new()),
            Constraint::None,
            "API key for the in-process agent driver",
        )),
        spec(
            "AGENT_TIMEOUT_SECS",
            FieldType::Int,
            FieldValue::Int(300),
            Constraint::IntRange { min: 10, max: 3600 },
            "Wall-clock deadline for one agent invocation",
        ),
        spec(
            "AGENT_MAX_ITERATIONS",
            FieldType::Int,
            FieldValue::Int(10),
            Constraint::IntRange { min: 1, max: 100 },
            "Maximum model/tool rounds per invocation",
        ),
        spec(
            "AGENT_CLI_COMMAND",
            FieldType::Str,
            FieldValue::Str("claude".into()),
            Constraint::None,
            "Command for the subprocess agent driver",
        ),
        spec(
            "AGENT_CONTEXT_TURNS",
            FieldType::Int,
            FieldValue::Int(10),
            Constraint::IntRange { min: 0, max: 100 },
            "Conversation turns kept per user for ask/task context",
        ),
        // ── Outbound HTTP ────────────────────────────────────────────────────
        spec(
            "HTTP_TIMEOUT_SECS",
            FieldType::Int,
            FieldValue::Int(30),
            Constraint::IntRange { min: 1, max: 300 },
            "Timeout for outbound HTTP calls",
        ),
        // ── Rate limiting ────────────────────────────────────────────────────
        spec(
            "RATE_BUCKET_CAPACITY",
            FieldType::Int,
            FieldValue::Int(5),
            Constraint::IntRange { min: 1, max: 100 },
            "Token-bucket capacity per user",
        ),
        spec(
            "RATE_REFILL_PER_MINUTE",
            FieldType::Float,
            FieldValue::Float(2.0),
            Constraint::FloatRange {
                min: 0.01,
                max: 1000.0,
            },
            "Token-bucket refill rate per user",
        ),
        // ── MCP hub ──────────────────────────────────────────────────────────
        spec(
            "MCP_HUB_URL",
            FieldType::Str,
            FieldValue::Str(String::new()),
            Constraint::None,
            "External hub SSE URL; empty means launch the bundled hub",
        ),
        spec(
            "MCP_HUB_PORT",
            FieldType::Int,
            FieldValue::Int(8765),
            Constraint::IntRange { min: 1, max: 65535 },
            "Port for the bundled hub",
        ),
        spec(
            "MCP_SSE_TIMEOUT_SECS",
            FieldType::Int,
            FieldValue::Int(10),
            Constraint::IntRange { min: 1, max: 120 },
            "Timeout for SSE session establishment",
        ),
        // ── Access control ───────────────────────────────────────────────────
        spec(
            "ALLOWED_USER_IDS",
            FieldType::IntList,
            FieldValue::IntList(Vec::new()),
            Constraint::None,
            "User ids permitted to use the service; empty list admits everyone",
        ),
        // ── Fixed layout ─────────────────────────────────────────────────────
        readonly(spec(
            "DATA_DIR",
            FieldType::Path,
            FieldValue::Path(PathBuf::from("data")),
            Constraint::None,
            "Root of the persisted state layout",
        )),
        readonly(spec(
            "LOG_DIR",
            FieldType::Path,
            FieldValue::Path(PathBuf::from("logs")),
            Constraint::None,
            "Directory for service log files",
        )),
        // ── Git behaviour ────────────────────────────────────────────────────
        spec(
            "GIT_PUSH_RETRIES",
            FieldType::Int,
            FieldValue::Int(3),
            Constraint::IntRange { min: 0, max: 10 },
            "Retry budget for transient push failures",
        ),
        // ── External tool keys ───────────────────────────────────────────────
        secret(spec(
            "WEB_SEARCH_API_KEY",
            FieldType::Str,
            FieldValue::Str(String::new()),
            Constraint::None,
            "API key for the web_search tool",
        )),
        secret(spec(
            "GITHUB_API_TOKEN",
            FieldType::Str,
            FieldValue::Str(String::new()),
            Constraint::None,
            "Token for the github_api tool",
        )),
        // ── Vector search ────────────────────────────────────────────────────
        spec(
            "VECTOR_TOP_K",
            FieldType::Int,
            FieldValue::Int(5),
            Constraint::IntRange { min: 1, max: 50 },
            "Default result count for kb_vector_search",
        ),
    ]
}

/// Look up a single field spec by name.
pub fn lookup(name: &str) -> Option<FieldSpec> {
    field_registry().into_iter().find(|s| s.name == name)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Registry shape ────────────────────────────────────────────────────────

    #[test]
    fn registry_names_are_unique() {
        let regs = field_registry();
        let mut names: Vec<&str> = regs.iter().map(|s| s.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len(), "duplicate setting name in registry");
    }

    #[test]
    fn defaults_match_declared_types() {
        for spec in field_registry() {
            assert_eq!(
                spec.default.field_type(),
                spec.ty,
                "{} default has wrong type",
                spec.name
            );
        }
    }

    #[test]
    fn defaults_satisfy_their_own_constraints() {
        for spec in field_registry() {
            assert!(
                spec.constraint.check(&spec.default).is_ok(),
                "{} default violates constraint",
                spec.name
            );
        }
    }

    #[test]
    fn secrets_are_never_readonly() {
        // Readonly rejects overrides with a dedicated error; a field that is
        // both would make the error surface ambiguous.
        for spec in field_registry() {
            assert!(
                !(spec.secret && spec.readonly),
                "{} is both secret and readonly",
                spec.name
            );
        }
    }

    #[test]
    fn known_settings_present() {
        for name in [
            "MESSAGE_GROUP_TIMEOUT",
            "KB_TOPICS_ONLY",
            "KB_LOCK_TIMEOUT_SECS",
            "AGENT_TIMEOUT_SECS",
            "ALLOWED_USER_IDS",
        ] {
            assert!(lookup(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn category_is_prefix_before_underscore() {
        assert_eq!(category_of("KB_TOPICS_ONLY"), "KB");
        assert_eq!(category_of("AGENT_MODEL"), "AGENT");
        assert_eq!(category_of("NOPREFIX"), "NOPREFIX");
    }

    // ── Boolean parser ────────────────────────────────────────────────────────

    #[test]
    fn bool_parser_accepts_spellings() {
        for raw in ["true", "1", "yes", "on", "TRUE", "Yes"] {
            assert_eq!(
                parse_value(FieldType::Bool, raw).unwrap(),
                FieldValue::Bool(true),
                "{raw}"
            );
        }
        for raw in ["false", "0", "no", "off", "OFF"] {
            assert_eq!(
                parse_value(FieldType::Bool, raw).unwrap(),
                FieldValue::Bool(false),
                "{raw}"
            );
        }
    }

    #[test]
    fn bool_parser_rejects_garbage() {
        assert!(parse_value(FieldType::Bool, "maybe").is_err());
    }

    // ── Numeric and list parsing ──────────────────────────────────────────────

    #[test]
    fn int_parsing() {
        assert_eq!(
            parse_value(FieldType::Int, " 42 ").unwrap(),
            FieldValue::Int(42)
        );
        assert!(parse_value(FieldType::Int, "4.5").is_err());
    }

    #[test]
    fn int_list_parsing() {
        assert_eq!(
            parse_value(FieldType::IntList, "1, 2,3").unwrap(),
            FieldValue::IntList(vec![1, 2, 3])
        );
        assert_eq!(
            parse_value(FieldType::IntList, "").unwrap(),
            FieldValue::IntList(vec![])
        );
        assert!(parse_value(FieldType::IntList, "1,x").is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(parse_value(FieldType::Path, "").is_err());
    }

    // ── Constraints ───────────────────────────────────────────────────────────

    #[test]
    fn int_range_enforced() {
        let c = Constraint::IntRange { min: 1, max: 10 };
        assert!(c.check(&FieldValue::Int(5)).is_ok());
        assert!(c.check(&FieldValue::Int(0)).is_err());
        assert!(c.check(&FieldValue::Int(11)).is_err());
    }

    #[test]
    fn one_of_enforced() {
        let c = Constraint::OneOf(&["a", "b"]);
        assert!(c.check(&FieldValue::Enum("a".into())).is_ok());
        assert!(c.check(&FieldValue::Enum("c".into())).is_err());
    }

    // ── JSON round trip ───────────────────────────────────────────────────────

    #[test]
    fn json_round_trip_all_types() {
        let values = [
            FieldValue::Bool(true),
            FieldValue::Int(7),
            FieldValue::Float(0.5),
            FieldValue::Str("hello".into()),
            FieldValue::Path(PathBuf::from("a/b")),
            FieldValue::Enum("openai".into()),
            FieldValue::IntList(vec![1, 2]),
        ];
        for v in values {
            let json = v.to_json();
            let back = FieldValue::from_json(v.field_type(), &json).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn from_json_type_mismatch_is_none() {
        assert!(FieldValue::from_json(FieldType::Int, &serde_json::json!("nope")).is_none());
    }

    // ── YAML coercion ─────────────────────────────────────────────────────────

    #[test]
    fn yaml_scalar_coercion() {
        let yes: serde_yaml::Value = serde_yaml::from_str("true").unwrap();
        assert_eq!(
            parse_yaml_value(FieldType::Bool, &yes).unwrap(),
            FieldValue::Bool(true)
        );
        let list: serde_yaml::Value = serde_yaml::from_str("[1, 2, 3]").unwrap();
        assert_eq!(
            parse_yaml_value(FieldType::IntList, &list).unwrap(),
            FieldValue::IntList(vec![1, 2, 3])
        );
    }

    #[test]
    fn yaml_string_falls_back_to_string_parser() {
        let s: serde_yaml::Value = serde_yaml::from_str("\"yes\"").unwrap();
        assert_eq!(
            parse_yaml_value(FieldType::Bool, &s).unwrap(),
            FieldValue::Bool(true)
        );
    }
}
