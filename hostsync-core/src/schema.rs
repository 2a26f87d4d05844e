//! Declarative config schemas.
//!
//! Every job declares a closed [`ConfigSchema`] for its config section. The
//! schema is checked before the orchestrator touches either host; it reports
//! every problem it finds rather than stopping at the first one.

use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;
use crate::threshold::Threshold;

/// Accepted shape of one key.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Bool,
    Integer { min: Option<i64>, max: Option<i64> },
    StringList,
    /// `"N%"` or a byte size, see [`Threshold`].
    Threshold,
    /// One of a fixed set of strings.
    Enum(&'static [&'static str]),
}

impl FieldType {
    pub fn integer(min: i64, max: i64) -> Self {
        FieldType::Integer {
            min: Some(min),
            max: Some(max),
        }
    }

    fn describe(&self) -> String {
        match self {
            FieldType::String => "a string".into(),
            FieldType::Bool => "a boolean".into(),
            FieldType::Integer { .. } => "an integer".into(),
            FieldType::StringList => "a list of strings".into(),
            FieldType::Threshold => "a threshold such as \"20%\" or \"50GiB\"".into(),
            FieldType::Enum(options) => format!("one of: {}", options.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

/// A closed set of keys; anything not declared is rejected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSchema {
    fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    /// Schema with no keys: accepts only an empty (or absent) section.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: &'static str, ty: FieldType, description: &'static str) -> Self {
        self.fields.push(FieldSpec {
            key,
            ty,
            required: true,
            default: None,
            description,
        });
        self
    }

    pub fn optional(
        mut self,
        key: &'static str,
        ty: FieldType,
        default: impl Into<Value>,
        description: &'static str,
    ) -> Self {
        self.fields.push(FieldSpec {
            key,
            ty,
            required: false,
            default: Some(default.into()),
            description,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check `raw` against the schema. `Null` is treated as an empty mapping
    /// so an absent section behaves like `{}`.
    pub fn validate(&self, section: &str, raw: &Value) -> Vec<ConfigError> {
        let empty = Mapping::new();
        let map = match raw {
            Value::Null => &empty,
            Value::Mapping(map) => map,
            _ => {
                return vec![ConfigError::NotAMapping {
                    section: section.to_owned(),
                }]
            }
        };

        let mut errors = Vec::new();

        for key in map.keys() {
            let known = key
                .as_str()
                .map(|k| self.fields.iter().any(|f| f.key == k))
                .unwrap_or(false);
            if !known {
                errors.push(ConfigError::UnknownKey {
                    section: section.to_owned(),
                    key: display_key(key),
                });
            }
        }

        for field in &self.fields {
            match map.get(field.key) {
                None | Some(Value::Null) if field.required => errors.push(ConfigError::MissingKey {
                    section: section.to_owned(),
                    key: field.key.to_owned(),
                }),
                None | Some(Value::Null) => {}
                Some(value) => {
                    if let Some(err) = check_value(section, field, value) {
                        errors.push(err);
                    }
                }
            }
        }

        errors
    }

    /// Return `raw` with declared defaults filled in for absent keys.
    /// Call only after [`validate`](Self::validate) returned no errors.
    pub fn with_defaults(&self, raw: &Value) -> Value {
        let mut map = match raw {
            Value::Mapping(map) => map.clone(),
            _ => Mapping::new(),
        };
        for field in &self.fields {
            let absent = matches!(map.get(field.key), None | Some(Value::Null));
            if absent {
                if let Some(default) = &field.default {
                    map.insert(Value::from(field.key), default.clone());
                }
            }
        }
        Value::Mapping(map)
    }
}

fn display_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_owned())
            .unwrap_or_else(|_| "<non-string key>".to_owned()),
    }
}

fn check_value(section: &str, field: &FieldSpec, value: &Value) -> Option<ConfigError> {
    let invalid_type = || ConfigError::InvalidType {
        section: section.to_owned(),
        key: field.key.to_owned(),
        expected: field.ty.describe(),
    };

    match &field.ty {
        FieldType::String => (!value.is_string()).then(invalid_type),
        FieldType::Bool => (!value.is_bool()).then(invalid_type),
        FieldType::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                return Some(invalid_type());
            };
            let below = min.is_some_and(|m| n < m);
            let above = max.is_some_and(|m| n > m);
            (below || above).then(|| ConfigError::OutOfRange {
                section: section.to_owned(),
                key: field.key.to_owned(),
                value: n,
                range: describe_range(*min, *max),
            })
        }
        FieldType::StringList => match value.as_sequence() {
            Some(items) if items.iter().all(Value::is_string) => None,
            _ => Some(invalid_type()),
        },
        FieldType::Threshold => match value.as_str() {
            Some(raw) => raw.parse::<Threshold>().err().map(|message| ConfigError::InvalidValue {
                section: section.to_owned(),
                key: field.key.to_owned(),
                message,
            }),
            None => Some(invalid_type()),
        },
        FieldType::Enum(options) => match value.as_str() {
            Some(s) if options.contains(&s) => None,
            _ => Some(invalid_type()),
        },
    }
}

fn describe_range(min: Option<i64>, max: Option<i64>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!("{lo}..={hi}"),
        (Some(lo), None) => format!(">= {lo}"),
        (None, Some(hi)) => format!("<= {hi}"),
        (None, None) => "any".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).expect("yaml")
    }

    fn snapshot_like() -> ConfigSchema {
        ConfigSchema::empty()
            .required("subvolumes", FieldType::StringList, "subvolumes to snapshot")
            .optional("keep_recent", FieldType::integer(1, 100), 3, "sessions to keep")
            .optional("sudo", FieldType::Bool, true, "prefix btrfs with sudo -n")
    }

    #[test]
    fn empty_schema_accepts_empty_and_absent_sections() {
        let schema = ConfigSchema::empty();
        assert!(schema.validate("noop", &yaml("{}")).is_empty());
        assert!(schema.validate("noop", &Value::Null).is_empty());
    }

    #[test]
    fn empty_schema_rejects_any_key() {
        let errors = ConfigSchema::empty().validate("noop", &yaml("surprise: 1"));
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ConfigError::UnknownKey { key, .. } if key == "surprise"));
    }

    #[test]
    fn reports_every_problem_at_once() {
        let errors = snapshot_like().validate("btrfs_snapshots", &yaml("keep_recent: 0\nsudo: maybe\nextra: x"));
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| matches!(e, ConfigError::MissingKey { key, .. } if key == "subvolumes")));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::OutOfRange { value: 0, .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key == "sudo")));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::UnknownKey { key, .. } if key == "extra")));
    }

    #[test]
    fn non_mapping_section_is_rejected() {
        let errors = snapshot_like().validate("btrfs_snapshots", &yaml("[1, 2]"));
        assert!(matches!(errors.as_slice(), [ConfigError::NotAMapping { .. }]));
    }

    #[test]
    fn string_list_rejects_mixed_items() {
        let errors = snapshot_like().validate("btrfs_snapshots", &yaml("subvolumes: ['@', 3]"));
        assert!(matches!(errors.as_slice(), [ConfigError::InvalidType { .. }]));
    }

    #[test]
    fn threshold_values_are_parsed() {
        let schema = ConfigSchema::empty().optional("min", FieldType::Threshold, "20%", "floor");
        assert!(schema.validate("disk", &yaml("min: 15%")).is_empty());
        let errors = schema.validate("disk", &yaml("min: 150%"));
        assert!(matches!(errors.as_slice(), [ConfigError::InvalidValue { .. }]));
    }

    #[test]
    fn defaults_fill_only_absent_keys() {
        let filled = snapshot_like().with_defaults(&yaml("subvolumes: ['@']\nkeep_recent: 5"));
        assert_eq!(filled["keep_recent"], Value::from(5));
        assert_eq!(filled["sudo"], Value::from(true));
    }
}
