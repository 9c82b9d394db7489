//! Diff engine for comparing declared vs live resource properties.
//!
//! Only declared keys are compared. Write-only secrets are never returned by
//! the control plane and are skipped. Arrays compare as sets and resource ids
//! ignore case.

use serde_json::Value;
use tracing::debug;

use crate::graph::{Properties, ResourceNode};
use crate::provider::{LiveResource, ProvisioningState};

/// Properties the control plane accepts but never returns.
pub const WRITE_ONLY_KEYS: &[&str] = &["shared_key"];

/// Engine for computing diffs between declared and live properties.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Details about the difference.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource exists but differs from its declaration.
    Update,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Live value.
    pub old_value: Option<String>,
    /// Declared value.
    pub new_value: Option<String>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Compares a node's declaration with what the provider returned.
    #[must_use]
    pub fn diff_node(&self, node: &ResourceNode, live: Option<&LiveResource>) -> ResourceDiff {
        self.diff_properties(&node.name, &node.properties, live)
    }

    /// Compares an explicit property set, such as a declaration with its
    /// references bound, with what the provider returned.
    #[must_use]
    pub fn diff_properties(
        &self,
        name: &str,
        declared: &Properties,
        live: Option<&LiveResource>,
    ) -> ResourceDiff {
        let Some(live) = live else {
            debug!("{} does not exist and needs to be created", name);
            return ResourceDiff {
                name: name.to_string(),
                diff_type: DiffType::Create,
                details: vec![],
            };
        };

        let mut details = self.compare(declared, &live.properties);
        if live.provisioning_state != ProvisioningState::Succeeded {
            details.push(DiffDetail {
                field: String::from("provisioning_state"),
                old_value: Some(live.provisioning_state.to_string()),
                new_value: Some(ProvisioningState::Succeeded.to_string()),
            });
        }

        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else {
            DiffType::Update
        };

        debug!("{} diff: {}", name, diff_type);
        ResourceDiff {
            name: name.to_string(),
            diff_type,
            details,
        }
    }

    /// Compares declared properties against live ones.
    #[must_use]
    pub fn compare(&self, declared: &Properties, live: &Properties) -> Vec<DiffDetail> {
        declared
            .iter()
            .filter(|(key, _)| !WRITE_ONLY_KEYS.contains(&key.as_str()))
            .filter(|(key, value)| !values_match(key, value, live.get(key.as_str())))
            .map(|(key, value)| DiffDetail {
                field: key.clone(),
                old_value: live.get(key.as_str()).map(render),
                new_value: Some(render(value)),
            })
            .collect()
    }
}

fn values_match(key: &str, declared: &Value, live: Option<&Value>) -> bool {
    match (declared, live) {
        (_, None) => is_empty_value(declared),
        (Value::String(want), Some(Value::String(have))) if key == "location" => {
            normalize_location(want) == normalize_location(have)
        }
        (Value::String(want), Some(Value::String(have))) if is_id_key(key) => {
            want.eq_ignore_ascii_case(have)
        }
        (Value::Array(want), Some(Value::Array(have))) => {
            want.len() == have.len()
                && want
                    .iter()
                    .all(|w| have.iter().any(|h| values_match(key, w, Some(h))))
        }
        (Value::Object(want), Some(Value::Object(have))) => {
            want.len() == have.len() && want.iter().all(|(k, w)| values_match(k, w, have.get(k)))
        }
        (want, Some(have)) => want == have,
    }
}

// ARM does not preserve the casing of resource ids.
fn is_id_key(key: &str) -> bool {
    key == "id" || key.ends_with("_id")
}

// ARM reports "East US" as "eastus".
fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// Empty collections are often omitted from provider responses.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ResourceDiff {
    /// Returns true if the resource needs a create or update call.
    #[must_use]
    pub fn needs_apply(&self) -> bool {
        self.diff_type != DiffType::NoChange
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
