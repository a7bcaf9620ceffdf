use crate::shared::record::RecordExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The managed resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    WafPolicy,
    WafReport,
    WafPolicyImport,
    DeviceProvider,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::WafPolicy,
        ResourceKind::WafReport,
        ResourceKind::WafPolicyImport,
        ResourceKind::DeviceProvider,
    ];

    /// Terraform-style type name
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::WafPolicy => "bigipnext_cm_waf_policy",
            ResourceKind::WafReport => "bigipnext_cm_waf_report",
            ResourceKind::WafPolicyImport => "bigipnext_cm_waf_policy_import",
            ResourceKind::DeviceProvider => "bigipnext_cm_provider",
        }
    }

    /// Human readable name used in error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ResourceKind::WafPolicy => "WAF policy",
            ResourceKind::WafReport => "WAF report",
            ResourceKind::WafPolicyImport => "WAF policy import",
            ResourceKind::DeviceProvider => "device provider",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ResourceKind::ALL
            .into_iter()
            .find(|kind| {
                kind.type_name() == normalized
                    || kind.type_name().trim_start_matches("bigipnext_cm_") == normalized
            })
            .ok_or_else(|| {
                format!(
                    "unknown resource type '{}'; expected one of: {}",
                    s,
                    ResourceKind::ALL
                        .iter()
                        .map(|k| k.type_name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Server-assigned key of one remote record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// Blank identities are rejected
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User-declared target attributes for one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredConfig {
    pub attributes: Map<String, Value>,
}

impl DesiredConfig {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }

    /// Accepts only a JSON object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(attributes) => Some(Self { attributes }),
            _ => None,
        }
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        self.attributes.at(path)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.attributes.str_at(&[name])
    }
}

/// Last known state of a resource, refreshed from the remote record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    #[serde(default)]
    pub identity: Option<ResourceIdentity>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ObservedState {
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        self.attributes.at(path)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.attributes.str_at(&[name])
    }

    pub fn is_present(&self) -> bool {
        self.identity.is_some()
    }

    /// Drop the identity after a successful remote delete
    pub fn clear(&mut self) {
        self.identity = None;
        self.attributes.insert("id".to_string(), Value::String(String::new()));
    }
}

/// What the synchronizer needs to do to converge one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    /// A force-new attribute changed: delete then create
    Replace,
    NoChange,
}
