// Cloud providers - the side that actually creates, changes, and deletes resources
mod aws;
mod memory;

pub use aws::AwsCliProvider;
pub use memory::{CloudResource, MachineImage, MemoryProvider, Operation};

use crate::graph::ResourceKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fully resolved resource inputs
pub type Inputs = BTreeMap<String, Value>;

/// Attributes a provider reports for a live resource (always includes `id`)
pub type Attributes = BTreeMap<String, String>;

/// Machine image lookup (a read-only data source)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuery {
    pub most_recent: bool,
    pub name_pattern: String,
    pub virtualization_type: String,
    pub owners: Vec<String>,
}

/// A live resource as the provider reported it on creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioned {
    pub id: String,
    pub attributes: Attributes,
}

impl Provisioned {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut attributes = Attributes::new();
        attributes.insert("id".to_string(), id.clone());
        Self { id, attributes }
    }

    pub fn with(mut self, attribute: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(attribute.to_string(), value.into());
        self
    }

    pub fn attribute(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(|s| s.as_str())
    }
}

pub trait Provider {
    fn lookup_image(&mut self, query: &ImageQuery) -> Result<String>;

    /// Create a resource. `name` is the physical name chosen by the engine.
    fn create(&mut self, kind: ResourceKind, name: &str, inputs: &Inputs) -> Result<Provisioned>;

    /// Apply in-place changes. Only keys the kind marks updatable differ.
    fn update(
        &mut self,
        kind: ResourceKind,
        current: &Provisioned,
        old: &Inputs,
        new: &Inputs,
    ) -> Result<()>;

    fn delete(&mut self, kind: ResourceKind, current: &Provisioned, inputs: &Inputs) -> Result<()>;
}

/// Which provider the CLI drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    /// Real AWS account via the aws CLI
    Aws,
    /// Local simulated cloud, persisted next to the stack state
    Memory,
}

pub(crate) fn input_str<'a>(inputs: &'a Inputs, key: &str) -> Result<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("Missing string input '{}'", key))
}

pub(crate) fn input_opt_str<'a>(inputs: &'a Inputs, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

pub(crate) fn input_bool(inputs: &Inputs, key: &str) -> Option<bool> {
    inputs.get(key).and_then(Value::as_bool)
}

pub(crate) fn input_str_list<'a>(inputs: &'a Inputs, key: &str) -> Vec<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// String entries of the `tags` map
pub(crate) fn input_tags(inputs: &Inputs) -> Vec<(String, String)> {
    inputs
        .get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
