use crate::graph::ResourceKind;
use crate::provider::{Attributes, Inputs, Provisioned};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".gateway";

/// What the engine knows about one live resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub name: String,
    pub kind: ResourceKind,
    pub physical_name: String,
    pub id: String,
    pub inputs: Inputs,
    pub attributes: Attributes,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResourceState {
    pub fn provisioned(&self) -> Provisioned {
        Provisioned {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    pub stack: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: Vec<ResourceState>,
    /// Replaced resources whose deletion has not happened yet
    #[serde(default)]
    pub pending_deletes: Vec<ResourceState>,
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

impl StackState {
    pub fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            updated_at: None,
            resources: Vec::new(),
            pending_deletes: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.pending_deletes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResourceState> {
        self.resources.iter_mut().find(|r| r.name == name)
    }

    /// Recorded output of a live resource
    pub fn attribute(&self, name: &str, attribute: &str) -> Option<String> {
        self.get(name)
            .and_then(|r| r.attributes.get(attribute))
            .cloned()
    }

    /// Record `resource`, keeping its slot if the name is already known.
    /// Returns the record it displaced.
    pub fn upsert(&mut self, resource: ResourceState) -> Option<ResourceState> {
        match self.resources.iter_mut().find(|r| r.name == resource.name) {
            Some(slot) => Some(std::mem::replace(slot, resource)),
            None => {
                self.resources.push(resource);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.name == name)?;
        Some(self.resources.remove(pos))
    }

    /// Names of live resources in the order they can be deleted: nothing is
    /// removed while another recorded resource still depends on it.
    pub fn deletion_order(&self) -> Vec<String> {
        let mut remaining: Vec<&ResourceState> = self.resources.iter().collect();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let still_needed: BTreeSet<&str> = remaining
                .iter()
                .flat_map(|r| r.dependencies.iter().map(|d| d.as_str()))
                .collect();
            // latest recorded first among those nothing depends on
            let pos = remaining
                .iter()
                .rposition(|r| !still_needed.contains(r.name.as_str()))
                .unwrap_or(remaining.len() - 1);
            ordered.push(remaining.remove(pos).name.clone());
        }
        ordered
    }
}

/// Reads and writes per-stack state files under `<project>/.gateway/`
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            dir: project_dir.join(STATE_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{}.json", stack))
    }

    /// Where the simulated cloud for `stack` is persisted
    pub fn simulated_cloud_path(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{}.cloud.json", stack))
    }

    pub fn load(&self, stack: &str) -> Result<StackState> {
        let path = self.path(stack);
        if !path.exists() {
            return Ok(StackState::new(stack));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: StackState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        if state.stack != stack {
            anyhow::bail!(
                "State file {} belongs to stack '{}', not '{}'",
                path.display(),
                state.stack,
                stack
            );
        }
        Ok(state)
    }

    pub fn save(&self, state: &mut StackState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        state.updated_at = Some(Utc::now());
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let path = self.path(&state.stack);
        write_replacing(&path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;
        log::debug!("Saved state for stack '{}' ({} resources)", state.stack, state.resources.len());
        Ok(())
    }
}

/// Write `content` beside `path` and rename it into place, so readers see
/// either the old file or the new one
pub(crate) fn write_replacing(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("No file name in {}", path.display()))?;
    let tmp_path = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp_path, content)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move {} to {}", tmp_path.display(), path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, deps: &[&str]) -> ResourceState {
        ResourceState {
            name: name.to_string(),
            kind: ResourceKind::Vpc,
            physical_name: format!("{}-abcdef0", name),
            id: format!("id-{}", name),
            inputs: Inputs::new(),
            attributes: [("id".to_string(), format!("id-{}", name))].into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn missing_state_file_is_an_empty_stack() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let state = store.load("dev").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.stack, "dev");
    }

    #[test]
    fn save_then_load_keeps_records() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = StackState::new("dev");
        state.upsert(record("vpc", &[]));
        state.exports.insert("public_ip".into(), "198.51.100.1".into());
        store.save(&mut state).unwrap();

        assert!(store.path("dev").ends_with(".gateway/dev.json"));
        let loaded = store.load("dev").unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn interrupted_save_leaves_previous_state_readable() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = StackState::new("dev");
        state.upsert(record("vpc", &[]));
        store.save(&mut state).unwrap();

        // a save cut off halfway only ever touches the side file
        let side = store.dir().join("dev.json.tmp");
        fs::write(&side, "{\"stack\": \"dev\", \"resour").unwrap();
        assert_eq!(store.load("dev").unwrap(), state);

        state.upsert(record("subnet", &["vpc"]));
        store.save(&mut state).unwrap();
        assert!(!side.exists());
        assert_eq!(store.load("dev").unwrap().resources.len(), 2);
    }

    #[test]
    fn state_for_another_stack_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = StackState::new("prod");
        store.save(&mut state).unwrap();
        fs::rename(store.path("prod"), store.path("dev")).unwrap();
        assert!(store.load("dev").is_err());
    }

    #[test]
    fn upsert_keeps_position_and_returns_old_record() {
        let mut state = StackState::new("dev");
        state.upsert(record("vpc", &[]));
        state.upsert(record("subnet", &["vpc"]));
        let mut replacement = record("vpc", &[]);
        replacement.id = "id-vpc-2".into();
        replacement.attributes.insert("id".into(), "id-vpc-2".into());

        let old = state.upsert(replacement).unwrap();
        assert_eq!(old.id, "id-vpc");
        assert_eq!(state.resources[0].id, "id-vpc-2");
        assert_eq!(state.attribute("vpc", "id").as_deref(), Some("id-vpc-2"));
    }

    #[test]
    fn dependents_are_deleted_first() {
        let mut state = StackState::new("dev");
        state.upsert(record("vpc", &[]));
        state.upsert(record("igw", &["vpc"]));
        state.upsert(record("subnet", &["vpc"]));
        state.upsert(record("route", &["igw"]));
        assert_eq!(state.deletion_order(), vec!["route", "subnet", "igw", "vpc"]);
    }
}
