// Provisioning engine - diff a stack against recorded state and apply the plan
pub mod plan;
pub mod state;

pub use plan::{Action, Plan, Step};
pub use state::{ResourceState, StackState, StateStore};

use crate::graph::{Resource, Stack};
use crate::provider::{Inputs, Provider};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// What an apply or destroy did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub exports: BTreeMap<String, String>,
}

impl ApplyReport {
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} replaced, {} deleted, {} unchanged",
            self.created, self.updated, self.replaced, self.deleted, self.unchanged
        )
    }
}

/// Cloud name for a new resource: the logical name plus a random suffix
pub fn physical_name(logical: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", logical, &suffix[..7])
}

pub struct Engine<'a> {
    provider: &'a mut dyn Provider,
    store: StateStore,
}

impl<'a> Engine<'a> {
    pub fn new(provider: &'a mut dyn Provider, store: StateStore) -> Self {
        Self { provider, store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn preview(&self, stack: &Stack) -> Result<Plan> {
        let state = self.store.load(stack.name())?;
        Plan::compute(stack, &state)
    }

    pub fn up(&mut self, stack: &Stack) -> Result<ApplyReport> {
        let plan = self.preview(stack)?;
        self.apply(stack, &plan)
    }

    /// Execute `plan`, saving state after every step that touched the cloud
    pub fn apply(&mut self, stack: &Stack, plan: &Plan) -> Result<ApplyReport> {
        let mut state = self.store.load(stack.name())?;
        let mut report = ApplyReport::default();
        log::info!("Applying stack '{}': {}", stack.name(), plan.summary());

        for step in plan.steps() {
            match step.action {
                Action::Same => report.unchanged += 1,
                Action::Create => {
                    self.create(stack, step, &mut state)?;
                    report.created += 1;
                }
                Action::Replace => {
                    self.create(stack, step, &mut state)?;
                    report.replaced += 1;
                }
                Action::Update => {
                    self.update(stack, step, &mut state)?;
                    report.updated += 1;
                }
                Action::Delete => {}
            }
        }

        // replaced resources go once everything new is in place
        report.deleted += self.delete_pending(&mut state)?;

        for step in plan.steps().iter().filter(|s| s.action == Action::Delete) {
            if stack.get(&step.name).is_some() {
                continue;
            }
            let live = state.get(&step.name).map(|r| r.id.clone());
            if live.is_some() && live == step.id {
                self.delete_recorded(&step.name, &mut state)?;
                report.deleted += 1;
            }
        }

        report.exports = resolve_exports(stack, &state);
        state.exports = report.exports.clone();
        self.store.save(&mut state)?;
        log::info!("Stack '{}' applied: {}", stack.name(), report.summary());
        Ok(report)
    }

    /// Delete every resource recorded for `stack_name`
    pub fn destroy(&mut self, stack_name: &str) -> Result<ApplyReport> {
        let mut state = self.store.load(stack_name)?;
        let mut report = ApplyReport::default();
        log::info!(
            "Destroying stack '{}': {}",
            stack_name,
            Plan::destroy(&state).summary()
        );

        report.deleted += self.delete_pending(&mut state)?;
        for name in state.deletion_order() {
            self.delete_recorded(&name, &mut state)?;
            report.deleted += 1;
        }

        state.exports.clear();
        self.store.save(&mut state)?;
        Ok(report)
    }

    fn create(&mut self, stack: &Stack, step: &Step, state: &mut StackState) -> Result<()> {
        let resource = declared(stack, &step.name)?;
        let inputs = resolve_inputs(resource, state)?;
        let name = physical_name(&resource.name);

        log::info!("{} {} as {}", step.action.verb(), resource.name, name);
        let provisioned = self
            .provider
            .create(resource.kind, &name, &inputs)
            .with_context(|| format!("Could not {} '{}'", step.action.verb(), resource.name))?;

        let record = ResourceState {
            name: resource.name.clone(),
            kind: resource.kind,
            physical_name: name,
            id: provisioned.id.clone(),
            inputs,
            attributes: provisioned.attributes,
            dependencies: resource.dependencies().into_iter().collect(),
        };
        if let Some(old) = state.upsert(record) {
            state.pending_deletes.push(old);
        }
        self.store.save(state)?;

        match step.action {
            Action::Replace => println!("  ✓ Replaced {} ({})", resource.name, provisioned.id),
            _ => println!("  ✓ Created {} ({})", resource.name, provisioned.id),
        }
        Ok(())
    }

    fn update(&mut self, stack: &Stack, step: &Step, state: &mut StackState) -> Result<()> {
        let resource = declared(stack, &step.name)?;
        let inputs = resolve_inputs(resource, state)?;
        let current = state
            .get(&resource.name)
            .with_context(|| format!("No recorded state for '{}'", resource.name))?;

        log::info!("update {} [{}]", resource.name, step.changed.join(", "));
        self.provider
            .update(resource.kind, &current.provisioned(), &current.inputs, &inputs)
            .with_context(|| format!("Could not update '{}'", resource.name))?;

        if let Some(record) = state.get_mut(&resource.name) {
            record.inputs = inputs;
            record.dependencies = resource.dependencies().into_iter().collect();
        }
        self.store.save(state)?;
        println!("  ✓ Updated {} ({})", resource.name, step.changed.join(", "));
        Ok(())
    }

    /// Delete replaced resources, newest first
    fn delete_pending(&mut self, state: &mut StackState) -> Result<usize> {
        let mut deleted = 0;
        while let Some(old) = state.pending_deletes.last().cloned() {
            log::info!("delete replaced {} ({})", old.name, old.id);
            self.provider
                .delete(old.kind, &old.provisioned(), &old.inputs)
                .with_context(|| format!("Could not delete replaced '{}' ({})", old.name, old.id))?;
            state.pending_deletes.pop();
            self.store.save(state)?;
            println!("  ✓ Deleted replaced {} ({})", old.name, old.id);
            deleted += 1;
        }
        Ok(deleted)
    }

    fn delete_recorded(&mut self, name: &str, state: &mut StackState) -> Result<()> {
        let record = state
            .get(name)
            .cloned()
            .with_context(|| format!("No recorded state for '{}'", name))?;

        log::info!("delete {} ({})", record.name, record.id);
        self.provider
            .delete(record.kind, &record.provisioned(), &record.inputs)
            .with_context(|| format!("Could not delete '{}' ({})", record.name, record.id))?;
        state.remove(name);
        self.store.save(state)?;
        println!("  ✓ Deleted {} ({})", record.name, record.id);
        Ok(())
    }
}

fn declared<'s>(stack: &'s Stack, name: &str) -> Result<&'s Resource> {
    stack
        .get(name)
        .with_context(|| format!("Plan step '{}' is not declared in stack '{}'", name, stack.name()))
}

/// Inputs of `resource` with every reference replaced by its recorded value
pub fn resolve_inputs(resource: &Resource, state: &StackState) -> Result<Inputs> {
    let lookup = |name: &str, attribute: &str| state.attribute(name, attribute);
    let mut inputs = Inputs::new();
    for (key, prop) in &resource.props {
        let value = prop.resolve(&lookup).with_context(|| {
            format!(
                "Input '{}' of '{}' depends on values that are not known yet",
                key, resource.name
            )
        })?;
        inputs.insert(key.clone(), value);
    }
    Ok(inputs)
}

/// Stack exports that can be resolved from `state`
pub fn resolve_exports(stack: &Stack, state: &StackState) -> BTreeMap<String, String> {
    let lookup = |name: &str, attribute: &str| state.attribute(name, attribute);
    let mut exports = BTreeMap::new();
    for (name, output) in stack.exports() {
        match output.resolve(&lookup) {
            Some(value) => {
                exports.insert(name.clone(), value);
            }
            None => log::warn!("Export '{}' is not known yet", name),
        }
    }
    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{self, compute, GatewaySettings};
    use crate::graph::ResourceKind;
    use crate::provider::{MemoryProvider, Operation};
    use tempfile::TempDir;

    fn gateway_stack(provider: &mut MemoryProvider, settings: &GatewaySettings) -> Stack {
        let image = provider.lookup_image(&compute::image_query()).unwrap();
        gateway::build_stack("dev", settings, &image).unwrap()
    }

    #[test]
    fn physical_names_get_a_short_random_suffix() {
        let a = physical_name("bucket");
        let b = physical_name("bucket");
        assert_eq!(a.len(), "bucket-".len() + 7);
        assert!(a.starts_with("bucket-"));
        assert!(a["bucket-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn second_apply_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1");
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());

        let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
        let first = engine.up(&stack).unwrap();
        assert_eq!(first.created, stack.resources().len());

        let plan = engine.preview(&stack).unwrap();
        assert!(plan.is_noop(), "{}", plan.summary());
        let second = engine.up(&stack).unwrap();
        assert_eq!(second.unchanged, stack.resources().len());
        assert_eq!(second.created + second.updated + second.replaced + second.deleted, 0);
    }

    #[test]
    fn source_range_change_only_updates_security_group() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1");
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());
        let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
        engine.up(&stack).unwrap();

        let narrowed = GatewaySettings {
            source_cidr: "203.0.113.0/24".to_string(),
            ..GatewaySettings::default()
        };
        let image = engine_image(&mut engine);
        let changed = gateway::build_stack("dev", &narrowed, &image).unwrap();
        let plan = engine.preview(&changed).unwrap();

        let changes: Vec<&Step> = plan.changes().collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "security-group");
        assert_eq!(changes[0].action, Action::Update);
        assert_eq!(changes[0].changed, vec!["ingress"]);

        let report = engine.apply(&changed, &plan).unwrap();
        assert_eq!(report.updated, 1);
    }

    fn engine_image(engine: &mut Engine<'_>) -> String {
        engine.provider.lookup_image(&compute::image_query()).unwrap()
    }

    #[test]
    fn boot_script_change_replaces_instance_and_association() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1");
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());
        let old_instance;
        {
            let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
            engine.up(&stack).unwrap();
            old_instance = engine
                .store()
                .load("dev")
                .unwrap()
                .get("vpn-server")
                .unwrap()
                .id
                .clone();
        }

        let strict = GatewaySettings {
            strict_boot_script: true,
            ..GatewaySettings::default()
        };
        let changed = gateway_stack(&mut cloud, &strict);
        let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
        let plan = engine.preview(&changed).unwrap();
        assert_eq!(plan.step("vpn-server").unwrap().action, Action::Replace);
        assert_eq!(plan.step("eip-association").unwrap().action, Action::Replace);
        assert_eq!(plan.step("vpn-route").unwrap().action, Action::Update);
        assert_eq!(plan.changes().count(), 3);

        let report = engine.apply(&changed, &plan).unwrap();
        assert_eq!((report.replaced, report.updated, report.deleted), (2, 1, 2));

        let state = engine.store().load("dev").unwrap();
        assert!(state.pending_deletes.is_empty());
        let new_instance = state.get("vpn-server").unwrap();
        assert_ne!(new_instance.id, old_instance);
        let route = state.get("vpn-route").unwrap();
        assert_eq!(
            route.inputs["network_interface_id"],
            serde_json::json!(new_instance.attributes["primary_network_interface_id"])
        );

        assert!(cloud.resource(&old_instance).is_none());
        assert_eq!(cloud.resources_of(ResourceKind::Instance).len(), 1);
        assert_eq!(cloud.resources_of(ResourceKind::EipAssociation).len(), 1);
    }

    #[test]
    fn destroy_deletes_dependents_first() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1");
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());
        {
            let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
            engine.up(&stack).unwrap();
            let report = engine.destroy("dev").unwrap();
            assert_eq!(report.deleted, stack.resources().len());
            assert!(engine.store().load("dev").unwrap().is_empty());
        }
        assert!(cloud.is_empty());

        let deletes: Vec<ResourceKind> = cloud
            .operations()
            .iter()
            .filter_map(|op| match op {
                Operation::Delete(kind, _) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(deletes.first(), Some(&ResourceKind::Route));
        assert_eq!(deletes.last(), Some(&ResourceKind::Vpc));
    }

    #[test]
    fn failed_create_keeps_earlier_progress() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1").fail_on(ResourceKind::Bucket);
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());

        let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
        let err = engine.up(&stack).unwrap_err();
        assert!(format!("{:#}", err).contains("Could not create 'bucket'"));

        let state = engine.store().load("dev").unwrap();
        assert!(state.get("vpc").is_some());
        assert!(state.get("security-group").is_some());
        assert!(state.get("bucket").is_none());
        assert!(state.get("s3-policy").is_none());
    }

    #[test]
    fn exports_resolve_after_apply() {
        let dir = TempDir::new().unwrap();
        let mut cloud = MemoryProvider::new("us-east-1");
        let stack = gateway_stack(&mut cloud, &GatewaySettings::default());
        let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
        let report = engine.up(&stack).unwrap();

        let bucket = &report.exports["bucket_name"];
        assert!(bucket.starts_with("bucket-"));
        assert_eq!(
            report.exports["client_config_uri"],
            format!("s3://{}/client.ovpn", bucket)
        );
        assert_eq!(engine.store().load("dev").unwrap().exports, report.exports);
    }
}
