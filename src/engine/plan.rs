use crate::engine::state::StackState;
use crate::graph::{ResourceKind, Stack};
use crate::provider::Inputs;
use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Same,
}

impl Action {
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "+-",
            Action::Delete => "-",
            Action::Same => " ",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::Same => "same",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub kind: ResourceKind,
    pub action: Action,
    /// Input keys that differ from what is recorded
    pub changed: Vec<String>,
    /// Cloud id of the resource a delete removes
    pub id: Option<String>,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<2} {:<8} {} ({})",
            self.action.symbol(),
            self.action.verb(),
            self.name,
            self.kind
        )?;
        if !self.changed.is_empty() {
            write!(f, " [{}]", self.changed.join(", "))?;
        }
        Ok(())
    }
}

/// Ordered steps that take recorded state to the declared stack
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn compute(stack: &Stack, state: &StackState) -> Result<Self> {
        let mut steps = Vec::new();
        // resources getting a new identity in this plan; anything reading them is unknown
        let mut pending: BTreeSet<String> = BTreeSet::new();

        for resource in stack.order()? {
            let Some(recorded) = state.get(&resource.name) else {
                pending.insert(resource.name.clone());
                steps.push(Step {
                    name: resource.name.clone(),
                    kind: resource.kind,
                    action: Action::Create,
                    changed: Vec::new(),
                    id: None,
                });
                continue;
            };

            if recorded.kind != resource.kind {
                pending.insert(resource.name.clone());
                steps.push(Step {
                    name: resource.name.clone(),
                    kind: resource.kind,
                    action: Action::Replace,
                    changed: vec!["kind".to_string()],
                    id: Some(recorded.id.clone()),
                });
                continue;
            }

            let lookup = |name: &str, attribute: &str| {
                if pending.contains(name) {
                    None
                } else {
                    state.attribute(name, attribute)
                }
            };

            let mut known = Inputs::new();
            let mut changed = Vec::new();
            for (key, prop) in &resource.props {
                match prop.resolve(&lookup) {
                    Some(value) => {
                        if recorded.inputs.get(key) != Some(&value) {
                            changed.push(key.clone());
                        }
                        known.insert(key.clone(), value);
                    }
                    None => changed.push(key.clone()),
                }
            }
            for key in recorded.inputs.keys() {
                if !resource.props.contains_key(key) {
                    changed.push(key.clone());
                }
            }
            changed.sort();

            let action = if changed.is_empty() {
                Action::Same
            } else if changed.iter().all(|key| resource.kind.is_updatable(key, &known)) {
                Action::Update
            } else {
                Action::Replace
            };
            if action == Action::Replace {
                pending.insert(resource.name.clone());
            }

            steps.push(Step {
                name: resource.name.clone(),
                kind: resource.kind,
                action,
                changed,
                id: Some(recorded.id.clone()),
            });
        }

        for condemned in state.pending_deletes.iter().rev() {
            steps.push(delete_step(
                &condemned.name,
                condemned.kind,
                &condemned.id,
            ));
        }
        for name in state.deletion_order() {
            if stack.get(&name).is_some() {
                continue;
            }
            if let Some(recorded) = state.get(&name) {
                steps.push(delete_step(&recorded.name, recorded.kind, &recorded.id));
            }
        }

        Ok(Self { steps })
    }

    /// Every recorded resource deleted, dependents first
    pub fn destroy(state: &StackState) -> Self {
        let mut steps: Vec<Step> = state
            .pending_deletes
            .iter()
            .rev()
            .map(|r| delete_step(&r.name, r.kind, &r.id))
            .collect();
        for name in state.deletion_order() {
            if let Some(recorded) = state.get(&name) {
                steps.push(delete_step(&recorded.name, recorded.kind, &recorded.id));
            }
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps that change something
    pub fn changes(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action != Action::Same)
    }

    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn count(&self, action: Action) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.name == name && s.action != Action::Delete)
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            Action::Create,
            Action::Update,
            Action::Replace,
            Action::Delete,
            Action::Same,
        ]
        .iter()
        .filter_map(|action| match self.count(*action) {
            0 => None,
            n if *action == Action::Same => Some(format!("{} unchanged", n)),
            n => Some(format!("{} to {}", n, action.verb())),
        })
        .collect();
        if parts.is_empty() {
            "no resources".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn delete_step(name: &str, kind: ResourceKind, id: &str) -> Step {
    Step {
        name: name.to_string(),
        kind,
        action: Action::Delete,
        changed: Vec::new(),
        id: Some(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::ResourceState;
    use crate::graph::Resource;
    use serde_json::json;

    fn stack(cidr: &str) -> Stack {
        let mut stack = Stack::new("dev");
        let vpc = stack
            .add(Resource::new(ResourceKind::Vpc, "vpc").prop("cidr_block", cidr))
            .unwrap();
        stack
            .add(
                Resource::new(ResourceKind::SecurityGroup, "sg")
                    .prop("vpc_id", vpc.id())
                    .prop("tags", crate::graph::Prop::map([("Name", "sg".into())])),
            )
            .unwrap();
        stack
    }

    fn recorded(name: &str, kind: ResourceKind, inputs: serde_json::Value) -> ResourceState {
        let id = format!("{}-0001", name);
        ResourceState {
            name: name.to_string(),
            kind,
            physical_name: format!("{}-abcdef0", name),
            id: id.clone(),
            inputs: inputs
                .as_object()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            attributes: [("id".to_string(), id)].into(),
            dependencies: Vec::new(),
        }
    }

    fn applied_state() -> StackState {
        let mut state = StackState::new("dev");
        state.upsert(recorded("vpc", ResourceKind::Vpc, json!({"cidr_block": "10.0.0.0/16"})));
        state.upsert(recorded(
            "sg",
            ResourceKind::SecurityGroup,
            json!({"vpc_id": "vpc-0001", "tags": {"Name": "sg"}}),
        ));
        state
    }

    #[test]
    fn empty_state_creates_everything_in_order() {
        let plan = Plan::compute(&stack("10.0.0.0/16"), &StackState::new("dev")).unwrap();
        let names: Vec<&str> = plan.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["vpc", "sg"]);
        assert_eq!(plan.count(Action::Create), 2);
        assert_eq!(plan.summary(), "2 to create");
    }

    #[test]
    fn matching_state_is_a_noop() {
        let plan = Plan::compute(&stack("10.0.0.0/16"), &applied_state()).unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.summary(), "2 unchanged");
    }

    #[test]
    fn replacement_makes_references_unknown() {
        let plan = Plan::compute(&stack("10.1.0.0/16"), &applied_state()).unwrap();
        let vpc = plan.step("vpc").unwrap();
        assert_eq!(vpc.action, Action::Replace);
        assert_eq!(vpc.changed, vec!["cidr_block"]);
        let sg = plan.step("sg").unwrap();
        assert_eq!(sg.action, Action::Replace);
        assert_eq!(sg.changed, vec!["vpc_id"]);
    }

    #[test]
    fn updatable_keys_update_in_place() {
        let mut state = applied_state();
        state.get_mut("sg").unwrap().inputs.insert("tags".into(), json!({"Name": "old"}));
        let plan = Plan::compute(&stack("10.0.0.0/16"), &state).unwrap();
        assert_eq!(plan.step("sg").unwrap().action, Action::Update);
        assert_eq!(plan.count(Action::Same), 1);
    }

    #[test]
    fn removed_resources_are_deleted_dependents_first() {
        let mut state = applied_state();
        let mut extra = recorded("route", ResourceKind::Route, json!({"route_table_id": "x"}));
        extra.dependencies = vec!["rt".into()];
        state.upsert(recorded("rt", ResourceKind::RouteTable, json!({"vpc_id": "vpc-0001"})));
        state.upsert(extra);

        let plan = Plan::compute(&stack("10.0.0.0/16"), &state).unwrap();
        let deletes: Vec<&str> = plan
            .steps()
            .iter()
            .filter(|s| s.action == Action::Delete)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(deletes, vec!["route", "rt"]);
    }

    #[test]
    fn kind_change_forces_replace() {
        let mut state = applied_state();
        state.get_mut("vpc").unwrap().kind = ResourceKind::Subnet;
        let plan = Plan::compute(&stack("10.0.0.0/16"), &state).unwrap();
        assert_eq!(plan.step("vpc").unwrap().action, Action::Replace);
    }

    #[test]
    fn step_display_lists_changed_keys() {
        let plan = Plan::compute(&stack("10.1.0.0/16"), &applied_state()).unwrap();
        let line = plan.step("vpc").unwrap().to_string();
        assert!(line.starts_with("+- replace"));
        assert!(line.ends_with("[cidr_block]"));
        assert!(line.contains("vpc (aws:ec2/vpc:Vpc)"));
    }

    #[test]
    fn destroy_plan_covers_pending_deletes() {
        let mut state = applied_state();
        state.pending_deletes.push(recorded("vpc", ResourceKind::Vpc, json!({})));
        let plan = Plan::destroy(&state);
        assert_eq!(plan.count(Action::Delete), 3);
    }
}
