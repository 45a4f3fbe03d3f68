use crate::graph::output::Output;
use crate::graph::resource::{Resource, ResourceKind, ResourceRef};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A named deployment's resource graph
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    exports: BTreeMap<String, Output>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            index: HashMap::new(),
            exports: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a resource. Everything it references must already be in the stack.
    pub fn add(&mut self, resource: Resource) -> Result<ResourceRef> {
        if self.index.contains_key(&resource.name) {
            anyhow::bail!("Duplicate resource name '{}'", resource.name);
        }

        for dep in &resource.depends_on {
            if !self.index.contains_key(dep) {
                anyhow::bail!(
                    "Resource '{}' depends on unknown resource '{}'",
                    resource.name,
                    dep
                );
            }
        }

        for prop in resource.props.values() {
            for output in prop.outputs() {
                self.check_references(&resource.name, output)?;
            }
        }

        let handle = ResourceRef {
            name: resource.name.clone(),
            kind: resource.kind,
        };
        log::debug!("Declared {} ({})", resource.name, resource.kind);
        self.index.insert(resource.name.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(handle)
    }

    fn check_references(&self, owner: &str, output: &Output) -> Result<()> {
        for (target, attribute) in output.references() {
            let Some(&idx) = self.index.get(target) else {
                anyhow::bail!(
                    "Resource '{}' references unknown resource '{}'",
                    owner,
                    target
                );
            };
            let kind = self.resources[idx].kind;
            if !kind.has_attribute(attribute) {
                anyhow::bail!(
                    "Resource '{}' references '{}.{}', but {} has no attribute '{}'",
                    owner,
                    target,
                    attribute,
                    kind,
                    attribute
                );
            }
        }
        Ok(())
    }

    pub fn export(&mut self, name: &str, value: Output) -> Result<()> {
        self.check_references(&format!("export {}", name), &value)?;
        self.exports.insert(name.to_string(), value);
        Ok(())
    }

    pub fn exports(&self) -> &BTreeMap<String, Output> {
        &self.exports
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|&idx| &self.resources[idx])
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    /// Topological order; independent resources keep declaration order
    pub fn order(&self) -> Result<Vec<&Resource>> {
        let mut remaining: Vec<(usize, BTreeSet<String>)> = self
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.dependencies()))
            .collect();
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut ordered = Vec::with_capacity(self.resources.len());

        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .position(|(_, deps)| deps.iter().all(|d| done.contains(d)));
            let Some(pos) = ready else {
                let stuck: Vec<&str> = remaining
                    .iter()
                    .map(|(i, _)| self.resources[*i].name.as_str())
                    .collect();
                anyhow::bail!("Dependency cycle between: {}", stuck.join(", "));
            };
            let (idx, _) = remaining.remove(pos);
            done.insert(self.resources[idx].name.clone());
            ordered.push(&self.resources[idx]);
        }

        Ok(ordered)
    }

    /// Resources that (transitively) depend on `name`
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for res in &self.resources {
                if res.dependencies().contains(&current) && found.insert(res.name.clone()) {
                    frontier.push(res.name.clone());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_stack() -> Stack {
        let mut stack = Stack::new("test");
        let vpc = stack
            .add(Resource::new(ResourceKind::Vpc, "vpc").prop("cidr_block", "10.0.0.0/16"))
            .unwrap();
        let rt = stack
            .add(Resource::new(ResourceKind::RouteTable, "rt").prop("vpc_id", vpc.id()))
            .unwrap();
        stack
            .add(Resource::new(ResourceKind::Subnet, "subnet").prop("vpc_id", vpc.id()))
            .unwrap();
        stack
            .add(Resource::new(ResourceKind::Route, "route").prop("route_table_id", rt.id()))
            .unwrap();
        stack
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut stack = small_stack();
        let err = stack
            .add(Resource::new(ResourceKind::Vpc, "vpc"))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn rejects_unknown_references() {
        let mut stack = Stack::new("test");
        let err = stack
            .add(Resource::new(ResourceKind::Subnet, "subnet").prop("vpc_id", Output::attr("vpc", "id")))
            .unwrap_err();
        assert!(err.to_string().contains("unknown resource 'vpc'"));
    }

    #[test]
    fn rejects_attributes_the_kind_does_not_export() {
        let mut stack = small_stack();
        let err = stack
            .add(
                Resource::new(ResourceKind::Route, "bad")
                    .prop("network_interface_id", Output::attr("vpc", "arn")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("no attribute 'arn'"));
    }

    #[test]
    fn order_respects_dependencies() {
        let stack = small_stack();
        let names: Vec<&str> = stack.order().unwrap().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["vpc", "rt", "subnet", "route"]);
    }

    #[test]
    fn dependents_are_transitive() {
        let stack = small_stack();
        let deps: Vec<String> = stack.dependents_of("vpc").into_iter().collect();
        assert_eq!(deps, vec!["route", "rt", "subnet"]);
    }
}
