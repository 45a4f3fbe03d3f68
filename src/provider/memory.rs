// Simulated cloud for previews, local runs, and tests.
//
// Behaves like the real thing where it matters to the gateway graph: ids are
// allocated per kind, references to other resources must point at live ones,
// deleting something still referenced fails, and non-empty buckets only go
// away with force_destroy.

use crate::engine::state::write_replacing;
use crate::graph::ResourceKind;
use crate::provider::{
    input_bool, input_opt_str, input_str, input_str_list, Attributes, ImageQuery, Inputs,
    Provider, Provisioned,
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

const ACCOUNT_ID: &str = "123456789012";

/// Input keys that hold the id of another live resource
const REFERENCE_KEYS: [&str; 7] = [
    "vpc_id",
    "subnet_id",
    "route_table_id",
    "gateway_id",
    "network_interface_id",
    "instance_id",
    "allocation_id",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: ResourceKind,
    pub name: String,
    pub inputs: Inputs,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub virtualization_type: String,
    pub creation_date: DateTime<Utc>,
}

/// Calls made against the simulated cloud, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create(ResourceKind, String),
    Update(ResourceKind, String),
    Delete(ResourceKind, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryProvider {
    region: String,
    next_id: u64,
    resources: BTreeMap<String, CloudResource>,
    buckets: BTreeMap<String, BTreeMap<String, String>>,
    images: Vec<MachineImage>,
    simulate_boot: bool,
    #[serde(skip)]
    fail_on: Option<ResourceKind>,
    #[serde(skip)]
    operations: Vec<Operation>,
}

impl MemoryProvider {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            next_id: 1,
            resources: BTreeMap::new(),
            buckets: BTreeMap::new(),
            images: default_images(),
            simulate_boot: true,
            fail_on: None,
            operations: Vec::new(),
        }
    }

    /// Run the upload step of instance boot scripts on launch
    pub fn with_boot_simulation(mut self, enabled: bool) -> Self {
        self.simulate_boot = enabled;
        self
    }

    /// Make every create of `kind` fail
    pub fn fail_on(mut self, kind: ResourceKind) -> Self {
        self.fail_on = Some(kind);
        self
    }

    pub fn with_images(mut self, images: Vec<MachineImage>) -> Self {
        self.images = images;
        self
    }

    pub fn load(path: &Path, region: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(region));
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read simulated cloud: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse simulated cloud: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize simulated cloud")?;
        write_replacing(path, &content)
            .with_context(|| format!("Failed to write simulated cloud: {}", path.display()))
    }

    pub fn resources_of(&self, kind: ResourceKind) -> Vec<&CloudResource> {
        self.resources.values().filter(|r| r.kind == kind).collect()
    }

    pub fn resource(&self, id: &str) -> Option<&CloudResource> {
        self.resources.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Object keys in a bucket, sorted
    pub fn objects(&self, bucket: &str) -> Option<Vec<&str>> {
        self.buckets
            .get(bucket)
            .map(|objects| objects.keys().map(|k| k.as_str()).collect())
    }

    pub fn put_object(&mut self, bucket: &str, key: &str, body: &str) -> Result<()> {
        let objects = self
            .buckets
            .get_mut(bucket)
            .with_context(|| format!("NoSuchBucket: {}", bucket))?;
        objects.insert(key.to_string(), body.to_string());
        Ok(())
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    fn allocate(&mut self, prefix: &str) -> String {
        let id = format!("{}-{:017x}", prefix, self.next_id);
        self.next_id += 1;
        id
    }

    fn count_of(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind == kind).count()
    }

    fn is_live_reference(&self, value: &str) -> bool {
        self.resources.contains_key(value)
            || self.resources.values().any(|r| {
                r.kind == ResourceKind::Instance
                    && r.attributes.get("primary_network_interface_id").map(|s| s.as_str())
                        == Some(value)
            })
    }

    fn check_references(&self, kind: ResourceKind, inputs: &Inputs) -> Result<()> {
        for key in REFERENCE_KEYS {
            if let Some(value) = input_opt_str(inputs, key) {
                if !self.is_live_reference(value) {
                    anyhow::bail!("{}: {} '{}' does not exist", kind, key, value);
                }
            }
        }
        for group in input_str_list(inputs, "vpc_security_group_ids") {
            if !self.resources.contains_key(group) {
                anyhow::bail!("{}: security group '{}' does not exist", kind, group);
            }
        }
        for arn in input_str_list(inputs, "managed_policy_arns") {
            let known = arn.starts_with("arn:aws:iam::aws:policy/")
                || self.resources.values().any(|r| {
                    r.kind == ResourceKind::IamPolicy
                        && r.attributes.get("arn").map(|s| s.as_str()) == Some(arn)
                });
            if !known {
                anyhow::bail!("{}: policy '{}' does not exist", kind, arn);
            }
        }
        if let Some(role) = input_opt_str(inputs, "role") {
            if self.find_named(ResourceKind::IamRole, role).is_none() {
                anyhow::bail!("{}: role '{}' does not exist", kind, role);
            }
        }
        if let Some(profile) = input_opt_str(inputs, "iam_instance_profile") {
            if self.find_named(ResourceKind::InstanceProfile, profile).is_none() {
                anyhow::bail!("{}: instance profile '{}' does not exist", kind, profile);
            }
        }
        Ok(())
    }

    fn find_named(&self, kind: ResourceKind, name: &str) -> Option<&CloudResource> {
        self.resources
            .values()
            .find(|r| r.kind == kind && r.name == name)
    }

    fn private_ip_in(&self, subnet_id: &str) -> Result<String> {
        let subnet = self
            .resources
            .get(subnet_id)
            .with_context(|| format!("Subnet '{}' does not exist", subnet_id))?;
        let cidr: Ipv4Network = input_str(&subnet.inputs, "cidr_block")?
            .parse()
            .context("Subnet has an invalid cidr_block")?;
        // first four addresses of every subnet are reserved
        let offset = 4 + self.count_of(ResourceKind::Instance) as u32;
        let addr = Ipv4Addr::from(u32::from(cidr.network()) + offset);
        if !cidr.contains(addr) {
            anyhow::bail!("InsufficientFreeAddressesInSubnet: {}", subnet_id);
        }
        Ok(addr.to_string())
    }

    fn provision(&mut self, kind: ResourceKind, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let provisioned = match kind {
            ResourceKind::Vpc => Provisioned::new(self.allocate("vpc")),
            ResourceKind::InternetGateway => Provisioned::new(self.allocate("igw")),
            ResourceKind::Subnet => Provisioned::new(self.allocate("subnet")),
            ResourceKind::RouteTable => Provisioned::new(self.allocate("rtb")),
            ResourceKind::Route => {
                let table = input_str(inputs, "route_table_id")?;
                let destination = input_str(inputs, "destination_cidr_block")?;
                let duplicate = self.resources.values().any(|r| {
                    r.kind == ResourceKind::Route
                        && input_opt_str(&r.inputs, "route_table_id") == Some(table)
                        && input_opt_str(&r.inputs, "destination_cidr_block") == Some(destination)
                });
                if duplicate {
                    anyhow::bail!("RouteAlreadyExists: {} in {}", destination, table);
                }
                Provisioned::new(format!("{}_{}", table, destination))
            }
            ResourceKind::RouteTableAssociation => Provisioned::new(self.allocate("rtbassoc")),
            ResourceKind::SecurityGroup => Provisioned::new(self.allocate("sg")),
            ResourceKind::Bucket => {
                self.buckets.insert(name.to_string(), BTreeMap::new());
                Provisioned::new(name)
                    .with("bucket", name)
                    .with("arn", format!("arn:aws:s3:::{}", name))
                    .with("region", self.region.clone())
            }
            ResourceKind::IamPolicy => {
                let path = input_opt_str(inputs, "path").unwrap_or("/");
                let arn = format!("arn:aws:iam::{}:policy{}{}", ACCOUNT_ID, path, name);
                Provisioned::new(arn.clone()).with("arn", arn)
            }
            ResourceKind::IamRole => Provisioned::new(name)
                .with("name", name)
                .with("arn", format!("arn:aws:iam::{}:role/{}", ACCOUNT_ID, name)),
            ResourceKind::InstanceProfile => Provisioned::new(name).with("name", name).with(
                "arn",
                format!("arn:aws:iam::{}:instance-profile/{}", ACCOUNT_ID, name),
            ),
            ResourceKind::Eip => {
                let host = self.count_of(ResourceKind::Eip) % 254 + 1;
                Provisioned::new(self.allocate("eipalloc"))
                    .with("public_ip", format!("198.51.100.{}", host))
            }
            ResourceKind::Instance => {
                let private_ip = self.private_ip_in(input_str(inputs, "subnet_id")?)?;
                let eni = self.allocate("eni");
                Provisioned::new(self.allocate("i"))
                    .with("primary_network_interface_id", eni)
                    .with("private_ip", private_ip)
            }
            ResourceKind::EipAssociation => {
                let instance_id = input_str(inputs, "instance_id")?;
                let eni = self
                    .resources
                    .get(instance_id)
                    .and_then(|i| i.attributes.get("primary_network_interface_id"))
                    .cloned()
                    .with_context(|| format!("Instance '{}' has no network interface", instance_id))?;
                Provisioned::new(self.allocate("eipassoc")).with("network_interface_id", eni)
            }
        };
        Ok(provisioned)
    }

    /// Run the credential upload lines of a boot script
    fn simulate_boot(&mut self, instance_id: &str, user_data: &str) {
        for line in user_data.lines() {
            let Some(rest) = line.strip_prefix("aws s3 cp ") else {
                continue;
            };
            let mut words = rest.split_whitespace();
            let (Some(source), Some(target)) = (words.next(), words.next()) else {
                continue;
            };
            let Some(target) = target.strip_prefix("s3://") else {
                continue;
            };
            let (bucket, prefix) = target.split_once('/').unwrap_or((target, ""));
            let file_name = source.rsplit('/').next().unwrap_or(source);
            let key = format!("{}{}", prefix, file_name);
            let body = format!("{} from {}", source, instance_id);
            // the script has no error handling, a failed copy just moves on
            if let Err(e) = self.put_object(bucket, &key, &body) {
                log::warn!("Boot script on {} failed to upload {}: {}", instance_id, key, e);
            }
        }
    }

    /// Some other live resource whose inputs mention `handle`
    fn referencing(&self, handle: &str, except: &str) -> Option<(&String, &CloudResource)> {
        self.resources
            .iter()
            .filter(|(id, _)| id.as_str() != except)
            .find(|(_, r)| r.inputs.values().any(|v| mentions(v, handle)))
    }
}

fn mentions(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Array(items) => items.iter().any(|v| mentions(v, id)),
        Value::Object(map) => map.values().any(|v| mentions(v, id)),
        _ => false,
    }
}

impl Provider for MemoryProvider {
    fn lookup_image(&mut self, query: &ImageQuery) -> Result<String> {
        let pattern = glob::Pattern::new(&query.name_pattern)
            .with_context(|| format!("Invalid image name pattern: {}", query.name_pattern))?;
        let mut matches: Vec<&MachineImage> = self
            .images
            .iter()
            .filter(|image| query.owners.iter().any(|o| *o == image.owner))
            .filter(|image| image.virtualization_type == query.virtualization_type)
            .filter(|image| pattern.matches(&image.name))
            .collect();

        if matches.is_empty() {
            anyhow::bail!(
                "No machine image matches '{}' ({}) from {}",
                query.name_pattern,
                query.virtualization_type,
                query.owners.join(", ")
            );
        }
        if !query.most_recent && matches.len() > 1 {
            anyhow::bail!(
                "Image query returned {} results, narrow the filters or set most_recent",
                matches.len()
            );
        }
        matches.sort_by_key(|image| image.creation_date);
        let newest = matches.last().map(|image| image.id.clone());
        newest.context("No machine image found")
    }

    fn create(&mut self, kind: ResourceKind, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        if self.fail_on == Some(kind) {
            anyhow::bail!("Simulated failure creating {} '{}'", kind, name);
        }
        self.check_references(kind, inputs)?;

        let provisioned = self.provision(kind, name, inputs)?;
        log::debug!("memory: created {} {}", kind, provisioned.id);
        self.resources.insert(
            provisioned.id.clone(),
            CloudResource {
                kind,
                name: name.to_string(),
                inputs: inputs.clone(),
                attributes: provisioned.attributes.clone(),
            },
        );
        self.operations
            .push(Operation::Create(kind, provisioned.id.clone()));

        if kind == ResourceKind::Instance && self.simulate_boot {
            if let Some(user_data) = input_opt_str(inputs, "user_data") {
                self.simulate_boot(&provisioned.id, user_data);
            }
        }

        Ok(provisioned)
    }

    fn update(
        &mut self,
        kind: ResourceKind,
        current: &Provisioned,
        _old: &Inputs,
        new: &Inputs,
    ) -> Result<()> {
        self.check_references(kind, new)?;
        let record = self
            .resources
            .get_mut(&current.id)
            .with_context(|| format!("{} '{}' does not exist", kind, current.id))?;
        record.inputs = new.clone();
        self.operations.push(Operation::Update(kind, current.id.clone()));
        Ok(())
    }

    fn delete(&mut self, kind: ResourceKind, current: &Provisioned, inputs: &Inputs) -> Result<()> {
        if !self.resources.contains_key(&current.id) {
            anyhow::bail!("{} '{}' does not exist", kind, current.id);
        }

        let mut handles = vec![current.id.clone()];
        if let Some(eni) = current.attribute("primary_network_interface_id") {
            handles.push(eni.to_string());
        }
        if let Some(arn) = current.attribute("arn") {
            handles.push(arn.to_string());
        }
        if let Some(name) = current.attribute("name") {
            handles.push(name.to_string());
        }
        for handle in &handles {
            if let Some((user_id, user)) = self.referencing(handle, &current.id) {
                anyhow::bail!(
                    "DependencyViolation: {} '{}' is still used by {} '{}'",
                    kind,
                    current.id,
                    user.kind,
                    user_id
                );
            }
        }

        if kind == ResourceKind::Bucket {
            let has_objects = self
                .buckets
                .get(&current.id)
                .map(|objects| !objects.is_empty())
                .unwrap_or(false);
            if has_objects && input_bool(inputs, "force_destroy") != Some(true) {
                anyhow::bail!("BucketNotEmpty: {}", current.id);
            }
            self.buckets.remove(&current.id);
        }

        self.resources.remove(&current.id);
        log::debug!("memory: deleted {} {}", kind, current.id);
        self.operations.push(Operation::Delete(kind, current.id.clone()));
        Ok(())
    }
}

fn default_images() -> Vec<MachineImage> {
    let image = |id: &str, name: &str, owner: &str, virt: &str, day: u32| MachineImage {
        id: id.to_string(),
        name: name.to_string(),
        owner: owner.to_string(),
        virtualization_type: virt.to_string(),
        creation_date: Utc
            .with_ymd_and_hms(2023, 1, day, 12, 0, 0)
            .single()
            .unwrap_or_default(),
    };
    vec![
        image(
            "ami-0a1b2c3d4e5f60001",
            "amzn2-ami-kernel-5.10-hvm-2.0.20230104.0-x86_64-gp2",
            "amazon",
            "hvm",
            4,
        ),
        image(
            "ami-0a1b2c3d4e5f60002",
            "amzn2-ami-kernel-5.10-hvm-2.0.20230119.1-x86_64-gp2",
            "amazon",
            "hvm",
            19,
        ),
        image(
            "ami-0a1b2c3d4e5f60003",
            "amzn2-ami-minimal-hvm-2.0.20230125.0-x86_64-ebs",
            "amazon",
            "hvm",
            25,
        ),
        image(
            "ami-0a1b2c3d4e5f60004",
            "amzn2-ami-kernel-5.10-hvm-2.0.20230126.0-x86_64-gp2",
            "aws-marketplace",
            "hvm",
            26,
        ),
        image(
            "ami-0a1b2c3d4e5f60005",
            "amzn2-ami-kernel-5.10-pv-2.0.20230127.0-x86_64-gp2",
            "amazon",
            "paravirtual",
            27,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::compute::image_query;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn image_lookup_picks_newest_matching() {
        let mut cloud = MemoryProvider::new("us-east-1");
        assert_eq!(
            cloud.lookup_image(&image_query()).unwrap(),
            "ami-0a1b2c3d4e5f60002"
        );
    }

    #[test]
    fn image_lookup_without_most_recent_requires_single_match() {
        let mut cloud = MemoryProvider::new("us-east-1");
        let mut query = image_query();
        query.most_recent = false;
        assert!(cloud.lookup_image(&query).is_err());
        query.name_pattern = "nothing-*".to_string();
        assert!(cloud.lookup_image(&query).is_err());
    }

    #[test]
    fn create_rejects_dangling_references() {
        let mut cloud = MemoryProvider::new("us-east-1");
        let err = cloud
            .create(
                ResourceKind::Subnet,
                "subnet-abc",
                &inputs(&[("vpc_id", json!("vpc-missing"))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn delete_in_use_resource_fails() {
        let mut cloud = MemoryProvider::new("us-east-1");
        let vpc_inputs = inputs(&[("cidr_block", json!("10.0.0.0/16"))]);
        let vpc = cloud.create(ResourceKind::Vpc, "vpc-1", &vpc_inputs).unwrap();
        cloud
            .create(
                ResourceKind::Subnet,
                "subnet-1",
                &inputs(&[("vpc_id", json!(vpc.id)), ("cidr_block", json!("10.0.0.0/24"))]),
            )
            .unwrap();
        let err = cloud.delete(ResourceKind::Vpc, &vpc, &vpc_inputs).unwrap_err();
        assert!(err.to_string().contains("DependencyViolation"));
    }

    #[test]
    fn non_empty_bucket_needs_force_destroy() {
        let mut cloud = MemoryProvider::new("us-east-1");
        let keep = inputs(&[("force_destroy", json!(false))]);
        let bucket = cloud.create(ResourceKind::Bucket, "bucket-1", &keep).unwrap();
        assert_eq!(bucket.attribute("arn"), Some("arn:aws:s3:::bucket-1"));
        cloud.put_object("bucket-1", "client.ovpn", "x").unwrap();

        assert!(cloud.delete(ResourceKind::Bucket, &bucket, &keep).is_err());
        let force = inputs(&[("force_destroy", json!(true))]);
        cloud.delete(ResourceKind::Bucket, &bucket, &force).unwrap();
        assert!(cloud.objects("bucket-1").is_none());
    }

    #[test]
    fn boot_simulation_uploads_copied_files() {
        let mut cloud = MemoryProvider::new("us-east-1");
        cloud
            .create(ResourceKind::Bucket, "creds", &Inputs::new())
            .unwrap();
        cloud.simulate_boot(
            "i-1",
            "echo hi\naws s3 cp /tmp/client.ovpn s3://creds/ --region us-east-1\naws s3 cp /x/ca.crt s3://missing/ --region us-east-1\n",
        );
        assert_eq!(cloud.objects("creds").unwrap(), vec!["client.ovpn"]);
    }

    #[test]
    fn injected_failure_surfaces() {
        let mut cloud = MemoryProvider::new("us-east-1").fail_on(ResourceKind::Bucket);
        assert!(cloud
            .create(ResourceKind::Bucket, "b", &Inputs::new())
            .is_err());
        assert!(cloud.is_empty());
    }
}
