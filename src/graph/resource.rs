use crate::graph::output::Output;
use crate::graph::prop::Prop;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Cloud resource types the gateway graph is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    InternetGateway,
    Subnet,
    RouteTable,
    Route,
    RouteTableAssociation,
    SecurityGroup,
    Bucket,
    IamPolicy,
    IamRole,
    InstanceProfile,
    Eip,
    Instance,
    EipAssociation,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Vpc,
        ResourceKind::InternetGateway,
        ResourceKind::Subnet,
        ResourceKind::RouteTable,
        ResourceKind::Route,
        ResourceKind::RouteTableAssociation,
        ResourceKind::SecurityGroup,
        ResourceKind::Bucket,
        ResourceKind::IamPolicy,
        ResourceKind::IamRole,
        ResourceKind::InstanceProfile,
        ResourceKind::Eip,
        ResourceKind::Instance,
        ResourceKind::EipAssociation,
    ];

    pub fn type_token(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "aws:ec2/vpc:Vpc",
            ResourceKind::InternetGateway => "aws:ec2/internetGateway:InternetGateway",
            ResourceKind::Subnet => "aws:ec2/subnet:Subnet",
            ResourceKind::RouteTable => "aws:ec2/routeTable:RouteTable",
            ResourceKind::Route => "aws:ec2/route:Route",
            ResourceKind::RouteTableAssociation => {
                "aws:ec2/routeTableAssociation:RouteTableAssociation"
            }
            ResourceKind::SecurityGroup => "aws:ec2/securityGroup:SecurityGroup",
            ResourceKind::Bucket => "aws:s3/bucket:Bucket",
            ResourceKind::IamPolicy => "aws:iam/policy:Policy",
            ResourceKind::IamRole => "aws:iam/role:Role",
            ResourceKind::InstanceProfile => "aws:iam/instanceProfile:InstanceProfile",
            ResourceKind::Eip => "aws:ec2/eip:Eip",
            ResourceKind::Instance => "aws:ec2/instance:Instance",
            ResourceKind::EipAssociation => "aws:ec2/eipAssociation:EipAssociation",
        }
    }

    /// Attributes a created resource of this kind reports back
    pub fn attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Bucket => &["id", "bucket", "arn", "region"],
            ResourceKind::IamPolicy => &["id", "arn"],
            ResourceKind::IamRole | ResourceKind::InstanceProfile => &["id", "name", "arn"],
            ResourceKind::Eip => &["id", "public_ip"],
            ResourceKind::Instance => &["id", "primary_network_interface_id", "private_ip"],
            ResourceKind::EipAssociation => &["id", "network_interface_id"],
            _ => &["id"],
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes().contains(&attribute)
    }

    /// Input keys that can change without replacing the resource
    pub fn updatable_keys(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Vpc => &["tags", "enable_dns_hostnames"],
            ResourceKind::InternetGateway
            | ResourceKind::Subnet
            | ResourceKind::RouteTable
            | ResourceKind::Eip => &["tags"],
            ResourceKind::Route => &["gateway_id", "network_interface_id"],
            ResourceKind::SecurityGroup => &["ingress", "egress", "tags"],
            ResourceKind::Bucket => &["force_destroy", "tags"],
            ResourceKind::IamPolicy => &["policy"],
            ResourceKind::IamRole => &["managed_policy_arns"],
            ResourceKind::Instance => &["source_dest_check", "tags", "user_data_replace_on_change"],
            ResourceKind::RouteTableAssociation
            | ResourceKind::InstanceProfile
            | ResourceKind::EipAssociation => &[],
        }
    }

    /// Whether a change to `key` can be applied in place, given the new inputs
    pub fn is_updatable(&self, key: &str, inputs: &BTreeMap<String, serde_json::Value>) -> bool {
        if *self == ResourceKind::Instance && key == "user_data" {
            return inputs
                .get("user_data_replace_on_change")
                .and_then(|v| v.as_bool())
                == Some(false);
        }
        self.updatable_keys().contains(&key)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_token())
    }
}

/// A declared resource: logical name, kind, inputs, and explicit ordering edges
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub props: BTreeMap<String, Prop>,
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            props: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn prop(mut self, key: &str, value: impl Into<Prop>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Explicit and implicit (output-reference) dependencies
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self.depends_on.iter().cloned().collect();
        for prop in self.props.values() {
            prop.collect_dependencies(&mut deps);
        }
        deps
    }
}

/// Handle to a resource already added to a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    pub kind: ResourceKind,
}

impl ResourceRef {
    pub fn id(&self) -> Output {
        self.attr("id")
    }

    pub fn attr(&self, attribute: &str) -> Output {
        Output::attr(self.name.clone(), attribute)
    }
}
