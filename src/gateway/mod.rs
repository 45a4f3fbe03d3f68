// Gateway stack - the resource graph for a single-node OpenVPN server
pub mod bootstrap;
pub mod compute;
pub mod identity;
pub mod network;
pub mod security;

use crate::graph::{Output, Stack};
use anyhow::Result;

pub const VPC_CIDR: &str = "10.0.0.0/16";
pub const SUBNET_CIDR: &str = "10.0.0.0/24";
pub const VPN_POOL_CIDR: &str = "192.168.100.0/24";
pub const VPN_PORT: u16 = 1194;
pub const VPN_PROTOCOL: &str = "udp";
pub const DEFAULT_SOURCE_CIDR: &str = "0.0.0.0/0";
pub const INSTANCE_TYPE: &str = "t3.nano";
pub const COMPUTE_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";
pub const REMOTE_MANAGEMENT_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

/// Resolved stack settings the graph is built from
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub source_cidr: String,
    pub region: String,
    pub strict_boot_script: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            source_cidr: DEFAULT_SOURCE_CIDR.to_string(),
            region: "us-east-1".to_string(),
            strict_boot_script: false,
        }
    }
}

/// Declare every gateway resource, leaves first
///
/// `image_id` is the result of the machine image lookup, which has to happen
/// against the provider before the graph can be built.
pub fn build_stack(stack_name: &str, settings: &GatewaySettings, image_id: &str) -> Result<Stack> {
    let mut stack = Stack::new(stack_name);

    let network = network::declare(&mut stack)?;
    let security_group = security::declare(&mut stack, &network.vpc, &settings.source_cidr)?;
    let identity = identity::declare(&mut stack)?;
    let address = compute::declare_address(&mut stack)?;

    let script = bootstrap::BootScript::new(
        address.attr("public_ip"),
        identity.bucket.attr("bucket"),
        identity.bucket.attr("region"),
        settings.strict_boot_script,
    )?;

    let server = compute::declare_server(
        &mut stack,
        &network,
        &security_group,
        &identity,
        &address,
        image_id,
        script.render(),
    )?;
    network::declare_vpn_route(&mut stack, &network, &server.association)?;

    stack.export("public_ip", address.attr("public_ip"))?;
    stack.export("bucket_name", identity.bucket.attr("bucket"))?;
    stack.export("instance_id", server.instance.id())?;
    stack.export(
        "client_config_uri",
        Output::concat([
            Output::known("s3://"),
            identity.bucket.attr("bucket"),
            Output::known("/client.ovpn"),
        ]),
    )?;

    Ok(stack)
}

/// The boot script as declared in `stack`, if it has a server
pub fn boot_script(stack: &Stack) -> Option<&Output> {
    stack
        .get("vpn-server")
        .and_then(|server| server.props.get("user_data"))
        .and_then(|prop| match prop {
            crate::graph::Prop::Str(output) => Some(output),
            _ => None,
        })
}
