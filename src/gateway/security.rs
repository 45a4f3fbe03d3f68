use crate::gateway::{DEFAULT_SOURCE_CIDR, VPN_PORT, VPN_PROTOCOL};
use crate::graph::{Prop, Resource, ResourceKind, ResourceRef, Stack};
use anyhow::{Context, Result};
use ipnetwork::IpNetwork;

/// Source range the VPN port is opened to.
///
/// Absent or empty falls back to the unrestricted default. Anything else must
/// parse as CIDR and is returned exactly as given.
pub fn effective_source_cidr(configured: Option<&str>) -> Result<String> {
    match configured {
        None | Some("") => Ok(DEFAULT_SOURCE_CIDR.to_string()),
        Some(value) => {
            value.parse::<IpNetwork>().with_context(|| {
                format!(
                    "Invalid source-cidr '{}': expected CIDR notation such as 203.0.113.0/24",
                    value
                )
            })?;
            Ok(value.to_string())
        }
    }
}

/// The single ingress rule: VPN UDP port from the source range.
///
/// IPv6 ranges go under `ipv6_cidr_blocks`, everything else under `cidr_blocks`.
pub fn ingress_rules(source_cidr: &str) -> Prop {
    let blocks = match source_cidr.parse::<IpNetwork>() {
        Ok(IpNetwork::V6(_)) => "ipv6_cidr_blocks",
        _ => "cidr_blocks",
    };
    Prop::list([Prop::map([
        ("description", Prop::from("VPN")),
        ("from_port", Prop::Int(VPN_PORT.into())),
        ("to_port", Prop::Int(VPN_PORT.into())),
        ("protocol", Prop::from(VPN_PROTOCOL)),
        (blocks, Prop::list([Prop::from(source_cidr)])),
    ])])
}

/// Everything out, IPv4 and IPv6
pub fn egress_rules() -> Prop {
    Prop::list([Prop::map([
        ("from_port", Prop::Int(0)),
        ("to_port", Prop::Int(0)),
        ("protocol", Prop::from("-1")),
        ("cidr_blocks", Prop::list([Prop::from("0.0.0.0/0")])),
        ("ipv6_cidr_blocks", Prop::list([Prop::from("::/0")])),
    ])])
}

pub fn declare(stack: &mut Stack, vpc: &ResourceRef, source_cidr: &str) -> Result<ResourceRef> {
    stack.add(
        Resource::new(ResourceKind::SecurityGroup, "security-group")
            .prop("description", "VPN server security group")
            .prop("vpc_id", vpc.id())
            .prop("ingress", ingress_rules(source_cidr))
            .prop("egress", egress_rules())
            .prop("tags", Prop::map([("Name", Prop::from("SG for VPN server"))])),
    )
}
