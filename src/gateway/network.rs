use crate::gateway::{SUBNET_CIDR, VPC_CIDR, VPN_POOL_CIDR};
use crate::graph::{Prop, Resource, ResourceKind, ResourceRef, Stack};
use anyhow::Result;

pub struct Network {
    pub vpc: ResourceRef,
    pub internet_gateway: ResourceRef,
    pub subnet: ResourceRef,
    pub route_table: ResourceRef,
}

/// VPC, internet gateway, subnet, route table with a default route, and the association
pub fn declare(stack: &mut Stack) -> Result<Network> {
    let vpc = stack.add(
        Resource::new(ResourceKind::Vpc, "vpc")
            .prop("cidr_block", VPC_CIDR)
            .prop("enable_dns_hostnames", true),
    )?;

    let internet_gateway = stack.add(
        Resource::new(ResourceKind::InternetGateway, "igw")
            .prop("vpc_id", vpc.id())
            .prop("tags", Prop::map([("Name", Prop::from("VPN server"))])),
    )?;

    let subnet = stack.add(
        Resource::new(ResourceKind::Subnet, "subnet")
            .prop("vpc_id", vpc.id())
            .prop("cidr_block", SUBNET_CIDR)
            .prop("tags", Prop::map([("Name", Prop::from("VPN server subnet"))])),
    )?;

    let route_table = stack.add(
        Resource::new(ResourceKind::RouteTable, "route-table").prop("vpc_id", vpc.id()),
    )?;

    stack.add(
        Resource::new(ResourceKind::Route, "default-route")
            .prop("route_table_id", route_table.id())
            .prop("destination_cidr_block", "0.0.0.0/0")
            .prop("gateway_id", internet_gateway.id()),
    )?;

    stack.add(
        Resource::new(ResourceKind::RouteTableAssociation, "route-table-association")
            .prop("subnet_id", subnet.id())
            .prop("route_table_id", route_table.id()),
    )?;

    Ok(Network {
        vpc,
        internet_gateway,
        subnet,
        route_table,
    })
}

/// Route the client pool through the instance. Needs the interface id the
/// address association reports, so it can only exist after the association.
pub fn declare_vpn_route(
    stack: &mut Stack,
    network: &Network,
    association: &ResourceRef,
) -> Result<ResourceRef> {
    stack.add(
        Resource::new(ResourceKind::Route, "vpn-route")
            .prop("route_table_id", network.route_table.id())
            .prop("destination_cidr_block", VPN_POOL_CIDR)
            .prop(
                "network_interface_id",
                association.attr("network_interface_id"),
            ),
    )
}
