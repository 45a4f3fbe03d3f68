use crate::gateway::identity::Identity;
use crate::gateway::network::Network;
use crate::gateway::INSTANCE_TYPE;
use crate::graph::{Output, Prop, Resource, ResourceKind, ResourceRef, Stack};
use crate::provider::ImageQuery;
use anyhow::Result;

/// Newest Amazon Linux 2 HVM image published by Amazon
pub fn image_query() -> ImageQuery {
    ImageQuery {
        most_recent: true,
        name_pattern: "amzn2-ami-kernel-*".to_string(),
        virtualization_type: "hvm".to_string(),
        owners: vec!["amazon".to_string()],
    }
}

/// Static public address, allocated before the instance so the boot script can embed it
pub fn declare_address(stack: &mut Stack) -> Result<ResourceRef> {
    stack.add(Resource::new(ResourceKind::Eip, "elastic-ip").prop("domain", "vpc"))
}

pub struct Server {
    pub instance: ResourceRef,
    pub association: ResourceRef,
}

pub fn declare_server(
    stack: &mut Stack,
    network: &Network,
    security_group: &ResourceRef,
    identity: &Identity,
    address: &ResourceRef,
    image_id: &str,
    user_data: Output,
) -> Result<Server> {
    let instance = stack.add(
        Resource::new(ResourceKind::Instance, "vpn-server")
            .prop("ami", image_id)
            .prop("instance_type", INSTANCE_TYPE)
            .prop("tags", Prop::map([("Name", Prop::from("VPN server"))]))
            .prop("subnet_id", network.subnet.id())
            .prop("associate_public_ip_address", true)
            .prop("user_data", user_data)
            .prop("user_data_replace_on_change", true)
            .prop("iam_instance_profile", identity.instance_profile.attr("name"))
            // the instance NATs for the client pool
            .prop("source_dest_check", false)
            .prop(
                "vpc_security_group_ids",
                Prop::list([Prop::from(security_group.id())]),
            ),
    )?;

    let association = stack.add(
        Resource::new(ResourceKind::EipAssociation, "eip-association")
            .prop("instance_id", instance.id())
            .prop("allocation_id", address.id()),
    )?;

    Ok(Server {
        instance,
        association,
    })
}
