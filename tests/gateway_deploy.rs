use gateway::engine::{Engine, StateStore};
use gateway::gateway::{build_stack, compute, GatewaySettings};
use gateway::graph::{ResourceKind, Stack};
use gateway::provider::{CloudResource, MemoryProvider, Provider};
use serde_json::{json, Value};
use tempfile::TempDir;

fn settings(source_cidr: &str) -> GatewaySettings {
    GatewaySettings {
        source_cidr: source_cidr.to_string(),
        ..GatewaySettings::default()
    }
}

fn declare(cloud: &mut MemoryProvider, settings: &GatewaySettings) -> Stack {
    let image = cloud.lookup_image(&compute::image_query()).unwrap();
    build_stack("dev", settings, &image).unwrap()
}

fn deploy(dir: &TempDir, cloud: &mut MemoryProvider, settings: &GatewaySettings) -> Stack {
    let stack = declare(cloud, settings);
    Engine::new(cloud, StateStore::new(dir.path()))
        .up(&stack)
        .unwrap();
    stack
}

fn only(cloud: &MemoryProvider, kind: ResourceKind) -> &CloudResource {
    let found = cloud.resources_of(kind);
    assert_eq!(found.len(), 1, "expected exactly one {}", kind);
    found[0]
}

fn id_of<'a>(cloud: &'a MemoryProvider, kind: ResourceKind) -> &'a str {
    only(cloud, kind).attributes["id"].as_str()
}

#[test]
fn default_deploy_opens_vpn_port_to_everyone_and_publishes_credentials() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &GatewaySettings::default());

    let sg = only(&cloud, ResourceKind::SecurityGroup);
    assert_eq!(
        sg.inputs["ingress"],
        json!([{
            "cidr_blocks": ["0.0.0.0/0"],
            "description": "VPN",
            "from_port": 1194,
            "protocol": "udp",
            "to_port": 1194
        }])
    );

    let instance = only(&cloud, ResourceKind::Instance);
    assert_eq!(
        instance.inputs["subnet_id"],
        json!(id_of(&cloud, ResourceKind::Subnet))
    );
    assert_eq!(instance.inputs["instance_type"], json!("t3.nano"));
    assert_eq!(instance.inputs["source_dest_check"], json!(false));
    assert_eq!(
        instance.inputs["ami"],
        json!("ami-0a1b2c3d4e5f60002"),
        "newest Amazon-owned HVM Amazon Linux 2 image"
    );

    let bucket = id_of(&cloud, ResourceKind::Bucket);
    assert_eq!(
        cloud.objects(bucket).unwrap(),
        vec!["ca.crt", "client.crt", "client.key", "client.ovpn"]
    );
}

#[test]
fn restricted_source_range_is_the_only_ingress_range() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &settings("203.0.113.0/24"));

    let ingress = &only(&cloud, ResourceKind::SecurityGroup).inputs["ingress"];
    let rules = ingress.as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["cidr_blocks"], json!(["203.0.113.0/24"]));
}

#[test]
fn boot_script_embeds_address_bucket_and_region() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("eu-west-1");
    let stack = declare(&mut cloud, &GatewaySettings {
        region: "eu-west-1".to_string(),
        ..GatewaySettings::default()
    });
    Engine::new(&mut cloud, StateStore::new(dir.path()))
        .up(&stack)
        .unwrap();

    let public_ip = only(&cloud, ResourceKind::Eip).attributes["public_ip"].clone();
    let bucket = id_of(&cloud, ResourceKind::Bucket).to_string();
    let instance = only(&cloud, ResourceKind::Instance);
    let user_data = instance.inputs["user_data"].as_str().unwrap();

    assert!(user_data.starts_with("#!/bin/bash"));
    assert!(user_data.contains(&format!("remote {} 1194", public_ip)));
    let uploads: Vec<&str> = user_data
        .lines()
        .filter(|l| l.starts_with("aws s3 cp "))
        .collect();
    assert_eq!(uploads.len(), 4);
    for line in uploads {
        assert!(line.contains(&format!("s3://{}/", bucket)), "{}", line);
        assert!(line.ends_with("--region eu-west-1"), "{}", line);
    }
}

#[test]
fn access_policy_grants_writes_under_this_bucket_only() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &GatewaySettings::default());

    let bucket_arn = only(&cloud, ResourceKind::Bucket).attributes["arn"].clone();
    let policy = only(&cloud, ResourceKind::IamPolicy);
    let document: Value = serde_json::from_str(policy.inputs["policy"].as_str().unwrap()).unwrap();
    assert_eq!(
        document["Statement"][0]["Resource"],
        json!(format!("{}/*", bucket_arn))
    );
    assert_eq!(document["Statement"][0]["Action"], json!(["s3:PutObject"]));

    let role = only(&cloud, ResourceKind::IamRole);
    let managed = role.inputs["managed_policy_arns"].as_array().unwrap();
    assert!(managed.contains(&json!(policy.attributes["arn"])));
    assert!(managed.contains(&json!(
        "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore"
    )));
}

#[test]
fn vpn_pool_routes_through_the_instance_interface() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &GatewaySettings::default());

    let instance = only(&cloud, ResourceKind::Instance);
    let eni = &instance.attributes["primary_network_interface_id"];
    let routes = cloud.resources_of(ResourceKind::Route);
    let pool = routes
        .iter()
        .find(|r| r.inputs["destination_cidr_block"] == json!("192.168.100.0/24"))
        .unwrap();
    assert_eq!(pool.inputs["network_interface_id"], json!(eni));

    let default = routes
        .iter()
        .find(|r| r.inputs["destination_cidr_block"] == json!("0.0.0.0/0"))
        .unwrap();
    assert_eq!(
        default.inputs["gateway_id"],
        json!(id_of(&cloud, ResourceKind::InternetGateway))
    );
}

#[test]
fn unchanged_inputs_plan_nothing() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &GatewaySettings::default());

    let stack = declare(&mut cloud, &GatewaySettings::default());
    let mut engine = Engine::new(&mut cloud, StateStore::new(dir.path()));
    assert!(engine.preview(&stack).unwrap().is_noop());
    let report = engine.up(&stack).unwrap();
    assert_eq!(report.unchanged, stack.resources().len());
}

#[test]
fn destroy_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1");
    deploy(&dir, &mut cloud, &GatewaySettings::default());
    let bucket = id_of(&cloud, ResourceKind::Bucket).to_string();

    Engine::new(&mut cloud, StateStore::new(dir.path()))
        .destroy("dev")
        .unwrap();
    assert!(cloud.is_empty());
    assert!(cloud.objects(&bucket).is_none());
}

#[test]
fn bucket_failure_stops_before_identity_resources() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1").fail_on(ResourceKind::Bucket);
    let stack = declare(&mut cloud, &GatewaySettings::default());

    let store = StateStore::new(dir.path());
    assert!(Engine::new(&mut cloud, store.clone()).up(&stack).is_err());

    for kind in [
        ResourceKind::Bucket,
        ResourceKind::IamPolicy,
        ResourceKind::IamRole,
        ResourceKind::InstanceProfile,
        ResourceKind::Instance,
    ] {
        assert!(cloud.resources_of(kind).is_empty(), "{} was created", kind);
    }
    let state = store.load("dev").unwrap();
    assert!(state.get("vpc").is_some());
    assert!(state.get("bucket").is_none());
    assert!(state.exports.is_empty());
}

#[test]
fn instances_without_boot_simulation_upload_nothing() {
    let dir = TempDir::new().unwrap();
    let mut cloud = MemoryProvider::new("us-east-1").with_boot_simulation(false);
    deploy(&dir, &mut cloud, &GatewaySettings::default());
    let bucket = id_of(&cloud, ResourceKind::Bucket);
    assert_eq!(cloud.objects(bucket).unwrap(), Vec::<&str>::new());
}
