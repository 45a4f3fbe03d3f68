// AWS provider - drives the aws CLI with JSON output.
//
// Each resource kind maps to the handful of CLI calls that create, change, or
// remove it. Nothing here retries; a failing call surfaces with the CLI's own
// error text.

use crate::graph::ResourceKind;
use crate::provider::{
    input_bool, input_opt_str, input_str, input_str_list, input_tags, ImageQuery, Inputs,
    Provider, Provisioned,
};
use crate::utils::exec::{local, CommandRunner, LocalRunner};
use anyhow::{Context, Result};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub struct AwsCliProvider<R: CommandRunner = LocalRunner> {
    runner: R,
    region: String,
    profile: Option<String>,
}

impl AwsCliProvider<LocalRunner> {
    pub fn new(region: &str, profile: Option<String>) -> Result<Self> {
        if !local::check_command_exists("aws") {
            anyhow::bail!(
                "aws CLI not found on PATH.\n\nInstall it from https://aws.amazon.com/cli/ and run 'aws configure',\nor use --provider memory to work against the simulated cloud."
            );
        }
        Ok(Self::with_runner(LocalRunner, region, profile))
    }
}

impl<R: CommandRunner> AwsCliProvider<R> {
    pub fn with_runner(runner: R, region: &str, profile: Option<String>) -> Self {
        Self {
            runner,
            region: region.to_string(),
            profile,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn run(&mut self, service: &str, operation: &str, args: Vec<String>) -> Result<String> {
        let mut full = vec![service.to_string(), operation.to_string()];
        full.extend(args);
        full.extend(strings(&["--region", &self.region, "--output", "json"]));
        if let Some(profile) = &self.profile {
            full.extend(strings(&["--profile", profile]));
        }
        self.runner.run("aws", &full)
    }

    fn call(&mut self, service: &str, operation: &str, args: Vec<String>) -> Result<Value> {
        let stdout = self.run(service, operation, args)?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout)
            .with_context(|| format!("Unexpected output from aws {} {}", service, operation))
    }

    fn ec2(&mut self, operation: &str, args: Vec<String>) -> Result<Value> {
        self.call("ec2", operation, args)
    }

    fn iam(&mut self, operation: &str, args: Vec<String>) -> Result<Value> {
        self.call("iam", operation, args)
    }

    fn tag_ec2(&mut self, id: &str, inputs: &Inputs) -> Result<()> {
        let tags = input_tags(inputs);
        if tags.is_empty() {
            return Ok(());
        }
        let tags: Vec<Value> = tags
            .iter()
            .map(|(k, v)| json!({"Key": k, "Value": v}))
            .collect();
        self.ec2(
            "create-tags",
            strings(&["--resources", id, "--tags", &Value::Array(tags).to_string()]),
        )?;
        Ok(())
    }

    fn create_vpc(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&["--cidr-block", input_str(inputs, "cidr_block")?]);
        args.extend(tag_specification("vpc", inputs));
        let out = self.ec2("create-vpc", args)?;
        let id = field(&out, "/Vpc/VpcId")?.to_string();

        if let Some(enabled) = input_bool(inputs, "enable_dns_hostnames") {
            self.set_dns_hostnames(&id, enabled)?;
        }
        Ok(Provisioned::new(id))
    }

    fn set_dns_hostnames(&mut self, vpc_id: &str, enabled: bool) -> Result<()> {
        let value = json!({ "Value": enabled }).to_string();
        self.ec2(
            "modify-vpc-attribute",
            strings(&["--vpc-id", vpc_id, "--enable-dns-hostnames", &value]),
        )?;
        Ok(())
    }

    fn create_internet_gateway(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let out = self.ec2(
            "create-internet-gateway",
            tag_specification("internet-gateway", inputs),
        )?;
        let id = field(&out, "/InternetGateway/InternetGatewayId")?.to_string();
        if let Some(vpc_id) = input_opt_str(inputs, "vpc_id") {
            self.ec2(
                "attach-internet-gateway",
                strings(&["--internet-gateway-id", &id, "--vpc-id", vpc_id]),
            )?;
        }
        Ok(Provisioned::new(id))
    }

    fn create_subnet(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&[
            "--vpc-id",
            input_str(inputs, "vpc_id")?,
            "--cidr-block",
            input_str(inputs, "cidr_block")?,
        ]);
        args.extend(tag_specification("subnet", inputs));
        let out = self.ec2("create-subnet", args)?;
        Ok(Provisioned::new(field(&out, "/Subnet/SubnetId")?))
    }

    fn create_route_table(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&["--vpc-id", input_str(inputs, "vpc_id")?]);
        args.extend(tag_specification("route-table", inputs));
        let out = self.ec2("create-route-table", args)?;
        Ok(Provisioned::new(field(&out, "/RouteTable/RouteTableId")?))
    }

    fn route_args(inputs: &Inputs) -> Result<Vec<String>> {
        let mut args = strings(&[
            "--route-table-id",
            input_str(inputs, "route_table_id")?,
            "--destination-cidr-block",
            input_str(inputs, "destination_cidr_block")?,
        ]);
        if let Some(gateway) = input_opt_str(inputs, "gateway_id") {
            args.extend(strings(&["--gateway-id", gateway]));
        } else if let Some(eni) = input_opt_str(inputs, "network_interface_id") {
            args.extend(strings(&["--network-interface-id", eni]));
        } else {
            anyhow::bail!("Route needs a gateway_id or network_interface_id target");
        }
        Ok(args)
    }

    fn create_route(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        self.ec2("create-route", Self::route_args(inputs)?)?;
        Ok(Provisioned::new(format!(
            "{}_{}",
            input_str(inputs, "route_table_id")?,
            input_str(inputs, "destination_cidr_block")?
        )))
    }

    fn create_route_table_association(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let out = self.ec2(
            "associate-route-table",
            strings(&[
                "--subnet-id",
                input_str(inputs, "subnet_id")?,
                "--route-table-id",
                input_str(inputs, "route_table_id")?,
            ]),
        )?;
        Ok(Provisioned::new(field(&out, "/AssociationId")?))
    }

    fn create_security_group(&mut self, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&[
            "--group-name",
            name,
            "--description",
            input_opt_str(inputs, "description").unwrap_or("Managed by gateway"),
            "--vpc-id",
            input_str(inputs, "vpc_id")?,
        ]);
        args.extend(tag_specification("security-group", inputs));
        let out = self.ec2("create-security-group", args)?;
        let id = field(&out, "/GroupId")?.to_string();

        // new groups come with an allow-all IPv4 egress rule; replace it with the declared set
        let default_egress = json!([{"IpProtocol": "-1", "IpRanges": [{"CidrIp": "0.0.0.0/0"}]}]);
        self.ec2(
            "revoke-security-group-egress",
            strings(&["--group-id", &id, "--ip-permissions", &default_egress.to_string()]),
        )?;
        self.set_rules(&id, "ingress", None, inputs.get("ingress"))?;
        self.set_rules(&id, "egress", None, inputs.get("egress"))?;
        Ok(Provisioned::new(id))
    }

    fn set_rules(
        &mut self,
        group_id: &str,
        direction: &str,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<()> {
        if let Some(old) = old.map(ip_permissions).transpose()? {
            if !old.is_empty() {
                self.ec2(
                    &format!("revoke-security-group-{}", direction),
                    strings(&[
                        "--group-id",
                        group_id,
                        "--ip-permissions",
                        &Value::Array(old).to_string(),
                    ]),
                )?;
            }
        }
        if let Some(new) = new.map(ip_permissions).transpose()? {
            if !new.is_empty() {
                self.ec2(
                    &format!("authorize-security-group-{}", direction),
                    strings(&[
                        "--group-id",
                        group_id,
                        "--ip-permissions",
                        &Value::Array(new).to_string(),
                    ]),
                )?;
            }
        }
        Ok(())
    }

    fn create_bucket(&mut self, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&["--bucket", name]);
        if self.region != "us-east-1" {
            args.extend(strings(&[
                "--create-bucket-configuration",
                &format!("LocationConstraint={}", self.region),
            ]));
        }
        self.call("s3api", "create-bucket", args)?;
        self.tag_bucket(name, inputs)?;
        Ok(Provisioned::new(name)
            .with("bucket", name)
            .with("arn", format!("arn:aws:s3:::{}", name))
            .with("region", self.region.clone()))
    }

    fn tag_bucket(&mut self, name: &str, inputs: &Inputs) -> Result<()> {
        let tags = input_tags(inputs);
        if tags.is_empty() {
            return Ok(());
        }
        let tag_set: Vec<Value> = tags
            .iter()
            .map(|(k, v)| json!({"Key": k, "Value": v}))
            .collect();
        let tagging = json!({ "TagSet": tag_set }).to_string();
        self.call(
            "s3api",
            "put-bucket-tagging",
            strings(&["--bucket", name, "--tagging", &tagging]),
        )?;
        Ok(())
    }

    fn create_policy(&mut self, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&[
            "--policy-name",
            name,
            "--policy-document",
            input_str(inputs, "policy")?,
        ]);
        if let Some(path) = input_opt_str(inputs, "path") {
            args.extend(strings(&["--path", path]));
        }
        if let Some(description) = input_opt_str(inputs, "description") {
            args.extend(strings(&["--description", description]));
        }
        let out = self.iam("create-policy", args)?;
        let arn = field(&out, "/Policy/Arn")?.to_string();
        Ok(Provisioned::new(arn.clone()).with("arn", arn))
    }

    /// Old non-default versions, oldest first
    fn stale_policy_versions(&mut self, arn: &str) -> Result<Vec<String>> {
        let out = self.iam("list-policy-versions", strings(&["--policy-arn", arn]))?;
        let mut versions: Vec<(String, String)> = out
            .pointer("/Versions")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|v| v["IsDefaultVersion"].as_bool() != Some(true))
                    .filter_map(|v| {
                        Some((
                            v["CreateDate"].as_str()?.to_string(),
                            v["VersionId"].as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        versions.sort();
        Ok(versions.into_iter().map(|(_, id)| id).collect())
    }

    fn delete_policy_version(&mut self, arn: &str, version: &str) -> Result<()> {
        self.iam(
            "delete-policy-version",
            strings(&["--policy-arn", arn, "--version-id", version]),
        )?;
        Ok(())
    }

    fn update_policy(&mut self, arn: &str, inputs: &Inputs) -> Result<()> {
        // IAM keeps at most five versions
        let stale = self.stale_policy_versions(arn)?;
        if stale.len() >= 4 {
            self.delete_policy_version(arn, &stale[0])?;
        }
        self.iam(
            "create-policy-version",
            strings(&[
                "--policy-arn",
                arn,
                "--policy-document",
                input_str(inputs, "policy")?,
                "--set-as-default",
            ]),
        )?;
        Ok(())
    }

    fn create_role(&mut self, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let out = self.iam(
            "create-role",
            strings(&[
                "--role-name",
                name,
                "--assume-role-policy-document",
                input_str(inputs, "assume_role_policy")?,
            ]),
        )?;
        let arn = field(&out, "/Role/Arn")?.to_string();
        for policy in input_str_list(inputs, "managed_policy_arns") {
            self.attach_role_policy(name, policy)?;
        }
        Ok(Provisioned::new(name).with("name", name).with("arn", arn))
    }

    fn attach_role_policy(&mut self, role: &str, policy: &str) -> Result<()> {
        self.iam(
            "attach-role-policy",
            strings(&["--role-name", role, "--policy-arn", policy]),
        )?;
        Ok(())
    }

    fn detach_role_policy(&mut self, role: &str, policy: &str) -> Result<()> {
        self.iam(
            "detach-role-policy",
            strings(&["--role-name", role, "--policy-arn", policy]),
        )?;
        Ok(())
    }

    fn create_instance_profile(&mut self, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        let out = self.iam(
            "create-instance-profile",
            strings(&["--instance-profile-name", name]),
        )?;
        let arn = field(&out, "/InstanceProfile/Arn")?.to_string();
        self.iam(
            "add-role-to-instance-profile",
            strings(&[
                "--instance-profile-name",
                name,
                "--role-name",
                input_str(inputs, "role")?,
            ]),
        )?;
        self.run(
            "iam",
            "wait",
            strings(&["instance-profile-exists", "--instance-profile-name", name]),
        )?;
        Ok(Provisioned::new(name).with("name", name).with("arn", arn))
    }

    fn allocate_address(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&["--domain", input_opt_str(inputs, "domain").unwrap_or("vpc")]);
        args.extend(tag_specification("elastic-ip", inputs));
        let out = self.ec2("allocate-address", args)?;
        Ok(Provisioned::new(field(&out, "/AllocationId")?)
            .with("public_ip", field(&out, "/PublicIp")?))
    }

    fn run_instance(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let mut args = strings(&[
            "--image-id",
            input_str(inputs, "ami")?,
            "--instance-type",
            input_str(inputs, "instance_type")?,
            "--subnet-id",
            input_str(inputs, "subnet_id")?,
            "--count",
            "1",
        ]);
        let groups = input_str_list(inputs, "vpc_security_group_ids");
        if !groups.is_empty() {
            args.push("--security-group-ids".to_string());
            args.extend(groups.iter().map(|g| g.to_string()));
        }
        if let Some(profile) = input_opt_str(inputs, "iam_instance_profile") {
            args.extend(strings(&["--iam-instance-profile", &format!("Name={}", profile)]));
        }
        if let Some(user_data) = input_opt_str(inputs, "user_data") {
            args.extend(strings(&["--user-data", user_data]));
        }
        if input_bool(inputs, "associate_public_ip_address") == Some(true) {
            args.push("--associate-public-ip-address".to_string());
        }
        args.extend(tag_specification("instance", inputs));

        let out = self.ec2("run-instances", args)?;
        let id = field(&out, "/Instances/0/InstanceId")?.to_string();
        let eni = field(&out, "/Instances/0/NetworkInterfaces/0/NetworkInterfaceId")?.to_string();
        let private_ip = field(&out, "/Instances/0/PrivateIpAddress")?.to_string();

        self.run("ec2", "wait", strings(&["instance-running", "--instance-ids", &id]))?;
        if let Some(check) = input_bool(inputs, "source_dest_check") {
            self.set_source_dest_check(&id, check)?;
        }

        Ok(Provisioned::new(id)
            .with("primary_network_interface_id", eni)
            .with("private_ip", private_ip))
    }

    fn set_source_dest_check(&mut self, instance_id: &str, enabled: bool) -> Result<()> {
        let flag = if enabled {
            "--source-dest-check"
        } else {
            "--no-source-dest-check"
        };
        self.ec2(
            "modify-instance-attribute",
            strings(&["--instance-id", instance_id, flag]),
        )?;
        Ok(())
    }

    /// User data can only change while the instance is stopped
    fn replace_user_data(&mut self, instance_id: &str, user_data: &str) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(user_data);
        self.ec2("stop-instances", strings(&["--instance-ids", instance_id]))?;
        self.run("ec2", "wait", strings(&["instance-stopped", "--instance-ids", instance_id]))?;
        self.ec2(
            "modify-instance-attribute",
            strings(&[
                "--instance-id",
                instance_id,
                "--attribute",
                "userData",
                "--value",
                &encoded,
            ]),
        )?;
        self.ec2("start-instances", strings(&["--instance-ids", instance_id]))?;
        self.run("ec2", "wait", strings(&["instance-running", "--instance-ids", instance_id]))?;
        Ok(())
    }

    fn associate_address(&mut self, inputs: &Inputs) -> Result<Provisioned> {
        let allocation = input_str(inputs, "allocation_id")?;
        let out = self.ec2(
            "associate-address",
            strings(&[
                "--instance-id",
                input_str(inputs, "instance_id")?,
                "--allocation-id",
                allocation,
                "--allow-reassociation",
            ]),
        )?;
        let id = field(&out, "/AssociationId")?.to_string();

        let described = self.ec2(
            "describe-addresses",
            strings(&["--allocation-ids", allocation]),
        )?;
        let eni = field(&described, "/Addresses/0/NetworkInterfaceId")?.to_string();
        Ok(Provisioned::new(id).with("network_interface_id", eni))
    }
}

impl<R: CommandRunner> Provider for AwsCliProvider<R> {
    fn lookup_image(&mut self, query: &ImageQuery) -> Result<String> {
        let filters = json!([
            {"Name": "name", "Values": [query.name_pattern]},
            {"Name": "virtualization-type", "Values": [query.virtualization_type]},
        ]);
        let mut args = vec!["--owners".to_string()];
        args.extend(query.owners.iter().cloned());
        args.extend(strings(&["--filters", &filters.to_string()]));
        let out = self.ec2("describe-images", args)?;

        let images = out
            .pointer("/Images")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if images.is_empty() {
            anyhow::bail!(
                "No machine image matches '{}' ({}) from {}",
                query.name_pattern,
                query.virtualization_type,
                query.owners.join(", ")
            );
        }
        if !query.most_recent && images.len() > 1 {
            anyhow::bail!(
                "Image query returned {} results, narrow the filters or set most_recent",
                images.len()
            );
        }

        let mut dated: Vec<(DateTime<Utc>, String)> = Vec::with_capacity(images.len());
        for image in &images {
            let id = field(image, "/ImageId")?;
            let created = field(image, "/CreationDate")?;
            let created = DateTime::parse_from_rfc3339(created)
                .with_context(|| format!("Bad CreationDate '{}' on {}", created, id))?
                .with_timezone(&Utc);
            dated.push((created, id.to_string()));
        }
        dated.sort();
        let newest = dated.pop().map(|(_, id)| id);
        newest.context("No machine image found")
    }

    fn create(&mut self, kind: ResourceKind, name: &str, inputs: &Inputs) -> Result<Provisioned> {
        log::info!("aws: creating {} {}", kind, name);
        let provisioned = match kind {
            ResourceKind::Vpc => self.create_vpc(inputs),
            ResourceKind::InternetGateway => self.create_internet_gateway(inputs),
            ResourceKind::Subnet => self.create_subnet(inputs),
            ResourceKind::RouteTable => self.create_route_table(inputs),
            ResourceKind::Route => self.create_route(inputs),
            ResourceKind::RouteTableAssociation => self.create_route_table_association(inputs),
            ResourceKind::SecurityGroup => self.create_security_group(name, inputs),
            ResourceKind::Bucket => self.create_bucket(name, inputs),
            ResourceKind::IamPolicy => self.create_policy(name, inputs),
            ResourceKind::IamRole => self.create_role(name, inputs),
            ResourceKind::InstanceProfile => self.create_instance_profile(name, inputs),
            ResourceKind::Eip => self.allocate_address(inputs),
            ResourceKind::Instance => self.run_instance(inputs),
            ResourceKind::EipAssociation => self.associate_address(inputs),
        };
        provisioned.with_context(|| format!("Failed to create {} '{}'", kind, name))
    }

    fn update(
        &mut self,
        kind: ResourceKind,
        current: &Provisioned,
        old: &Inputs,
        new: &Inputs,
    ) -> Result<()> {
        log::info!("aws: updating {} {}", kind, current.id);
        let changed = |key: &str| old.get(key) != new.get(key);
        let id = current.id.as_str();

        match kind {
            ResourceKind::Vpc => {
                if changed("enable_dns_hostnames") {
                    let enabled = input_bool(new, "enable_dns_hostnames").unwrap_or(false);
                    self.set_dns_hostnames(id, enabled)?;
                }
                if changed("tags") {
                    self.tag_ec2(id, new)?;
                }
            }
            ResourceKind::InternetGateway
            | ResourceKind::Subnet
            | ResourceKind::RouteTable
            | ResourceKind::Eip => {
                if changed("tags") {
                    self.tag_ec2(id, new)?;
                }
            }
            ResourceKind::Route => {
                self.ec2("replace-route", Self::route_args(new)?)?;
            }
            ResourceKind::SecurityGroup => {
                for direction in ["ingress", "egress"] {
                    if changed(direction) {
                        self.set_rules(id, direction, old.get(direction), new.get(direction))?;
                    }
                }
                if changed("tags") {
                    self.tag_ec2(id, new)?;
                }
            }
            ResourceKind::Bucket => {
                if changed("tags") {
                    self.tag_bucket(id, new)?;
                }
            }
            ResourceKind::IamPolicy => self.update_policy(id, new)?,
            ResourceKind::IamRole => {
                let before = input_str_list(old, "managed_policy_arns");
                let after = input_str_list(new, "managed_policy_arns");
                for policy in before.iter().filter(|p| !after.contains(p)) {
                    self.detach_role_policy(id, policy)?;
                }
                for policy in after.iter().filter(|p| !before.contains(p)) {
                    self.attach_role_policy(id, policy)?;
                }
            }
            ResourceKind::Instance => {
                if changed("source_dest_check") {
                    let check = input_bool(new, "source_dest_check").unwrap_or(true);
                    self.set_source_dest_check(id, check)?;
                }
                if changed("user_data") {
                    self.replace_user_data(id, input_opt_str(new, "user_data").unwrap_or(""))?;
                }
                if changed("tags") {
                    self.tag_ec2(id, new)?;
                }
            }
            ResourceKind::RouteTableAssociation
            | ResourceKind::InstanceProfile
            | ResourceKind::EipAssociation => {
                anyhow::bail!("{} cannot be updated in place", kind);
            }
        }
        Ok(())
    }

    fn delete(&mut self, kind: ResourceKind, current: &Provisioned, inputs: &Inputs) -> Result<()> {
        log::info!("aws: deleting {} {}", kind, current.id);
        let id = current.id.as_str();

        match kind {
            ResourceKind::Vpc => {
                self.ec2("delete-vpc", strings(&["--vpc-id", id]))?;
            }
            ResourceKind::InternetGateway => {
                if let Some(vpc_id) = input_opt_str(inputs, "vpc_id") {
                    self.ec2(
                        "detach-internet-gateway",
                        strings(&["--internet-gateway-id", id, "--vpc-id", vpc_id]),
                    )?;
                }
                self.ec2("delete-internet-gateway", strings(&["--internet-gateway-id", id]))?;
            }
            ResourceKind::Subnet => {
                self.ec2("delete-subnet", strings(&["--subnet-id", id]))?;
            }
            ResourceKind::RouteTable => {
                self.ec2("delete-route-table", strings(&["--route-table-id", id]))?;
            }
            ResourceKind::Route => {
                self.ec2(
                    "delete-route",
                    strings(&[
                        "--route-table-id",
                        input_str(inputs, "route_table_id")?,
                        "--destination-cidr-block",
                        input_str(inputs, "destination_cidr_block")?,
                    ]),
                )?;
            }
            ResourceKind::RouteTableAssociation => {
                self.ec2("disassociate-route-table", strings(&["--association-id", id]))?;
            }
            ResourceKind::SecurityGroup => {
                self.ec2("delete-security-group", strings(&["--group-id", id]))?;
            }
            ResourceKind::Bucket => {
                if input_bool(inputs, "force_destroy") == Some(true) {
                    self.run("s3", "rm", strings(&[&format!("s3://{}", id), "--recursive"]))?;
                }
                self.call("s3api", "delete-bucket", strings(&["--bucket", id]))?;
            }
            ResourceKind::IamPolicy => {
                for version in self.stale_policy_versions(id)? {
                    self.delete_policy_version(id, &version)?;
                }
                self.iam("delete-policy", strings(&["--policy-arn", id]))?;
            }
            ResourceKind::IamRole => {
                for policy in input_str_list(inputs, "managed_policy_arns") {
                    self.detach_role_policy(id, policy)?;
                }
                self.iam("delete-role", strings(&["--role-name", id]))?;
            }
            ResourceKind::InstanceProfile => {
                if let Some(role) = input_opt_str(inputs, "role") {
                    self.iam(
                        "remove-role-from-instance-profile",
                        strings(&["--instance-profile-name", id, "--role-name", role]),
                    )?;
                }
                self.iam("delete-instance-profile", strings(&["--instance-profile-name", id]))?;
            }
            ResourceKind::Eip => {
                self.ec2("release-address", strings(&["--allocation-id", id]))?;
            }
            ResourceKind::Instance => {
                self.ec2("terminate-instances", strings(&["--instance-ids", id]))?;
                self.run("ec2", "wait", strings(&["instance-terminated", "--instance-ids", id]))?;
            }
            ResourceKind::EipAssociation => {
                // a replacement association already moved the address with --allow-reassociation
                match self.ec2("disassociate-address", strings(&["--association-id", id])) {
                    Err(e) if format!("{:#}", e).contains("InvalidAssociationID.NotFound") => {
                        log::info!("aws: association {} already gone", id);
                    }
                    other => {
                        other?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn field<'a>(value: &'a Value, pointer: &str) -> Result<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .with_context(|| format!("aws CLI output is missing {}", pointer))
}

/// `--tag-specifications` for resources created with tags
fn tag_specification(resource_type: &str, inputs: &Inputs) -> Vec<String> {
    let tags = input_tags(inputs);
    if tags.is_empty() {
        return Vec::new();
    }
    let tags: Vec<Value> = tags
        .iter()
        .map(|(k, v)| json!({"Key": k, "Value": v}))
        .collect();
    let specification = json!([{ "ResourceType": resource_type, "Tags": tags }]);
    vec!["--tag-specifications".to_string(), specification.to_string()]
}

/// Declared rules as EC2 `IpPermissions`
fn ip_permissions(rules: &Value) -> Result<Vec<Value>> {
    let rules = rules
        .as_array()
        .context("Security group rules must be a list")?;
    let mut permissions = Vec::with_capacity(rules.len());

    for rule in rules {
        let protocol = rule["protocol"]
            .as_str()
            .context("Security group rule is missing protocol")?;
        let description = rule["description"].as_str();

        let mut permission = json!({ "IpProtocol": protocol });
        if protocol != "-1" {
            permission["FromPort"] = rule["from_port"].clone();
            permission["ToPort"] = rule["to_port"].clone();
        }

        let v4: Vec<Value> = rule["cidr_blocks"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|cidr| match description {
                        Some(d) => json!({"CidrIp": cidr, "Description": d}),
                        None => json!({"CidrIp": cidr}),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let v6: Vec<Value> = rule["ipv6_cidr_blocks"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|cidr| match description {
                        Some(d) => json!({"CidrIpv6": cidr, "Description": d}),
                        None => json!({"CidrIpv6": cidr}),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if !v4.is_empty() {
            permission["IpRanges"] = Value::Array(v4);
        }
        if !v6.is_empty() {
            permission["Ipv6Ranges"] = Value::Array(v6);
        }
        permissions.push(permission);
    }
    Ok(permissions)
}
