use crate::gateway::{COMPUTE_SERVICE_PRINCIPAL, REMOTE_MANAGEMENT_POLICY_ARN};
use crate::graph::{Output, Prop, Resource, ResourceKind, ResourceRef, Stack};
use anyhow::Result;

const POLICY_VERSION: &str = "2012-10-17";

pub struct Identity {
    pub bucket: ResourceRef,
    pub policy: ResourceRef,
    pub role: ResourceRef,
    pub instance_profile: ResourceRef,
}

/// `s3:PutObject` on every key under the bucket
pub fn bucket_write_policy(bucket_arn: Output) -> Prop {
    Prop::json(Prop::map([
        ("Version", Prop::from(POLICY_VERSION)),
        (
            "Statement",
            Prop::list([Prop::map([
                ("Action", Prop::list([Prop::from("s3:PutObject")])),
                ("Effect", Prop::from("Allow")),
                (
                    "Resource",
                    Prop::from(Output::concat([bucket_arn, Output::known("/*")])),
                ),
            ])]),
        ),
    ]))
}

/// Only the compute service may assume the role
pub fn compute_trust_policy() -> Prop {
    Prop::json(Prop::map([
        ("Version", Prop::from(POLICY_VERSION)),
        (
            "Statement",
            Prop::list([Prop::map([
                ("Action", Prop::from("sts:AssumeRole")),
                ("Effect", Prop::from("Allow")),
                (
                    "Principal",
                    Prop::map([("Service", Prop::from(COMPUTE_SERVICE_PRINCIPAL))]),
                ),
            ])]),
        ),
    ]))
}

pub fn declare(stack: &mut Stack) -> Result<Identity> {
    let bucket =
        stack.add(Resource::new(ResourceKind::Bucket, "bucket").prop("force_destroy", true))?;

    let policy = stack.add(
        Resource::new(ResourceKind::IamPolicy, "s3-policy")
            .prop("path", "/")
            .prop("description", "Managed policy for S3 access")
            .prop("policy", bucket_write_policy(bucket.attr("arn"))),
    )?;

    let role = stack.add(
        Resource::new(ResourceKind::IamRole, "ec2-role")
            .prop("assume_role_policy", compute_trust_policy())
            .prop(
                "managed_policy_arns",
                Prop::list([
                    Prop::from(REMOTE_MANAGEMENT_POLICY_ARN),
                    Prop::from(policy.attr("arn")),
                ]),
            ),
    )?;

    let instance_profile = stack.add(
        Resource::new(ResourceKind::InstanceProfile, "ec2-instance-profile")
            .prop("role", role.attr("name")),
    )?;

    Ok(Identity {
        bucket,
        policy,
        role,
        instance_profile,
    })
}
