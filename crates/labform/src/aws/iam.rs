//! IAM infrastructure.
use std::collections::BTreeMap;

use anyhow::Context;
use aws_sdk_iam::types::PolicyScopeType;

use super::Session;
use crate::{utils, Removal, ResourceAttributes, Service};

/// Customer managed IAM policies.
///
/// A definition is the policy document.
pub struct IamPolicy;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyAttributes {
    pub arn: String,
    pub policy_id: String,
    pub default_version_id: String,
    pub attachment_count: i32,
}

impl ResourceAttributes for PolicyAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

impl Service for IamPolicy {
    type Provider = Session;
    type Definition = serde_json::Value;
    type Attributes = PolicyAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "policy";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, PolicyAttributes>> {
        let client = aws_sdk_iam::Client::new(session.as_ref());
        let policies = client
            .list_policies()
            .scope(PolicyScopeType::Local)
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .context("could not list policies")?;
        Ok(policies
            .into_iter()
            .filter_map(|p| {
                let attributes = PolicyAttributes {
                    arn: p.arn?,
                    policy_id: p.policy_id.unwrap_or_default(),
                    default_version_id: p.default_version_id.unwrap_or_default(),
                    attachment_count: p.attachment_count.unwrap_or_default(),
                };
                Some((p.policy_name?, attributes))
            })
            .collect())
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        document: &serde_json::Value,
    ) -> anyhow::Result<PolicyAttributes> {
        let client = aws_sdk_iam::Client::new(session.as_ref());
        let policy = client
            .create_policy()
            .policy_name(name)
            .policy_document(serde_json::to_string(document)?)
            .send()
            .await?
            .policy
            .context("no policy")?;
        log::info!("...created policy {name}");
        Ok(PolicyAttributes {
            arn: policy.arn.context("missing arn from policy creation")?,
            policy_id: policy.policy_id.unwrap_or_default(),
            default_version_id: policy.default_version_id.unwrap_or_default(),
            attachment_count: policy.attachment_count.unwrap_or_default(),
        })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &serde_json::Value,
        existing: Option<&PolicyAttributes>,
    ) -> anyhow::Result<Removal> {
        let arn = match existing {
            Some(policy) => policy.arn.clone(),
            None => utils::customer_policy_arn(&session.account_id().await?, name),
        };
        let client = aws_sdk_iam::Client::new(session.as_ref());

        // A policy cannot be deleted while it has versions other than the default.
        let versions = match client.list_policy_versions().policy_arn(&arn).send().await {
            Ok(out) => out.versions.unwrap_or_default(),
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_no_such_entity_exception())
                    .unwrap_or_default() =>
            {
                return Ok(Removal::Absent)
            }
            Err(e) => return Err(e).context("could not list policy versions"),
        };
        for version in versions.iter().filter(|v| !v.is_default_version()) {
            let version_id = version.version_id().context("missing policy version id")?;
            log::debug!("deleting version {version_id} of policy {name}");
            client
                .delete_policy_version()
                .policy_arn(&arn)
                .version_id(version_id)
                .send()
                .await?;
        }

        match client.delete_policy().policy_arn(&arn).send().await {
            Ok(_) => {
                log::info!("...deleted policy {name}");
                Ok(Removal::Deleted)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_no_such_entity_exception())
                    .unwrap_or_default() =>
            {
                Ok(Removal::Absent)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_delete_conflict_exception())
                    .unwrap_or_default() =>
            {
                anyhow::bail!("policy {name} is in use, detach it from every role first")
            }
            Err(e) => Err(e).context("could not delete policy"),
        }
    }
}

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// An AWS service, e.g. `lambda.amazonaws.com`.
    Service(String),
    /// An account id or IAM ARN.
    Aws(String),
    /// The account the session belongs to.
    CurrentAccount,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoleDefinition {
    pub principal: Principal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_session_duration: Option<i32>,
    /// Names of customer managed policies to attach.
    #[serde(default)]
    pub policies: Vec<String>,
    /// Names of AWS managed policies to attach, e.g.
    /// `service-role/AWSLambdaBasicExecutionRole`.
    #[serde(default)]
    pub managed_policies: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RoleDefinition {
    pub fn new(principal: Principal) -> Self {
        RoleDefinition {
            principal,
            description: None,
            max_session_duration: None,
            policies: vec![],
            managed_policies: vec![],
            tags: BTreeMap::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_policy(mut self, name: impl Into<String>) -> Self {
        self.policies.push(name.into());
        self
    }

    pub fn with_managed_policy(mut self, name: impl Into<String>) -> Self {
        self.managed_policies.push(name.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The trust policy allowing the principal to assume the role.
    pub fn trust_document(&self, account: &str) -> serde_json::Value {
        let principal = match &self.principal {
            Principal::Service(service) => serde_json::json!({ "Service": service }),
            Principal::Aws(aws) => serde_json::json!({ "AWS": aws }),
            Principal::CurrentAccount => serde_json::json!({ "AWS": account }),
        };
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": principal,
                "Action": "sts:AssumeRole",
            }]
        })
    }

    /// ARNs of every policy the role attaches.
    pub fn policy_arns(&self, account: &str) -> Vec<String> {
        self.policies
            .iter()
            .map(|name| utils::customer_policy_arn(account, name))
            .chain(self.managed_policies.iter().map(|name| utils::managed_policy_arn(name)))
            .collect()
    }
}

/// IAM roles.
pub struct IamRole;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleAttributes {
    pub arn: String,
    pub role_id: String,
    pub path: String,
    pub description: String,
}

impl ResourceAttributes for RoleAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

impl From<aws_sdk_iam::types::Role> for RoleAttributes {
    fn from(role: aws_sdk_iam::types::Role) -> Self {
        RoleAttributes {
            arn: role.arn,
            role_id: role.role_id,
            path: role.path,
            description: role.description.unwrap_or_default(),
        }
    }
}

impl Service for IamRole {
    type Provider = Session;
    type Definition = RoleDefinition;
    type Attributes = RoleAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "role";

    async fn do_list(&self, session: &Session) -> anyhow::Result<BTreeMap<String, RoleAttributes>> {
        let client = aws_sdk_iam::Client::new(session.as_ref());
        let roles = client
            .list_roles()
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .context("could not list roles")?;
        Ok(roles
            .into_iter()
            .map(|role| (role.role_name.clone(), role.into()))
            .collect())
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        role: &RoleDefinition,
    ) -> anyhow::Result<RoleAttributes> {
        let account = session.account_id().await?;
        let client = aws_sdk_iam::Client::new(session.as_ref());
        let tags = role
            .tags
            .iter()
            .map(|(k, v)| aws_sdk_iam::types::Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()?;
        let iam_role = client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(serde_json::to_string(&role.trust_document(&account))?)
            .set_description(role.description.clone())
            .set_max_session_duration(role.max_session_duration)
            .set_tags(if tags.is_empty() { None } else { Some(tags) })
            .send()
            .await?
            .role
            .context("no role")?;
        log::info!("...created role {name}");

        for policy_arn in role.policy_arns(&account) {
            attach_policy(session, name, &policy_arn)
                .await
                .with_context(|| {
                    format!("role {name} was created but not all policies are attached")
                })?;
        }
        Ok(iam_role.into())
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &RoleDefinition,
        _: Option<&RoleAttributes>,
    ) -> anyhow::Result<Removal> {
        let client = aws_sdk_iam::Client::new(session.as_ref());
        let attached = match client
            .list_attached_role_policies()
            .role_name(name)
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
        {
            Ok(attached) => attached,
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_no_such_entity_exception())
                    .unwrap_or_default() =>
            {
                return Ok(Removal::Absent)
            }
            Err(e) => return Err(e).context("could not list attached policies"),
        };
        for policy in attached {
            if let Some(policy_arn) = policy.policy_arn() {
                detach_policy(session, name, policy_arn).await?;
            }
        }

        match client.delete_role().role_name(name).send().await {
            Ok(_) => {
                log::info!("...deleted role {name}");
                Ok(Removal::Deleted)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_no_such_entity_exception())
                    .unwrap_or_default() =>
            {
                Ok(Removal::Absent)
            }
            Err(e) => Err(e).context("could not delete role"),
        }
    }
}

/// Returns the ARN of the named role.
pub async fn role_arn(session: &Session, name: &str) -> anyhow::Result<String> {
    let client = aws_sdk_iam::Client::new(session.as_ref());
    let role = client
        .get_role()
        .role_name(name)
        .send()
        .await
        .with_context(|| format!("could not get role {name}"))?
        .role
        .context("no role")?;
    Ok(role.arn)
}

pub async fn attach_policy(
    session: &Session,
    role_name: &str,
    policy_arn: &str,
) -> anyhow::Result<()> {
    let client = aws_sdk_iam::Client::new(session.as_ref());
    let _ = client
        .attach_role_policy()
        .role_name(role_name)
        .policy_arn(policy_arn)
        .send()
        .await
        .with_context(|| format!("could not attach {policy_arn}"))?;
    log::info!("...attached policy {policy_arn} to role {role_name}");
    Ok(())
}

pub async fn detach_policy(
    session: &Session,
    role_name: &str,
    policy_arn: &str,
) -> anyhow::Result<()> {
    let client = aws_sdk_iam::Client::new(session.as_ref());
    let _ = client
        .detach_role_policy()
        .role_name(role_name)
        .policy_arn(policy_arn)
        .send()
        .await
        .with_context(|| format!("could not detach {policy_arn}"))?;
    log::info!("...detached policy {policy_arn} from role {role_name}");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trust_document_for_current_account() {
        let role = RoleDefinition::new(Principal::CurrentAccount);
        pretty_assertions::assert_eq!(
            serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "AWS": "123456789012" },
                    "Action": "sts:AssumeRole",
                }]
            }),
            role.trust_document("123456789012")
        );
    }

    #[test]
    fn policy_arns_cover_both_kinds() {
        let role = RoleDefinition::new(Principal::Service("apigateway.amazonaws.com".into()))
            .with_policy("POC1-Lambda-Read-SQS")
            .with_managed_policy("service-role/AmazonAPIGatewayPushToCloudWatchLogs");
        assert_eq!(
            serde_json::json!({ "Service": "apigateway.amazonaws.com" }),
            role.trust_document("1")["Statement"][0]["Principal"]
        );
        assert_eq!(
            vec![
                "arn:aws:iam::1:policy/POC1-Lambda-Read-SQS".to_owned(),
                "arn:aws:iam::aws:policy/service-role/AmazonAPIGatewayPushToCloudWatchLogs"
                    .to_owned(),
            ],
            role.policy_arns("1")
        );
    }

    #[test]
    fn role_definition_from_toml() {
        let role: RoleDefinition = toml::from_str(
            r#"
            principal = { service = "lambda.amazonaws.com" }
            policies = ["POC1-Lambda-Write-DynamoDB"]
            tags = { Course = "C2W1" }
            "#,
        )
        .unwrap();
        assert_eq!(Principal::Service("lambda.amazonaws.com".into()), role.principal);
        assert!(role.managed_policies.is_empty());
        assert_eq!("C2W1", role.tags["Course"]);
    }
}
