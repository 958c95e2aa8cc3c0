//! Labform for AWS.
use std::sync::Arc;

use anyhow::Context;
use aws_config::{sts::AssumeRoleProvider, BehaviorVersion, Region};

pub use aws_config::SdkConfig;

use crate::{utils, Config, Error, MissingRoleSnafu, Project, Result};

pub mod apigateway;
pub mod dynamodb;
pub mod iam;
pub mod kms;
pub mod lambda;
pub mod manifest;
pub mod sns;
pub mod sqs;

/// An AWS SDK configuration plus the facts about the caller that resource
/// kinds need to build ARNs.
///
/// Cloning is cheap and clones share the cached account id.
#[derive(Clone, Debug)]
pub struct Session {
    sdk: SdkConfig,
    account_id: Arc<tokio::sync::OnceCell<String>>,
}

impl AsRef<SdkConfig> for Session {
    fn as_ref(&self) -> &SdkConfig {
        &self.sdk
    }
}

impl From<SdkConfig> for Session {
    fn from(sdk: SdkConfig) -> Self {
        Session::from_sdk_config(sdk)
    }
}

impl Session {
    /// Loads the default credential and region chain, with optional
    /// overrides.
    pub async fn load(region: Option<String>, profile: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        Session::from_sdk_config(loader.load().await)
    }

    pub fn from_sdk_config(sdk: SdkConfig) -> Self {
        Session {
            sdk,
            account_id: Default::default(),
        }
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk
    }

    pub fn region(&self) -> anyhow::Result<&str> {
        self.sdk
            .region()
            .map(|r| r.as_ref())
            .context("no AWS region configured, set AWS_REGION or pass --region")
    }

    /// Returns the id of the account the session's credentials belong to.
    ///
    /// Asks STS once, later calls return the cached value.
    pub async fn account_id(&self) -> anyhow::Result<String> {
        let account = self
            .account_id
            .get_or_try_init(|| async {
                let client = aws_sdk_sts::Client::new(&self.sdk);
                let out = client
                    .get_caller_identity()
                    .send()
                    .await
                    .context("could not get caller identity")?;
                log::debug!("caller identity: {:?}", out.arn());
                out.account.context("caller identity is missing the account")
            })
            .await?;
        Ok(account.clone())
    }

    /// Returns a session whose credentials come from assuming `role_arn`.
    ///
    /// The credentials are fetched lazily, so a role that cannot be assumed
    /// surfaces on the first call made with the new session.
    pub async fn assume_role(&self, role_arn: &str, session_name: &str) -> Session {
        log::info!("assuming role {role_arn} as '{session_name}'");
        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(session_name)
            .configure(&self.sdk)
            .build()
            .await;
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).credentials_provider(provider);
        if let Some(region) = self.sdk.region().cloned() {
            loader = loader.region(region);
        }
        Session::from_sdk_config(loader.load().await)
    }
}

impl Project<Session> {
    /// Creates a project whose configs act through the role `role_name`.
    ///
    /// The role is looked up with `base`, which must be allowed to assume it.
    pub async fn assume(name: impl Into<String>, role_name: &str, base: &Session) -> Result<Self> {
        let name = name.into();
        let mut roles = Config::new(iam::IamRole, None);
        let role_arn = match roles.arn(base, role_name).await {
            Ok(arn) => arn,
            Err(Error::MissingResource { .. }) => {
                return MissingRoleSnafu {
                    project: name,
                    role: role_name,
                }
                .fail()
            }
            Err(e) => return Err(e),
        };
        let session = base.assume_role(&role_arn, &session_name(&name)).await;
        Ok(Project::new(name, session))
    }
}

/// Role session names only allow `[\w+=,.@-]`.
fn session_name(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(64)
        .collect()
}

/// A definition value that names another resource, resolved to an
/// identifier when the definition is created.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    Literal(String),
    /// ARN of the named IAM role.
    Role(String),
    /// ARN of the named customer managed IAM policy.
    Policy(String),
    /// ARN of the named SQS queue.
    Queue(String),
    /// `<account>/<queue>`, the path of a queue in an API Gateway service
    /// integration URI.
    QueuePath(String),
    /// ARN of the named SNS topic.
    Topic(String),
    /// ARN of the named DynamoDB table.
    Table(String),
    /// ARN of the latest stream of the named DynamoDB table.
    TableStream(String),
    /// Id of the session's account.
    Account,
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Reference::Literal(value.to_owned())
    }
}

impl core::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Literal(s) => write!(f, "{s}"),
            Reference::Role(s) => write!(f, "role:{s}"),
            Reference::Policy(s) => write!(f, "policy:{s}"),
            Reference::Queue(s) => write!(f, "queue:{s}"),
            Reference::QueuePath(s) => write!(f, "queue-path:{s}"),
            Reference::Topic(s) => write!(f, "topic:{s}"),
            Reference::Table(s) => write!(f, "table:{s}"),
            Reference::TableStream(s) => write!(f, "table-stream:{s}"),
            Reference::Account => write!(f, "account"),
        }
    }
}

impl Reference {
    pub async fn resolve(&self, session: &Session) -> anyhow::Result<String> {
        let value = match self {
            Reference::Literal(s) => s.clone(),
            Reference::Role(name) => iam::role_arn(session, name).await?,
            Reference::Policy(name) => {
                utils::customer_policy_arn(&session.account_id().await?, name)
            }
            Reference::Queue(name) => sqs::queue_arn(session, name).await?,
            Reference::QueuePath(name) => format!("{}/{name}", session.account_id().await?),
            Reference::Topic(name) => sns::topic_arn(session, name).await?,
            Reference::Table(name) => dynamodb::describe(session, name)
                .await?
                .table_arn
                .with_context(|| format!("table {name} is missing its arn"))?,
            Reference::TableStream(name) => dynamodb::stream_arn(session, name).await?,
            Reference::Account => session.account_id().await?,
        };
        log::trace!("resolved {self} to {value}");
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_names_are_sanitized() {
        assert_eq!("C4W1-Runner", session_name("C4W1 Runner"));
        assert_eq!("a_b.c@d", session_name("a_b.c@d"));
        assert_eq!(64, session_name(&"x".repeat(100)).len());
    }

    #[test]
    fn reference_from_toml() {
        #[derive(serde::Deserialize)]
        struct Refs {
            role: Reference,
            account: Reference,
            literal: Reference,
        }
        let refs: Refs = toml::from_str(
            r#"
            role = { role = "POC1-APIGateway-SQS" }
            account = "account"
            literal = { literal = "arn:aws:iam::aws:policy/ReadOnlyAccess" }
            "#,
        )
        .unwrap();
        assert_eq!(Reference::Role("POC1-APIGateway-SQS".to_owned()), refs.role);
        assert_eq!(Reference::Account, refs.account);
        assert_eq!(
            Reference::from("arn:aws:iam::aws:policy/ReadOnlyAccess"),
            refs.literal
        );
    }
}
