//! Course 4, week 1: encrypting with a KMS key through an assumed role.
use lab::aws::{
    iam::{IamPolicy, IamRole, Principal, RoleDefinition},
    kms::{KeyDefinition, Kms},
    Session,
};
use lab::{Definitions, Project};

pub const PROJECT: &str = "C4W1-SecureArchitecture";
/// The project that runs with the role's credentials.
pub const RUNTIME: &str = "C4_W1_SecureArchitecture_RunTime";

pub const POLICY: &str = "C4W1-Kms-EncryptPolicy";
pub const ROLE: &str = "C4W1-Kms-EncryptRole";
pub const KEY: &str = "C4W1-Kms-Key";

/// Steps of the exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Step {
    Create,
    Delete,
    List,
    /// Create, then assume the role to encrypt and decrypt a message.
    Run,
}

pub fn policies() -> Definitions<serde_json::Value> {
    Definitions::from([(
        POLICY.to_owned(),
        serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                // Listing is needed to find keys by alias.
                "Action": [
                    "kms:Encrypt",
                    "kms:Decrypt",
                    "kms:DescribeKey",
                    "kms:ListKeys",
                    "kms:ListAliases",
                ],
                "Resource": "*",
            }]
        }),
    )])
}

pub fn roles() -> Definitions<RoleDefinition> {
    Definitions::from([(
        ROLE.to_owned(),
        RoleDefinition::new(Principal::CurrentAccount)
            .with_description("Encrypts and decrypts with the C4W1 key")
            .with_policy(POLICY),
    )])
}

pub fn keys(name: &str) -> Definitions<KeyDefinition> {
    Definitions::from([(
        name.to_owned(),
        KeyDefinition::new("KMS Key for C4W1")
            .with_tag("Context", "C4W1 Runner")
            .with_tag("Environment", "Development"),
    )])
}

pub fn project(session: Session, key: &str) -> Project<Session> {
    let mut project = Project::new(PROJECT, session);
    project
        .add_config(IamPolicy, Some(policies()))
        .add_config(IamRole, Some(roles()))
        .add_config(Kms, Some(keys(key)));
    project
}

/// A message sent through a key and back.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub key: String,
    pub ciphertext: Vec<u8>,
    pub plaintext: Vec<u8>,
}

impl RoundTrip {
    pub fn matches(&self, text: &str) -> bool {
        self.plaintext == text.as_bytes()
    }
}

/// Encrypts then decrypts `text` with `key` in `project`, which must
/// have a [`Kms`] config.
pub async fn round_trip(
    project: &mut Project<Session>,
    key: &str,
    text: &str,
) -> lab::Result<RoundTrip> {
    let (keys, session) = project.config_with_provider::<Kms>()?;
    let ciphertext = keys.encrypt(session, key, text.as_bytes()).await?;
    log::debug!("encrypted {} bytes into {}", text.len(), ciphertext.len());
    let plaintext = keys.decrypt(session, key, &ciphertext).await?;
    Ok(RoundTrip {
        key: key.to_owned(),
        ciphertext,
        plaintext,
    })
}

/// Runs the exercise with the role's credentials.
///
/// The role must already exist. IAM takes a few seconds to propagate a new
/// role, so assuming it right after it is created may be refused.
pub async fn run(session: &Session, key: &str, text: &str) -> lab::Result<RoundTrip> {
    let mut project = Project::assume(RUNTIME, ROLE, session).await?;
    project.add_config(Kms, None);
    round_trip(&mut project, key, text).await
}

/// Project for checking KMS end to end with a throwaway key.
pub const CHECK_PROJECT: &str = "Common-UnitTest";
pub const CHECK_KEY: &str = "Common-UnitTest-Kms-001";

pub fn check_project(session: Session) -> Project<Session> {
    let mut project = Project::new(CHECK_PROJECT, session);
    project.add_config(
        Kms,
        Some(Definitions::from([(
            CHECK_KEY.to_owned(),
            KeyDefinition::new("UnitTest KMS Test Key 001")
                .with_tag("Context", "Common-UnitTest-Kms")
                .with_tag("Environment", "UnitTest"),
        )])),
    );
    project
}
