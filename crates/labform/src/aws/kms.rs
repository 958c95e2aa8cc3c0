//! AWS KMS keys, named by alias.
use std::collections::BTreeMap;

use anyhow::Context;
use aws_sdk_kms::{primitives::Blob, types as aws};

use super::Session;
use crate::{Config, Error, Removal, ResourceAttributes, Result, Service};

/// Days a deleted key stays pending deletion, the shortest window KMS allows.
pub const PENDING_WINDOW_DAYS: i32 = 7;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyUsage {
    #[default]
    EncryptDecrypt,
    SignVerify,
    GenerateVerifyMac,
}

impl From<KeyUsage> for aws::KeyUsageType {
    fn from(value: KeyUsage) -> Self {
        match value {
            KeyUsage::EncryptDecrypt => aws::KeyUsageType::EncryptDecrypt,
            KeyUsage::SignVerify => aws::KeyUsageType::SignVerify,
            KeyUsage::GenerateVerifyMac => aws::KeyUsageType::GenerateVerifyMac,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    #[default]
    AwsKms,
    External,
}

impl From<Origin> for aws::OriginType {
    fn from(value: Origin) -> Self {
        match value {
            Origin::AwsKms => aws::OriginType::AwsKms,
            Origin::External => aws::OriginType::External,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeySpec {
    #[default]
    #[serde(rename = "SYMMETRIC_DEFAULT")]
    SymmetricDefault,
    #[serde(rename = "RSA_2048")]
    Rsa2048,
    #[serde(rename = "RSA_4096")]
    Rsa4096,
    #[serde(rename = "ECC_NIST_P256")]
    EccNistP256,
    #[serde(rename = "HMAC_256")]
    Hmac256,
}

impl From<KeySpec> for aws::KeySpec {
    fn from(value: KeySpec) -> Self {
        match value {
            KeySpec::SymmetricDefault => aws::KeySpec::SymmetricDefault,
            KeySpec::Rsa2048 => aws::KeySpec::Rsa2048,
            KeySpec::Rsa4096 => aws::KeySpec::Rsa4096,
            KeySpec::EccNistP256 => aws::KeySpec::EccNistP256,
            KeySpec::Hmac256 => aws::KeySpec::Hmac256,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyDefinition {
    pub description: String,
    #[serde(default)]
    pub key_usage: KeyUsage,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub key_spec: KeySpec,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl KeyDefinition {
    pub fn new(description: impl Into<String>) -> Self {
        KeyDefinition {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyAttributes {
    pub arn: String,
    pub key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_arn: Option<String>,
}

impl ResourceAttributes for KeyAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

fn alias_name(name: &str) -> String {
    format!("alias/{name}")
}

/// KMS keys.
///
/// Keys are named by their alias without the `alias/` prefix. Keys without
/// an alias are listed under their key id.
pub struct Kms;

impl Service for Kms {
    type Provider = Session;
    type Definition = KeyDefinition;
    type Attributes = KeyAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "key";

    async fn do_list(&self, session: &Session) -> anyhow::Result<BTreeMap<String, KeyAttributes>> {
        let client = aws_sdk_kms::Client::new(session.as_ref());

        let mut keys = vec![];
        let mut marker = None;
        loop {
            let out = client
                .list_keys()
                .set_marker(marker)
                .send()
                .await
                .context("could not list keys")?;
            keys.extend(out.keys.unwrap_or_default());
            if !out.truncated {
                break;
            }
            marker = out.next_marker;
        }

        let mut aliases = vec![];
        let mut marker = None;
        loop {
            let out = client
                .list_aliases()
                .set_marker(marker)
                .send()
                .await
                .context("could not list aliases")?;
            aliases.extend(out.aliases.unwrap_or_default());
            if !out.truncated {
                break;
            }
            marker = out.next_marker;
        }

        Ok(named_keys(keys, aliases))
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        key: &KeyDefinition,
    ) -> anyhow::Result<KeyAttributes> {
        let client = aws_sdk_kms::Client::new(session.as_ref());
        let tags = key
            .tags
            .iter()
            .map(|(k, v)| aws::Tag::builder().tag_key(k).tag_value(v).build())
            .collect::<Result<Vec<_>, _>>()?;
        let metadata = client
            .create_key()
            .description(&key.description)
            .key_usage(key.key_usage.into())
            .origin(key.origin.into())
            .key_spec(key.key_spec.into())
            .set_tags(if tags.is_empty() { None } else { Some(tags) })
            .send()
            .await?
            .key_metadata
            .context("no key metadata")?;
        let arn = metadata.arn.context("missing arn from key creation")?;
        log::info!("...created key {arn}");

        client
            .create_alias()
            .alias_name(alias_name(name))
            .target_key_id(&metadata.key_id)
            .send()
            .await
            .with_context(|| {
                format!(
                    "key {} was created but could not be named {name}",
                    metadata.key_id
                )
            })?;
        log::info!("...named key {} {name}", metadata.key_id);

        Ok(KeyAttributes {
            arn,
            key_id: metadata.key_id,
            alias_arn: None,
        })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &KeyDefinition,
        existing: Option<&KeyAttributes>,
    ) -> anyhow::Result<Removal> {
        let client = aws_sdk_kms::Client::new(session.as_ref());
        let key_id = match existing {
            Some(key) => key.key_id.clone(),
            None => match client.describe_key().key_id(alias_name(name)).send().await {
                Ok(out) => out.key_metadata.context("no key metadata")?.key_id,
                Err(e)
                    if e.as_service_error()
                        .map(|e| e.is_not_found_exception())
                        .unwrap_or_default() =>
                {
                    return Ok(Removal::Absent)
                }
                Err(e) => return Err(e).context("could not describe key"),
            },
        };

        if existing.map_or(true, |key| key.key_id != name) {
            client
                .delete_alias()
                .alias_name(alias_name(name))
                .send()
                .await
                .with_context(|| format!("could not delete alias of key {name}"))?;
        }

        match client
            .schedule_key_deletion()
            .key_id(&key_id)
            .pending_window_in_days(PENDING_WINDOW_DAYS)
            .send()
            .await
        {
            Ok(out) => {
                log::info!(
                    "...scheduled deletion of key {name} ({key_id}) on {:?}",
                    out.deletion_date
                );
                Ok(Removal::Deleted)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_not_found_exception() || e.is_kms_invalid_state_exception())
                    .unwrap_or_default() =>
            {
                log::warn!("key {name} ({key_id}) does not exist or is already pending deletion");
                Ok(Removal::Absent)
            }
            Err(e) => Err(e).context("could not schedule key deletion"),
        }
    }
}

/// Names keys by their aliases, without the `alias/` prefix.
///
/// A key with several aliases appears once per alias. A key without an alias
/// is named by its key id. Aliases that target no listed key are dropped.
pub fn named_keys(
    keys: Vec<aws::KeyListEntry>,
    aliases: Vec<aws::AliasListEntry>,
) -> BTreeMap<String, KeyAttributes> {
    // key id -> aliases
    let mut by_key: BTreeMap<String, Vec<aws::AliasListEntry>> = BTreeMap::default();
    for alias in aliases {
        if let Some(key_id) = alias.target_key_id.clone() {
            by_key.entry(key_id).or_default().push(alias);
        }
    }

    let mut resources = BTreeMap::default();
    for key in keys {
        let (Some(key_id), Some(arn)) = (key.key_id, key.key_arn) else {
            continue;
        };
        match by_key.remove(&key_id) {
            None => {
                resources.insert(
                    key_id.clone(),
                    KeyAttributes {
                        arn,
                        key_id,
                        alias_arn: None,
                    },
                );
            }
            Some(key_aliases) => {
                for alias in key_aliases {
                    let Some(alias_name) = alias.alias_name else {
                        continue;
                    };
                    let name = alias_name
                        .strip_prefix("alias/")
                        .unwrap_or(&alias_name)
                        .to_owned();
                    resources.insert(
                        name,
                        KeyAttributes {
                            arn: arn.clone(),
                            key_id: key_id.clone(),
                            alias_arn: alias.alias_arn,
                        },
                    );
                }
            }
        }
    }
    resources
}

impl Config<Kms> {
    /// Encrypts `plaintext` with the named key.
    pub async fn encrypt(
        &mut self,
        session: &Session,
        name: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let key_arn = self.arn(session, name).await?;
        let client = aws_sdk_kms::Client::new(session.as_ref());
        let result: anyhow::Result<Vec<u8>> = async {
            let out = client
                .encrypt()
                .key_id(&key_arn)
                .plaintext(Blob::new(plaintext))
                .send()
                .await?;
            Ok(out.ciphertext_blob.context("no ciphertext")?.into_inner())
        }
        .await;
        result.map_err(|error| Error::Encrypt {
            name: name.to_owned(),
            error: Box::new(error),
        })
    }

    /// Decrypts `ciphertext` that was encrypted with the named key.
    pub async fn decrypt(
        &mut self,
        session: &Session,
        name: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let key_arn = self.arn(session, name).await?;
        let client = aws_sdk_kms::Client::new(session.as_ref());
        let result: anyhow::Result<Vec<u8>> = async {
            let out = client
                .decrypt()
                .key_id(&key_arn)
                .ciphertext_blob(Blob::new(ciphertext))
                .send()
                .await?;
            Ok(out.plaintext.context("no plaintext")?.into_inner())
        }
        .await;
        result.map_err(|error| Error::Decrypt {
            name: name.to_owned(),
            error: Box::new(error),
        })
    }
}
