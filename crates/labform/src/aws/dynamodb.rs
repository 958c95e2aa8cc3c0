//! AWS DynamoDB infrastructure.
use std::collections::BTreeMap;

use anyhow::Context;
use aws_sdk_dynamodb::{error::BuildError, types as aws};

use super::Session;
use crate::{Removal, ResourceAttributes, Service};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KeyType {
    Hash,
    Range,
}

impl From<KeyType> for aws::KeyType {
    fn from(value: KeyType) -> Self {
        match value {
            KeyType::Hash => aws::KeyType::Hash,
            KeyType::Range => aws::KeyType::Range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AttributeType {
    Binary,
    Number,
    String,
}

impl From<AttributeType> for aws::ScalarAttributeType {
    fn from(value: AttributeType) -> Self {
        match value {
            AttributeType::Binary => aws::ScalarAttributeType::B,
            AttributeType::Number => aws::ScalarAttributeType::N,
            AttributeType::String => aws::ScalarAttributeType::S,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
    pub attribute_type: AttributeType,
}

impl TryFrom<&KeySchemaElement> for aws::KeySchemaElement {
    type Error = BuildError;

    fn try_from(value: &KeySchemaElement) -> Result<Self, Self::Error> {
        aws::KeySchemaElement::builder()
            .attribute_name(value.attribute_name.clone())
            .key_type(value.key_type.into())
            .build()
    }
}

impl TryFrom<&KeySchemaElement> for aws::AttributeDefinition {
    type Error = BuildError;

    fn try_from(value: &KeySchemaElement) -> Result<Self, Self::Error> {
        aws::AttributeDefinition::builder()
            .attribute_name(value.attribute_name.clone())
            .attribute_type(value.attribute_type.into())
            .build()
    }
}

impl KeySchemaElement {
    pub fn partition_key(name: impl Into<String>, type_is: AttributeType) -> Self {
        KeySchemaElement {
            attribute_name: name.into(),
            key_type: KeyType::Hash,
            attribute_type: type_is,
        }
    }

    pub fn sort_key(name: impl Into<String>, type_is: AttributeType) -> Self {
        KeySchemaElement {
            attribute_name: name.into(),
            key_type: KeyType::Range,
            attribute_type: type_is,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TableClass {
    #[default]
    Standard,
    StandardInfrequentAccess,
}

impl From<TableClass> for aws::TableClass {
    fn from(value: TableClass) -> Self {
        match value {
            TableClass::Standard => aws::TableClass::Standard,
            TableClass::StandardInfrequentAccess => aws::TableClass::StandardInfrequentAccess,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BillingMode {
    PayPerRequest,
    Provisioned {
        read_capacity_units: i64,
        write_capacity_units: i64,
    },
}

impl Default for BillingMode {
    fn default() -> Self {
        BillingMode::Provisioned {
            read_capacity_units: 5,
            write_capacity_units: 5,
        }
    }
}

impl From<BillingMode> for aws::BillingMode {
    fn from(value: BillingMode) -> Self {
        match value {
            BillingMode::PayPerRequest => aws::BillingMode::PayPerRequest,
            BillingMode::Provisioned { .. } => aws::BillingMode::Provisioned,
        }
    }
}

impl BillingMode {
    fn provisioned_throughput(&self) -> Result<Option<aws::ProvisionedThroughput>, BuildError> {
        match self {
            BillingMode::PayPerRequest => Ok(None),
            BillingMode::Provisioned {
                read_capacity_units,
                write_capacity_units,
            } => aws::ProvisionedThroughput::builder()
                .read_capacity_units(*read_capacity_units)
                .write_capacity_units(*write_capacity_units)
                .build()
                .map(Some),
        }
    }
}

/// What a table's stream records carry.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StreamViewType {
    KeysOnly,
    NewImage,
    OldImage,
    NewAndOldImages,
}

impl From<StreamViewType> for aws::StreamViewType {
    fn from(value: StreamViewType) -> Self {
        match value {
            StreamViewType::KeysOnly => aws::StreamViewType::KeysOnly,
            StreamViewType::NewImage => aws::StreamViewType::NewImage,
            StreamViewType::OldImage => aws::StreamViewType::OldImage,
            StreamViewType::NewAndOldImages => aws::StreamViewType::NewAndOldImages,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableDefinition {
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default)]
    pub table_class: TableClass,
    #[serde(default)]
    pub billing_mode: BillingMode,
    /// Enables the table's stream when set.
    #[serde(default)]
    pub stream: Option<StreamViewType>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableAttributes {
    pub arn: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_arn: Option<String>,
}

impl ResourceAttributes for TableAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

impl TryFrom<aws::TableDescription> for TableAttributes {
    type Error = anyhow::Error;

    fn try_from(table: aws::TableDescription) -> Result<Self, Self::Error> {
        Ok(TableAttributes {
            arn: table.table_arn.context("table missing arn")?,
            status: table
                .table_status
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default(),
            stream_arn: table.latest_stream_arn,
        })
    }
}

/// DynamoDB tables.
pub struct Table;

impl Service for Table {
    type Provider = Session;
    type Definition = TableDefinition;
    type Attributes = TableAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "table";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, TableAttributes>> {
        let client = aws_sdk_dynamodb::Client::new(session.as_ref());
        let names = client
            .list_tables()
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .context("could not list tables")?;
        let mut tables = BTreeMap::default();
        for name in names {
            let table = describe(session, &name).await?;
            tables.insert(name, TableAttributes::try_from(table)?);
        }
        Ok(tables)
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        table: &TableDefinition,
    ) -> anyhow::Result<TableAttributes> {
        let client = aws_sdk_dynamodb::Client::new(session.as_ref());
        let stream = table
            .stream
            .map(|view_type| {
                aws::StreamSpecification::builder()
                    .stream_enabled(true)
                    .stream_view_type(view_type.into())
                    .build()
            })
            .transpose()?;
        let out = client
            .create_table()
            .table_name(name)
            .table_class(table.table_class.into())
            .billing_mode(table.billing_mode.into())
            .set_provisioned_throughput(table.billing_mode.provisioned_throughput()?)
            .set_key_schema(Some(
                table
                    .key_schema
                    .iter()
                    .map(aws::KeySchemaElement::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ))
            .set_attribute_definitions(Some(
                table
                    .key_schema
                    .iter()
                    .map(aws::AttributeDefinition::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ))
            .set_stream_specification(stream)
            .send()
            .await?;
        let description = out.table_description.context("missing table description")?;
        log::info!(
            "table {name} {} creation started",
            description.table_arn().unwrap_or_default()
        );
        finalize(session, name).await?.try_into()
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &TableDefinition,
        _: Option<&TableAttributes>,
    ) -> anyhow::Result<Removal> {
        let client = aws_sdk_dynamodb::Client::new(session.as_ref());
        match client.delete_table().table_name(name).send().await {
            Ok(_) => {
                log::info!("...deleted table {name}");
                Ok(Removal::Deleted)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or_default() =>
            {
                Ok(Removal::Absent)
            }
            Err(e) => Err(e).context("could not delete table"),
        }
    }
}

pub async fn describe(session: &Session, name: &str) -> anyhow::Result<aws::TableDescription> {
    let client = aws_sdk_dynamodb::Client::new(session.as_ref());
    client
        .describe_table()
        .table_name(name)
        .send()
        .await
        .with_context(|| format!("could not describe table {name}"))?
        .table
        .context("missing table description")
}

/// Returns the ARN of the named table's latest stream.
pub async fn stream_arn(session: &Session, name: &str) -> anyhow::Result<String> {
    describe(session, name)
        .await?
        .latest_stream_arn
        .with_context(|| format!("table {name} has no stream"))
}

/// Waits until the named table is `ACTIVE`.
pub async fn finalize(session: &Session, name: &str) -> anyhow::Result<aws::TableDescription> {
    // timeout after 5 minutes
    let timeout_secs = 60 * 5;
    let start = std::time::Instant::now();
    log::info!("awaiting table {name} finalization");
    loop {
        let table = describe(session, name).await?;
        if table.table_status == Some(aws::TableStatus::Active) {
            return Ok(table);
        }
        anyhow::ensure!(
            table.table_status == Some(aws::TableStatus::Creating),
            "table finalization failed, table status: {:?}",
            table.table_status
        );
        if start.elapsed().as_secs() >= timeout_secs {
            anyhow::bail!("finalization timed out after {timeout_secs} seconds");
        }
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    }
}
