//! AWS Lambda infrastructure.
use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use aws_sdk_lambda::{
    primitives::Blob,
    types::{Environment, EventSourcePosition, FunctionCode, Runtime, State},
};

use super::{Reference, Session};
use crate::{utils, Removal, ResourceAttributes, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
    Latest,
    TrimHorizon,
}

impl From<StartingPosition> for EventSourcePosition {
    fn from(value: StartingPosition) -> Self {
        match value {
            StartingPosition::Latest => EventSourcePosition::Latest,
            StartingPosition::TrimHorizon => EventSourcePosition::TrimHorizon,
        }
    }
}

/// An event source that invokes the function.
///
/// Creating a trigger grants the principal permission to invoke the function
/// and maps the source to the function.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trigger {
    /// Eg "sqs.amazonaws.com"
    pub principal: String,
    pub source: Reference,
    #[serde(default)]
    pub batch_size: Option<i32>,
    /// Required for stream sources, not allowed for queues.
    #[serde(default)]
    pub starting_position: Option<StartingPosition>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDefinition {
    /// Eg "python3.9"
    pub runtime: String,
    /// Eg "save_order_record.lambda_handler"
    pub handler: String,
    /// ARN of the execution role, usually a [`Reference::Role`].
    pub role: Reference,
    /// Source files by name, zipped when the function is created.
    pub sources: BTreeMap<String, String>,
    #[serde(default)]
    pub triggers: BTreeMap<String, Trigger>,
    #[serde(default)]
    pub environment: BTreeMap<String, Reference>,
    #[serde(default)]
    pub timeout: Option<i32>,
}

impl FunctionDefinition {
    /// Zips the sources, returning the archive and its digest in the
    /// format Lambda reports.
    pub fn package(&self) -> anyhow::Result<(Vec<u8>, String)> {
        let zip = utils::zip_sources(
            self.sources
                .iter()
                .map(|(name, contents)| (name.as_str(), contents.as_str())),
        )?;
        let sha256 = utils::sha256_base64(&zip);
        Ok((zip, sha256))
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionAttributes {
    pub arn: String,
    pub runtime: String,
    pub handler: String,
    pub code_sha256: String,
}

impl ResourceAttributes for FunctionAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

/// Lambda functions deployed from inline sources.
pub struct Function;

impl Service for Function {
    type Provider = Session;
    type Definition = FunctionDefinition;
    type Attributes = FunctionAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "function";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, FunctionAttributes>> {
        let client = aws_sdk_lambda::Client::new(session.as_ref());
        let functions = client
            .list_functions()
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .context("could not list functions")?;
        Ok(functions
            .into_iter()
            .filter_map(|f| {
                let attributes = FunctionAttributes {
                    arn: f.function_arn?,
                    runtime: f.runtime.map(|r| r.as_str().to_owned()).unwrap_or_default(),
                    handler: f.handler.unwrap_or_default(),
                    code_sha256: f.code_sha256.unwrap_or_default(),
                };
                Some((f.function_name?, attributes))
            })
            .collect())
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        function: &FunctionDefinition,
    ) -> anyhow::Result<FunctionAttributes> {
        let client = aws_sdk_lambda::Client::new(session.as_ref());
        let role_arn = function.role.resolve(session).await?;
        let (zip, sha256) = function.package()?;
        log::debug!("sending {} bytes of code", zip.len());

        let mut variables = HashMap::new();
        for (key, value) in function.environment.iter() {
            variables.insert(key.clone(), value.resolve(session).await?);
        }

        let out = client
            .create_function()
            .function_name(name)
            .runtime(Runtime::from(function.runtime.as_str()))
            .role(role_arn)
            .handler(&function.handler)
            .code(FunctionCode::builder().zip_file(Blob::new(zip)).build())
            .set_environment(if variables.is_empty() {
                None
            } else {
                Some(Environment::builder().set_variables(Some(variables)).build())
            })
            .set_timeout(function.timeout)
            .send()
            .await?;
        let arn = out.function_arn.context("missing arn")?;
        let code_sha256 = out.code_sha256.unwrap_or_default();
        anyhow::ensure!(
            code_sha256 == sha256,
            "uploaded code digest {code_sha256} does not match the local digest {sha256}"
        );
        log::info!("...created lambda {name}");

        if !function.triggers.is_empty() {
            finalize(session, name).await?;
        }
        for (key, trigger) in function.triggers.iter() {
            let source_arn = trigger.source.resolve(session).await?;
            let out = client
                .add_permission()
                .function_name(name)
                .statement_id(format!("{name}-{key}"))
                .action("lambda:InvokeFunction")
                .principal(&trigger.principal)
                .source_arn(&source_arn)
                .send()
                .await
                .with_context(|| format!("could not add permission for trigger {key}"))?;
            log::debug!("added permission:\n{:#?}", out.statement());
            let mapping = client
                .create_event_source_mapping()
                .event_source_arn(&source_arn)
                .function_name(name)
                .enabled(true)
                .set_batch_size(trigger.batch_size)
                .set_starting_position(trigger.starting_position.map(Into::into))
                .send()
                .await
                .with_context(|| format!("could not map trigger {key}"))?;
            log::info!(
                "...mapped {source_arn} to lambda {name} ({})",
                mapping.uuid().unwrap_or_default()
            );
        }

        Ok(FunctionAttributes {
            arn,
            runtime: function.runtime.clone(),
            handler: function.handler.clone(),
            code_sha256,
        })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &FunctionDefinition,
        _: Option<&FunctionAttributes>,
    ) -> anyhow::Result<Removal> {
        let client = aws_sdk_lambda::Client::new(session.as_ref());
        let mappings = client
            .list_event_source_mappings()
            .function_name(name)
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await;
        match mappings {
            Ok(mappings) => {
                for uuid in mappings.iter().filter_map(|m| m.uuid()) {
                    // A mapping that is still being created reports ResourceInUse.
                    client
                        .delete_event_source_mapping()
                        .uuid(uuid)
                        .send()
                        .await
                        .with_context(|| format!("could not delete event source mapping {uuid}"))?;
                    log::info!("...deleted event source mapping {uuid}");
                }
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or_default() => {}
            Err(e) => return Err(e).context("could not list event source mappings"),
        }

        match client.delete_function().function_name(name).send().await {
            Ok(_) => {
                log::info!("...deleted lambda {name}");
                Ok(Removal::Deleted)
            }
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or_default() =>
            {
                Ok(Removal::Absent)
            }
            Err(e) => Err(e).context("could not delete function"),
        }
    }
}

/// Waits until the named function leaves the `Pending` state.
pub async fn finalize(session: &Session, name: &str) -> anyhow::Result<()> {
    let client = aws_sdk_lambda::Client::new(session.as_ref());
    // timeout after 5 minutes
    let timeout_secs = 60 * 5;
    let start = std::time::Instant::now();
    log::info!("awaiting lambda {name} finalization");
    loop {
        let out = client
            .get_function_configuration()
            .function_name(name)
            .send()
            .await?;
        match out.state {
            Some(State::Active) => return Ok(()),
            Some(State::Pending) | None => {}
            Some(state) => anyhow::bail!(
                "lambda {name} is {state:?}: {}",
                out.state_reason.unwrap_or_else(|| "unknown".to_string())
            ),
        }
        if start.elapsed().as_secs() >= timeout_secs {
            anyhow::bail!("finalization timed out after {timeout_secs} seconds");
        }
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    }
}
