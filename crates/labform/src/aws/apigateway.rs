//! AWS API Gateway REST APIs fronting AWS service integrations.
//!
//! These are the V1 ("REST") APIs. HTTP and WebSocket APIs live in a
//! different namespace and are not covered here.
use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use aws_sdk_apigateway::types::{EndpointConfiguration, IntegrationType};

use super::{Reference, Session};
use crate::{Removal, ResourceAttributes, Service};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
    Edge,
    #[default]
    Regional,
    Private,
}

impl From<EndpointType> for aws_sdk_apigateway::types::EndpointType {
    fn from(value: EndpointType) -> Self {
        match value {
            EndpointType::Edge => aws_sdk_apigateway::types::EndpointType::Edge,
            EndpointType::Regional => aws_sdk_apigateway::types::EndpointType::Regional,
            EndpointType::Private => aws_sdk_apigateway::types::EndpointType::Private,
        }
    }
}

/// An AWS service integration, eg. sending the request body to an SQS
/// queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Integration {
    /// Eg "sqs"
    pub service: String,
    /// The method used to call the service, not necessarily the same as
    /// the method of the request.
    pub http_method: String,
    /// The path appended to the service endpoint, eg. `<account>/<queue>`.
    pub path: Reference,
    /// Defaults to the session's region.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    /// ARN of the role API Gateway assumes to call the service.
    #[serde(default)]
    pub credentials: Option<Reference>,
    #[serde(default)]
    pub timeout_in_millis: Option<i32>,
    /// `WHEN_NO_MATCH`, `WHEN_NO_TEMPLATES` or `NEVER`.
    #[serde(default)]
    pub passthrough_behavior: Option<String>,
    #[serde(default)]
    pub request_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub request_templates: BTreeMap<String, String>,
}

/// The URI of an AWS service integration.
pub fn service_uri(region: &str, service: &str, subdomain: Option<&str>, path: &str) -> String {
    let host = match subdomain.filter(|s| !s.is_empty()) {
        Some(subdomain) => format!("{subdomain}.{service}"),
        None => service.to_owned(),
    };
    format!(
        "arn:aws:apigateway:{region}:{host}:path/{}",
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MethodResponse {
    /// Content type to model name, eg. `application/json = "Empty"`.
    #[serde(default)]
    pub response_models: BTreeMap<String, String>,
    /// Content type to the integration response mapping template.
    #[serde(default)]
    pub response_templates: BTreeMap<String, String>,
}

fn no_authorization() -> String {
    "NONE".to_owned()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Method {
    #[serde(default = "no_authorization")]
    pub authorization_type: String,
    pub integration: Integration,
    /// Responses by status code.
    #[serde(default)]
    pub responses: BTreeMap<String, MethodResponse>,
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RestApiDefinition {
    #[serde(default)]
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub description: Option<String>,
    /// Deploys the API to this stage after creating it.
    #[serde(default)]
    pub stage: Option<String>,
    /// Methods by HTTP method, by resource path.
    pub resources: BTreeMap<String, BTreeMap<String, Method>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestApiAttributes {
    pub arn: String,
    pub id: String,
    pub root_resource_id: String,
}

impl ResourceAttributes for RestApiAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

fn to_hash_map(map: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone().into_iter().collect())
    }
}

/// Returns the parent path and last part of a resource path.
///
/// `/orders/{id}` gives `("/orders", "{id}")`.
fn split_path(path: &str) -> Option<(String, &str)> {
    let path = path.trim_end_matches('/');
    let (parent, part) = path.rsplit_once('/')?;
    if part.is_empty() {
        return None;
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Some((parent.to_owned(), part))
}

async fn list_apis(session: &Session) -> anyhow::Result<Vec<aws_sdk_apigateway::types::RestApi>> {
    let client = aws_sdk_apigateway::Client::new(session.as_ref());
    let mut apis = vec![];
    let mut position = None;
    loop {
        let out = client
            .get_rest_apis()
            .set_position(position)
            .send()
            .await
            .context("could not list rest apis")?;
        apis.extend(out.items.unwrap_or_default());
        position = out.position;
        if position.is_none() {
            break;
        }
    }
    Ok(apis)
}

/// API Gateway REST APIs.
pub struct RestApi;

impl RestApi {
    /// Creates the resource at `path`, and any missing parents.
    async fn resource_id(
        client: &aws_sdk_apigateway::Client,
        api_id: &str,
        resources: &mut BTreeMap<String, String>,
        path: &str,
    ) -> anyhow::Result<String> {
        if let Some(id) = resources.get(path) {
            return Ok(id.clone());
        }
        let (parent, part) =
            split_path(path).with_context(|| format!("invalid resource path '{path}'"))?;
        let parent_id = Box::pin(Self::resource_id(client, api_id, resources, &parent)).await?;
        let id = client
            .create_resource()
            .rest_api_id(api_id)
            .parent_id(parent_id)
            .path_part(part)
            .send()
            .await
            .with_context(|| format!("could not create resource {path}"))?
            .id
            .context("missing resource id")?;
        log::info!("...created resource {path} ({id})");
        resources.insert(path.to_owned(), id.clone());
        Ok(id)
    }
}

impl Service for RestApi {
    type Provider = Session;
    type Definition = RestApiDefinition;
    type Attributes = RestApiAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "api";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, RestApiAttributes>> {
        let region = session.region()?;
        Ok(list_apis(session)
            .await?
            .into_iter()
            .filter_map(|api| {
                let id = api.id?;
                let attributes = RestApiAttributes {
                    arn: format!("arn:aws:apigateway:{region}::/restapis/{id}"),
                    root_resource_id: api.root_resource_id.unwrap_or_default(),
                    id,
                };
                Some((api.name?, attributes))
            })
            .collect())
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        api: &RestApiDefinition,
    ) -> anyhow::Result<RestApiAttributes> {
        let region = session.region()?.to_owned();
        let client = aws_sdk_apigateway::Client::new(session.as_ref());
        let out = client
            .create_rest_api()
            .name(name)
            .set_description(api.description.clone())
            .endpoint_configuration(
                EndpointConfiguration::builder()
                    .types(api.endpoint_type.into())
                    .build(),
            )
            .send()
            .await?;
        let id = out.id.context("missing rest api id")?;
        let root_resource_id = out.root_resource_id.context("missing root resource id")?;
        log::info!("...created rest api {name} ({id})");

        let mut resources = BTreeMap::from([("/".to_owned(), root_resource_id.clone())]);
        for (path, methods) in api.resources.iter() {
            let resource_id = Self::resource_id(&client, &id, &mut resources, path).await?;
            for (http_method, method) in methods.iter() {
                client
                    .put_method()
                    .rest_api_id(&id)
                    .resource_id(&resource_id)
                    .http_method(http_method)
                    .authorization_type(&method.authorization_type)
                    .send()
                    .await
                    .with_context(|| format!("could not put method {http_method} {path}"))?;

                let integration = &method.integration;
                let uri = service_uri(
                    integration.region.as_deref().unwrap_or(&region),
                    &integration.service,
                    integration.subdomain.as_deref(),
                    &integration.path.resolve(session).await?,
                );
                let credentials = match integration.credentials.as_ref() {
                    Some(reference) => Some(reference.resolve(session).await?),
                    None => None,
                };
                log::debug!("integrating {http_method} {path} with {uri}");
                client
                    .put_integration()
                    .rest_api_id(&id)
                    .resource_id(&resource_id)
                    .http_method(http_method)
                    .r#type(IntegrationType::Aws)
                    .integration_http_method(&integration.http_method)
                    .uri(uri)
                    .set_credentials(credentials)
                    .set_timeout_in_millis(integration.timeout_in_millis)
                    .set_passthrough_behavior(integration.passthrough_behavior.clone())
                    .set_request_parameters(to_hash_map(&integration.request_parameters))
                    .set_request_templates(to_hash_map(&integration.request_templates))
                    .send()
                    .await
                    .with_context(|| format!("could not put integration of {http_method} {path}"))?;

                for (status_code, response) in method.responses.iter() {
                    client
                        .put_method_response()
                        .rest_api_id(&id)
                        .resource_id(&resource_id)
                        .http_method(http_method)
                        .status_code(status_code)
                        .set_response_models(to_hash_map(&response.response_models))
                        .send()
                        .await
                        .with_context(|| {
                            format!("could not put {status_code} response of {http_method} {path}")
                        })?;
                    client
                        .put_integration_response()
                        .rest_api_id(&id)
                        .resource_id(&resource_id)
                        .http_method(http_method)
                        .status_code(status_code)
                        .set_response_templates(to_hash_map(&response.response_templates))
                        .send()
                        .await
                        .with_context(|| {
                            format!(
                                "could not put {status_code} integration response of \
                                 {http_method} {path}"
                            )
                        })?;
                }
                log::info!("...added method {http_method} {path}");
            }
        }

        if let Some(stage) = api.stage.as_deref() {
            client
                .create_deployment()
                .rest_api_id(&id)
                .stage_name(stage)
                .send()
                .await
                .with_context(|| format!("could not deploy rest api {name} to {stage}"))?;
            log::info!("...deployed to https://{id}.execute-api.{region}.amazonaws.com/{stage}");
        }

        Ok(RestApiAttributes {
            arn: format!("arn:aws:apigateway:{region}::/restapis/{id}"),
            id,
            root_resource_id,
        })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &RestApiDefinition,
        _: Option<&RestApiAttributes>,
    ) -> anyhow::Result<Removal> {
        // Names are not unique, every API with the name goes.
        let ids = list_apis(session)
            .await?
            .into_iter()
            .filter(|api| api.name() == Some(name))
            .filter_map(|api| api.id)
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(Removal::Absent);
        }
        let client = aws_sdk_apigateway::Client::new(session.as_ref());
        for id in ids {
            client
                .delete_rest_api()
                .rest_api_id(&id)
                .send()
                .await
                .with_context(|| format!("could not delete rest api {id}"))?;
            log::info!("...deleted rest api {name} ({id})");
        }
        Ok(Removal::Deleted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sqs_service_uri() {
        assert_eq!(
            "arn:aws:apigateway:us-east-1:sqs:path/123456789012/POC1-Queue",
            service_uri("us-east-1", "sqs", None, "123456789012/POC1-Queue")
        );
        assert_eq!(
            "arn:aws:apigateway:eu-west-1:sub.sqs:path/a/b",
            service_uri("eu-west-1", "sqs", Some("sub"), "/a/b")
        );
        assert_eq!(
            "arn:aws:apigateway:eu-west-1:sqs:path/a",
            service_uri("eu-west-1", "sqs", Some(""), "a")
        );
    }

    #[test]
    fn resource_paths() {
        assert_eq!(Some(("/".to_owned(), "orders")), split_path("/orders"));
        assert_eq!(Some(("/orders".to_owned(), "{id}")), split_path("/orders/{id}/"));
        assert_eq!(None, split_path("/"));
    }

    #[test]
    fn rest_api_from_toml() {
        let api: RestApiDefinition = toml::from_str(
            r#"
            [resources."/".POST.integration]
            service = "sqs"
            http_method = "POST"
            path = { queue_path = "POC1-Queue" }
            passthrough_behavior = "NEVER"

            [resources."/".POST.responses.200]
            response_models = { "application/json" = "Empty" }
            "#,
        )
        .unwrap();
        assert_eq!(EndpointType::Regional, api.endpoint_type);
        let method = &api.resources["/"]["POST"];
        assert_eq!("NONE", method.authorization_type);
        assert_eq!(
            Reference::QueuePath("POC1-Queue".to_owned()),
            method.integration.path
        );
        assert_eq!("Empty", method.responses["200"].response_models["application/json"]);
    }
}
