//! Course 2, week 1: a serverless order pipeline.
//!
//! API Gateway `POST /` sends the order to an SQS queue, `POC-Lambda-1`
//! writes queued orders to a DynamoDB table, and `POC-Lambda-2` publishes
//! new table records to an SNS topic.
use std::collections::BTreeMap;

use lab::aws::{
    apigateway::{Integration, Method, MethodResponse, RestApi, RestApiDefinition},
    dynamodb::{
        AttributeType, BillingMode, KeySchemaElement, StreamViewType, Table, TableDefinition,
    },
    iam::{IamPolicy, IamRole, Principal, RoleDefinition},
    lambda::{Function, FunctionDefinition, StartingPosition, Trigger},
    sns::{Subscription, Topic, TopicDefinition},
    sqs::{Queue, QueueDefinition},
    Reference, Session,
};
use lab::{Definitions, Project};

pub const PROJECT: &str = "C2W1-Serverless";

pub const TABLE: &str = "POC1_orders";
pub const QUEUE: &str = "POC1-Queue";
pub const TOPIC: &str = "POC1-Topic";
pub const API: &str = "POC1-API";

const LAMBDA_SQS_DYNAMODB: &str = "POC1-Lambda-SQS-DynamoDB";
const LAMBDA_STREAMS_SNS: &str = "POC1-Lambda-DynamoDBStreams-SNS";
const APIGATEWAY_SQS: &str = "POC1-APIGateway-SQS";

const SAVE_ORDER_RECORD: &str = r#"import boto3, uuid

client = boto3.resource('dynamodb')
table = client.Table("POC1_orders")

def lambda_handler(event, context):
    for record in event['Records']:
        payload = record["body"]
        print(str(payload))
        table.put_item(Item={'orderID': str(uuid.uuid4()), 'order': payload})
"#;

const PUBLISH_NEW_ORDER: &str = r#"import boto3, json, os

client = boto3.client('sns')

def lambda_handler(event, context):
    for record in event["Records"]:
        if record['eventName'] == 'INSERT':
            new_record = record['dynamodb']['NewImage']
            client.publish(
                TargetArn=os.environ['TOPIC_ARN'],
                Message=json.dumps({'default': json.dumps(new_record)}),
                MessageStructure='json'
            )
"#;

fn allow_all(actions: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": actions,
            "Resource": "*",
        }]
    })
}

pub fn policies() -> Definitions<serde_json::Value> {
    Definitions::from([
        (
            "POC1-Lambda-Write-DynamoDB".to_owned(),
            allow_all(&["dynamodb:PutItem", "dynamodb:DescribeTable"]),
        ),
        (
            "POC1-Lambda-SNS-Publish".to_owned(),
            allow_all(&["sns:Publish", "sns:GetTopicAttributes", "sns:ListTopics"]),
        ),
        (
            "POC1-Lambda-DynamoDBStreams-Read".to_owned(),
            allow_all(&[
                "dynamodb:GetShardIterator",
                "dynamodb:DescribeStream",
                "dynamodb:ListStreams",
                "dynamodb:GetRecords",
            ]),
        ),
        (
            "POC1-Lambda-Read-SQS".to_owned(),
            allow_all(&[
                "sqs:DeleteMessage",
                "sqs:ReceiveMessage",
                "sqs:GetQueueAttributes",
                "sqs:ChangeMessageVisibility",
            ]),
        ),
    ])
}

pub fn roles() -> Definitions<RoleDefinition> {
    let lambda = || Principal::Service("lambda.amazonaws.com".to_owned());
    Definitions::from([
        (
            LAMBDA_SQS_DYNAMODB.to_owned(),
            RoleDefinition::new(lambda())
                .with_policy("POC1-Lambda-Write-DynamoDB")
                .with_policy("POC1-Lambda-Read-SQS"),
        ),
        (
            LAMBDA_STREAMS_SNS.to_owned(),
            RoleDefinition::new(lambda())
                .with_policy("POC1-Lambda-SNS-Publish")
                .with_policy("POC1-Lambda-DynamoDBStreams-Read"),
        ),
        (
            APIGATEWAY_SQS.to_owned(),
            RoleDefinition::new(Principal::Service("apigateway.amazonaws.com".to_owned()))
                .with_managed_policy("service-role/AmazonAPIGatewayPushToCloudWatchLogs"),
        ),
    ])
}

pub fn tables() -> Definitions<TableDefinition> {
    Definitions::from([(
        TABLE.to_owned(),
        TableDefinition {
            key_schema: vec![KeySchemaElement::partition_key("orderID", AttributeType::String)],
            billing_mode: BillingMode::Provisioned {
                read_capacity_units: 10,
                write_capacity_units: 10,
            },
            stream: Some(StreamViewType::NewImage),
            ..Default::default()
        },
    )])
}

pub fn queues() -> Definitions<QueueDefinition> {
    Definitions::from([(
        QUEUE.to_owned(),
        QueueDefinition::default()
            .with_sender(APIGATEWAY_SQS)
            .with_receiver(LAMBDA_SQS_DYNAMODB),
    )])
}

/// The topic, with an email subscription when `email` is set.
pub fn topics(email: Option<&str>) -> Definitions<TopicDefinition> {
    let mut topic = TopicDefinition::default();
    if let Some(email) = email {
        topic
            .subscriptions
            .insert("email-1".to_owned(), Subscription::email(email));
    }
    Definitions::from([(TOPIC.to_owned(), topic)])
}

pub fn functions() -> Definitions<FunctionDefinition> {
    let python = |handler: &str, role: &str, file: &str, source: &str| FunctionDefinition {
        runtime: "python3.9".to_owned(),
        handler: handler.to_owned(),
        role: Reference::Role(role.to_owned()),
        sources: BTreeMap::from([(file.to_owned(), source.to_owned())]),
        triggers: BTreeMap::default(),
        environment: BTreeMap::default(),
        timeout: None,
    };

    let mut save_order = python(
        "save_order_record.lambda_handler",
        LAMBDA_SQS_DYNAMODB,
        "save_order_record.py",
        SAVE_ORDER_RECORD,
    );
    save_order.triggers.insert(
        "sqs".to_owned(),
        Trigger {
            principal: "sqs.amazonaws.com".to_owned(),
            source: Reference::Queue(QUEUE.to_owned()),
            batch_size: None,
            starting_position: None,
        },
    );

    let mut publish_order = python(
        "publish_new_order.lambda_handler",
        LAMBDA_STREAMS_SNS,
        "publish_new_order.py",
        PUBLISH_NEW_ORDER,
    );
    publish_order.triggers.insert(
        "dynamodb-stream".to_owned(),
        Trigger {
            principal: "dynamodb.amazonaws.com".to_owned(),
            source: Reference::TableStream(TABLE.to_owned()),
            batch_size: Some(100),
            starting_position: Some(StartingPosition::Latest),
        },
    );
    publish_order
        .environment
        .insert("TOPIC_ARN".to_owned(), Reference::Topic(TOPIC.to_owned()));

    Definitions::from([
        ("POC-Lambda-1".to_owned(), save_order),
        ("POC-Lambda-2".to_owned(), publish_order),
    ])
}

pub fn apis() -> Definitions<RestApiDefinition> {
    let send_message = Method {
        authorization_type: "NONE".to_owned(),
        integration: Integration {
            service: "sqs".to_owned(),
            http_method: "POST".to_owned(),
            path: Reference::QueuePath(QUEUE.to_owned()),
            region: None,
            subdomain: None,
            credentials: Some(Reference::Role(APIGATEWAY_SQS.to_owned())),
            timeout_in_millis: Some(29000),
            passthrough_behavior: Some("NEVER".to_owned()),
            request_parameters: BTreeMap::from([(
                "integration.request.header.Content-Type".to_owned(),
                "'application/x-www-form-urlencoded'".to_owned(),
            )]),
            request_templates: BTreeMap::from([(
                "application/json".to_owned(),
                "Action=SendMessage&MessageBody=$input.body".to_owned(),
            )]),
        },
        responses: BTreeMap::from([(
            "200".to_owned(),
            MethodResponse {
                response_models: BTreeMap::from([(
                    "application/json".to_owned(),
                    "Empty".to_owned(),
                )]),
                response_templates: BTreeMap::from([(
                    "application/json".to_owned(),
                    String::new(),
                )]),
            },
        )]),
    };
    Definitions::from([(
        API.to_owned(),
        RestApiDefinition {
            resources: BTreeMap::from([(
                "/".to_owned(),
                BTreeMap::from([("POST".to_owned(), send_message)]),
            )]),
            ..Default::default()
        },
    )])
}

pub fn project(session: Session, email: Option<&str>) -> Project<Session> {
    let mut project = Project::new(PROJECT, session);
    project
        .add_config(IamPolicy, Some(policies()))
        .add_config(IamRole, Some(roles()))
        .add_config(Table, Some(tables()))
        .add_config(Queue, Some(queues()))
        .add_config(Topic, Some(topics(email)))
        .add_config(Function, Some(functions()))
        .add_config(RestApi, Some(apis()));
    project
}

#[cfg(test)]
mod test {
    use super::*;

    fn referenced_roles() -> Vec<String> {
        let mut names = vec![];
        for function in functions().values() {
            if let Reference::Role(name) = &function.role {
                names.push(name.clone());
            }
        }
        for queue in queues().values() {
            names.extend(queue.send_roles.iter().cloned());
            names.extend(queue.receive_roles.iter().cloned());
        }
        for api in apis().values() {
            for method in api.resources.values().flat_map(|methods| methods.values()) {
                if let Some(Reference::Role(name)) = &method.integration.credentials {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    #[test]
    fn references_are_defined() {
        let policies = policies();
        for role in roles().values() {
            for policy in role.policies.iter() {
                assert!(policies.contains_key(policy), "undefined policy {policy}");
            }
        }
        let roles = roles();
        for role in referenced_roles() {
            assert!(roles.contains_key(&role), "undefined role {role}");
        }
    }

    #[test]
    fn sources_package() {
        for (name, function) in functions() {
            let module = function.handler.split('.').next().unwrap();
            assert!(
                function.sources.contains_key(&format!("{module}.py")),
                "{name} handler module is missing"
            );
            assert!(function.package().is_ok());
        }
    }

    #[test]
    fn topic_subscription_is_optional() {
        assert!(topics(None)[TOPIC].subscriptions.is_empty());
        assert_eq!(
            "student@example.com",
            topics(Some("student@example.com"))[TOPIC].subscriptions["email-1"].endpoint
        );
    }

    #[test]
    fn project_registration_order() {
        let session = Session::from_sdk_config(lab::aws::SdkConfig::builder().build());
        let project = project(session, None);
        assert_eq!(
            vec!["policy", "role", "table", "queue", "topic", "function", "api"],
            project.kinds()
        );
    }
}
