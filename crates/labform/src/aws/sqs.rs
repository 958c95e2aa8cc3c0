//! AWS SQS queues.
use std::collections::BTreeMap;

use anyhow::Context;
use aws_sdk_sqs::{
    operation::list_queues::builders::ListQueuesFluentBuilder, types::QueueAttributeName,
};

use super::{iam, Session};
use crate::{Removal, ResourceAttributes, Service};

/// `ListQueues` only returns a continuation token when a page size is set.
const LIST_PAGE_SIZE: i32 = 1000;

fn default_retention() -> u32 {
    86400
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueueDefinition {
    #[serde(default)]
    pub delay_seconds: u32,
    /// Seconds a message is kept, one day unless set.
    #[serde(default = "default_retention")]
    pub message_retention_period: u32,
    /// Names of roles allowed to send messages.
    #[serde(default)]
    pub send_roles: Vec<String>,
    /// Names of roles allowed to receive messages.
    #[serde(default)]
    pub receive_roles: Vec<String>,
}

impl Default for QueueDefinition {
    fn default() -> Self {
        QueueDefinition {
            delay_seconds: 0,
            message_retention_period: default_retention(),
            send_roles: vec![],
            receive_roles: vec![],
        }
    }
}

impl QueueDefinition {
    pub fn with_sender(mut self, role: impl Into<String>) -> Self {
        self.send_roles.push(role.into());
        self
    }

    pub fn with_receiver(mut self, role: impl Into<String>) -> Self {
        self.receive_roles.push(role.into());
        self
    }
}

/// The access policy granting each sender and receiver role its actions on
/// the queue.
pub fn queue_policy(
    queue_arn: &str,
    senders: &[String],
    receivers: &[String],
) -> serde_json::Value {
    let statement = |role_arn: &String, actions: &[&str]| {
        serde_json::json!({
            "Effect": "Allow",
            "Principal": { "AWS": role_arn },
            "Action": actions,
            "Resource": queue_arn,
        })
    };
    let statements = senders
        .iter()
        .map(|arn| statement(arn, &["sqs:SendMessage"]))
        .chain(receivers.iter().map(|arn| {
            statement(
                arn,
                &[
                    "sqs:ReceiveMessage",
                    "sqs:DeleteMessage",
                    "sqs:GetQueueAttributes",
                ],
            )
        }))
        .collect::<Vec<_>>();
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueAttributes {
    pub arn: String,
    pub url: String,
}

impl ResourceAttributes for QueueAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

/// Splits `https://sqs.<region>.amazonaws.com/<account>/<name>` into its
/// account and name.
fn parse_queue_url(url: &str) -> Option<(&str, &str)> {
    let mut segments = url.rsplit('/');
    let name = segments.next().filter(|s| !s.is_empty())?;
    let account = segments.next().filter(|s| !s.is_empty())?;
    Some((account, name))
}

/// SQS standard queues.
pub struct Queue;

impl Service for Queue {
    type Provider = Session;
    type Definition = QueueDefinition;
    type Attributes = QueueAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "queue";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, QueueAttributes>> {
        let region = session.region()?;
        let client = aws_sdk_sqs::Client::new(session.as_ref());
        let mut queues = BTreeMap::default();
        let mut next_token = None;
        loop {
            let out = list_queues_page(&client, next_token)
                .send()
                .await
                .context("could not list queues")?;
            for url in out.queue_urls.unwrap_or_default() {
                let Some((account, name)) = parse_queue_url(&url) else {
                    log::warn!("skipping unexpected queue url {url}");
                    continue;
                };
                let arn = format!("arn:aws:sqs:{region}:{account}:{name}");
                queues.insert(name.to_owned(), QueueAttributes { arn, url });
            }
            next_token = out.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(queues)
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        queue: &QueueDefinition,
    ) -> anyhow::Result<QueueAttributes> {
        let client = aws_sdk_sqs::Client::new(session.as_ref());
        let url = client
            .create_queue()
            .queue_name(name)
            .attributes(QueueAttributeName::DelaySeconds, queue.delay_seconds.to_string())
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                queue.message_retention_period.to_string(),
            )
            .send()
            .await?
            .queue_url
            .context("missing queue url")?;
        log::info!("...created queue {url}");
        let arn = queue_arn(session, name).await?;

        if !queue.send_roles.is_empty() || !queue.receive_roles.is_empty() {
            let mut senders = vec![];
            for role in queue.send_roles.iter() {
                senders.push(iam::role_arn(session, role).await?);
            }
            let mut receivers = vec![];
            for role in queue.receive_roles.iter() {
                receivers.push(iam::role_arn(session, role).await?);
            }
            let policy = queue_policy(&arn, &senders, &receivers);
            log::debug!("queue {name} policy: {policy:#}");
            client
                .set_queue_attributes()
                .queue_url(&url)
                .attributes(QueueAttributeName::Policy, serde_json::to_string(&policy)?)
                .send()
                .await
                .with_context(|| {
                    format!("queue {name} was created but its policy could not be set")
                })?;
        }

        Ok(QueueAttributes { arn, url })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &QueueDefinition,
        _: Option<&QueueAttributes>,
    ) -> anyhow::Result<Removal> {
        let client = aws_sdk_sqs::Client::new(session.as_ref());
        let url = match client.get_queue_url().queue_name(name).send().await {
            Ok(out) => out.queue_url.context("missing queue url")?,
            Err(e)
                if e.as_service_error()
                    .map(|e| e.is_queue_does_not_exist())
                    .unwrap_or_default() =>
            {
                return Ok(Removal::Absent)
            }
            Err(e) => return Err(e).context("could not get queue url"),
        };
        client
            .delete_queue()
            .queue_url(&url)
            .send()
            .await
            .context("could not delete queue")?;
        log::info!("...deleted queue {url}");
        Ok(Removal::Deleted)
    }
}

/// Returns the ARN of the named queue in the session's region and account.
pub async fn queue_arn(session: &Session, name: &str) -> anyhow::Result<String> {
    Ok(format!(
        "arn:aws:sqs:{}:{}:{name}",
        session.region()?,
        session.account_id().await?
    ))
}

fn list_queues_page(
    client: &aws_sdk_sqs::Client,
    next_token: Option<String>,
) -> ListQueuesFluentBuilder {
    client
        .list_queues()
        .max_results(LIST_PAGE_SIZE)
        .set_next_token(next_token)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn list_pages_are_sized() {
        let sdk = aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        let client = aws_sdk_sqs::Client::new(&sdk);
        let page = list_queues_page(&client, Some("token".to_owned()));
        assert_eq!(&Some(LIST_PAGE_SIZE), page.get_max_results());
        assert_eq!(&Some("token".to_owned()), page.get_next_token());
    }

    #[test]
    fn queue_urls() {
        assert_eq!(
            Some(("123456789012", "POC1-Queue")),
            parse_queue_url("https://sqs.us-east-1.amazonaws.com/123456789012/POC1-Queue")
        );
        assert_eq!(None, parse_queue_url("POC1-Queue"));
    }

    #[test]
    fn policy_grants_per_role() {
        let arn = "arn:aws:sqs:us-east-1:1:POC1-Queue";
        let policy = queue_policy(
            arn,
            &["arn:aws:iam::1:role/POC1-APIGateway-SQS".to_owned()],
            &["arn:aws:iam::1:role/POC1-Lambda-SQS-DynamoDB".to_owned()],
        );
        let statements = policy["Statement"].as_array().unwrap();
        assert_eq!(2, statements.len());
        assert_eq!(serde_json::json!(["sqs:SendMessage"]), statements[0]["Action"]);
        assert_eq!(
            "arn:aws:iam::1:role/POC1-Lambda-SQS-DynamoDB",
            statements[1]["Principal"]["AWS"]
        );
        assert!(statements.iter().all(|s| s["Resource"] == arn));
    }

    #[test]
    fn definition_defaults() {
        let queue: QueueDefinition = toml::from_str(r#"send_roles = ["sender"]"#).unwrap();
        assert_eq!(QueueDefinition::default().with_sender("sender"), queue);
        assert_eq!(86400, queue.message_retention_period);
    }
}
