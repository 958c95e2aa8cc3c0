//! AWS SNS topics and their subscriptions.
use std::collections::{BTreeMap, HashMap};

use anyhow::Context;

use super::Session;
use crate::{utils, Removal, ResourceAttributes, Service};

/// SNS reports placeholders such as `PendingConfirmation` instead of an ARN
/// for subscriptions the endpoint has not confirmed.
fn is_confirmed(subscription_arn: &str) -> bool {
    subscription_arn.starts_with("arn:")
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Subscription {
    /// `email`, `sqs`, `lambda`, `https`...
    pub protocol: String,
    pub endpoint: String,
}

impl Subscription {
    pub fn email(address: impl Into<String>) -> Self {
        Subscription {
            protocol: "email".to_owned(),
            endpoint: address.into(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TopicDefinition {
    /// Topic attributes such as `KmsMasterKeyId`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Subscriptions by a name only used in logs.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, Subscription>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicAttributes {
    pub arn: String,
    pub subscriptions_confirmed: u32,
    pub subscriptions_pending: u32,
}

impl ResourceAttributes for TopicAttributes {
    fn arn(&self) -> &str {
        &self.arn
    }
}

/// SNS standard topics.
pub struct Topic;

impl Service for Topic {
    type Provider = Session;
    type Definition = TopicDefinition;
    type Attributes = TopicAttributes;
    type Error = anyhow::Error;

    const KIND: &'static str = "topic";

    async fn do_list(
        &self,
        session: &Session,
    ) -> anyhow::Result<BTreeMap<String, TopicAttributes>> {
        let client = aws_sdk_sns::Client::new(session.as_ref());
        let mut arns = vec![];
        let mut next_token = None;
        loop {
            let out = client
                .list_topics()
                .set_next_token(next_token)
                .send()
                .await
                .context("could not list topics")?;
            arns.extend(
                out.topics
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|t| t.topic_arn),
            );
            next_token = out.next_token;
            if next_token.is_none() {
                break;
            }
        }

        let mut topics = BTreeMap::default();
        for arn in arns {
            let attributes = client
                .get_topic_attributes()
                .topic_arn(&arn)
                .send()
                .await
                .with_context(|| format!("could not get attributes of {arn}"))?
                .attributes
                .unwrap_or_default();
            let count = |key: &str| {
                attributes
                    .get(key)
                    .and_then(|n| n.parse::<u32>().ok())
                    .unwrap_or_default()
            };
            topics.insert(
                utils::name_from_arn(&arn).to_owned(),
                TopicAttributes {
                    subscriptions_confirmed: count("SubscriptionsConfirmed"),
                    subscriptions_pending: count("SubscriptionsPending"),
                    arn,
                },
            );
        }
        Ok(topics)
    }

    async fn do_create(
        &self,
        session: &Session,
        name: &str,
        topic: &TopicDefinition,
    ) -> anyhow::Result<TopicAttributes> {
        let client = aws_sdk_sns::Client::new(session.as_ref());
        let arn = client
            .create_topic()
            .name(name)
            .set_attributes(if topic.attributes.is_empty() {
                None
            } else {
                Some(topic.attributes.clone().into_iter().collect::<HashMap<_, _>>())
            })
            .send()
            .await?
            .topic_arn
            .context("missing topic arn")?;
        log::info!("...created topic {arn}");

        let mut pending = 0;
        for (key, subscription) in topic.subscriptions.iter() {
            let out = client
                .subscribe()
                .topic_arn(&arn)
                .protocol(&subscription.protocol)
                .endpoint(&subscription.endpoint)
                .send()
                .await
                .with_context(|| format!("could not create subscription {key} of topic {name}"))?;
            let subscription_arn = out.subscription_arn.unwrap_or_default();
            log::info!(
                "...subscribed {key} {}:{} ({subscription_arn})",
                subscription.protocol,
                subscription.endpoint
            );
            if !is_confirmed(&subscription_arn) {
                pending += 1;
            }
        }

        Ok(TopicAttributes {
            arn,
            subscriptions_confirmed: topic.subscriptions.len() as u32 - pending,
            subscriptions_pending: pending,
        })
    }

    async fn do_delete(
        &self,
        session: &Session,
        name: &str,
        _: &TopicDefinition,
        existing: Option<&TopicAttributes>,
    ) -> anyhow::Result<Removal> {
        let arn = match existing {
            Some(topic) => topic.arn.clone(),
            None => topic_arn(session, name).await?,
        };
        let client = aws_sdk_sns::Client::new(session.as_ref());

        let mut subscriptions = vec![];
        let mut next_token = None;
        loop {
            let out = match client
                .list_subscriptions_by_topic()
                .topic_arn(&arn)
                .set_next_token(next_token)
                .send()
                .await
            {
                Ok(out) => out,
                Err(e)
                    if e.as_service_error()
                        .map(|e| e.is_not_found_exception())
                        .unwrap_or_default() =>
                {
                    return Ok(Removal::Absent)
                }
                Err(e) => return Err(e).context("could not list subscriptions"),
            };
            subscriptions.extend(out.subscriptions.unwrap_or_default());
            next_token = out.next_token;
            if next_token.is_none() {
                break;
            }
        }

        // Pending subscriptions cannot be unsubscribed, they go with the topic.
        for subscription in subscriptions {
            let Some(subscription_arn) = subscription.subscription_arn else {
                continue;
            };
            if !is_confirmed(&subscription_arn) {
                continue;
            }
            client
                .unsubscribe()
                .subscription_arn(&subscription_arn)
                .send()
                .await
                .with_context(|| format!("could not unsubscribe {subscription_arn}"))?;
            log::info!("...unsubscribed {subscription_arn}");
        }

        client
            .delete_topic()
            .topic_arn(&arn)
            .send()
            .await
            .context("could not delete topic")?;
        log::info!("...deleted topic {arn}");
        Ok(Removal::Deleted)
    }
}

/// Returns the ARN of the named topic in the session's region and account.
pub async fn topic_arn(session: &Session, name: &str) -> anyhow::Result<String> {
    Ok(format!(
        "arn:aws:sns:{}:{}:{name}",
        session.region()?,
        session.account_id().await?
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pending_subscriptions() {
        assert!(!is_confirmed("PendingConfirmation"));
        assert!(!is_confirmed("pending confirmation"));
        assert!(is_confirmed("arn:aws:sns:us-east-1:1:POC1-Topic:5f1c"));
    }

    #[test]
    fn topic_definition_from_toml() {
        let topic: TopicDefinition = toml::from_str(
            r#"
            [subscriptions.email-1]
            protocol = "email"
            endpoint = "student@example.com"
            "#,
        )
        .unwrap();
        assert!(topic.attributes.is_empty());
        assert_eq!(
            Some(&Subscription::email("student@example.com")),
            topic.subscriptions.get("email-1")
        );
    }
}
