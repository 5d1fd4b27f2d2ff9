//! NATS JetStream broker
//!
//! The service does not speak Kafka. A relay republishes each GCN Kafka topic
//! verbatim as a subject of the same name on one JetStream stream, and
//! authenticates its clients with the GCN client credential pair (client id
//! as user, client secret as password). A durable pull consumer filters on
//! the subscribed subjects and every message is acked explicitly.
//!
//! Keep-alive traffic arrives in two forms: the Kafka end-of-partition
//! placeholder, forwarded as-is by the relay, and JetStream's own status
//! frames, which have a status code and no payload.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, Message};
use async_trait::async_trait;
use futures::StreamExt;
use skyalert_common::config::ConsumerCredentials;
use tracing::debug;

use super::{is_heartbeat, AlertBroker, BrokerConnector, BrokerMessage};
use crate::error::{GcnError, GcnResult};

impl BrokerMessage for Message {
    fn topic(&self) -> &str {
        self.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn is_heartbeat(&self) -> bool {
        is_keepalive(self.status.is_some(), &self.payload)
    }
}

fn is_keepalive(has_status: bool, payload: &[u8]) -> bool {
    has_status || payload.is_empty() || is_heartbeat(payload)
}

/// Connects to the relay with the GCN credentials as user and password
#[derive(Debug, Clone)]
pub struct JetStreamConnector {
    url: String,
    stream: String,
    consumer_name: String,
}

impl JetStreamConnector {
    pub fn new(url: impl Into<String>, stream: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: stream.into(),
            consumer_name: consumer_name.into(),
        }
    }
}

#[async_trait]
impl BrokerConnector for JetStreamConnector {
    type Broker = JetStreamBroker;

    async fn connect(&self, credentials: &ConsumerCredentials) -> GcnResult<JetStreamBroker> {
        let client = async_nats::ConnectOptions::with_user_and_password(
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
        )
        .connect(self.url.as_str())
        .await
        .map_err(|e| GcnError::BrokerConnect(format!("{}: {}", self.url, e)))?;

        debug!(url = %self.url, "Connected to broker");

        Ok(JetStreamBroker {
            context: jetstream::new(client),
            stream: self.stream.clone(),
            consumer_name: self.consumer_name.clone(),
            consumer: None,
        })
    }
}

/// A connected JetStream session
pub struct JetStreamBroker {
    context: jetstream::Context,
    stream: String,
    consumer_name: String,
    consumer: Option<jetstream::consumer::Consumer<pull::Config>>,
}

#[async_trait]
impl AlertBroker for JetStreamBroker {
    type Message = Message;

    async fn subscribe(&mut self, topics: &[String]) -> GcnResult<()> {
        let stream = self
            .context
            .get_stream(&self.stream)
            .await
            .map_err(|e| GcnError::Subscription(format!("stream {}: {}", self.stream, e)))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.consumer_name,
                pull::Config {
                    durable_name: Some(self.consumer_name.clone()),
                    filter_subjects: topics.to_vec(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| GcnError::Subscription(format!("consumer {}: {}", self.consumer_name, e)))?;

        self.consumer = Some(consumer);
        Ok(())
    }

    async fn consume(&mut self, max_messages: usize, timeout: Duration) -> GcnResult<Vec<Message>> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| GcnError::Subscription("consume called before subscribe".to_string()))?;

        let mut batch = Box::pin(
            consumer
                .fetch()
                .max_messages(max_messages)
                .expires(timeout)
                .messages()
                .await
                .map_err(|e| GcnError::Subscription(e.to_string()))?,
        );

        let mut messages = Vec::new();
        while let Some(message) = batch.next().await {
            messages.push(message.map_err(|e| GcnError::Subscription(e.to_string()))?);
        }
        Ok(messages)
    }

    async fn commit(&mut self, message: &Message) -> GcnResult<()> {
        message
            .ack()
            .await
            .map_err(|e| GcnError::Subscription(format!("ack failed: {}", e)))
    }
}
