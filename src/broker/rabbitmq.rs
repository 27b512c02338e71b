use super::traits::{Broker, BrokerFuture, Delivered};
use super::types::InboundMessage;
use crate::config::BridgeConfig;
use crate::error::BrokerError;
use crate::llm::http_client::build_http_client;
use crate::llm::scrub::sanitize_error_body;
use base64::Engine as _;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

/// RabbitMQ over its HTTP management API.
pub struct RabbitMqManagementBroker {
    client: Client,
    base: Url,
    vhost: String,
    username: String,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    routed: bool,
}

#[derive(Debug, Deserialize)]
struct Delivery {
    payload: String,
    #[serde(default)]
    payload_encoding: String,
    #[serde(default)]
    routing_key: Option<String>,
    #[serde(default)]
    properties: Value,
}

impl Delivery {
    fn into_message(self) -> Result<InboundMessage, BrokerError> {
        let payload = if self.payload_encoding == "base64" {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(self.payload.as_bytes())
                .map_err(|e| BrokerError::Malformed(format!("base64 payload: {e}")))?;
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            self.payload
        };
        let message_id = self
            .properties
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(InboundMessage {
            payload,
            routing_key: self.routing_key,
            message_id,
            properties: self.properties,
        })
    }
}

impl RabbitMqManagementBroker {
    pub fn new(management_url: &str, config: &BridgeConfig) -> Result<Self, BrokerError> {
        let base = Url::parse(management_url)
            .map_err(|e| BrokerError::Malformed(format!("management url {management_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(BrokerError::Malformed(format!(
                "management url {management_url} cannot carry a path"
            )));
        }
        Ok(Self {
            client: build_http_client(config.timeout_secs),
            base,
            vhost: config.vhost.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// `{base}/api/{segments..}`; each segment is percent-encoded, so the
    /// default vhost `/` becomes `%2F`.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BrokerError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BrokerError::Malformed("management url cannot carry a path".into()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: &Value) -> Result<reqwest::Response, BrokerError> {
        let response = self
            .client
            .request(method, url)
            .basic_auth(&self.username, self.password.as_deref())
            .json(body)
            .send()
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(BrokerError::Status {
            status: status.as_u16(),
            body: sanitize_error_body(&text),
        })
    }
}

impl Broker for RabbitMqManagementBroker {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    fn declare_queue<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let url = self.endpoint(&["queues", &self.vhost, queue])?;
            let body = json!({ "durable": true, "auto_delete": false, "arguments": {} });
            self.send(Method::PUT, url, &body).await?;
            tracing::debug!(queue, "broker queue declared");
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message_id: &'a str,
        payload: &'a Value,
    ) -> BrokerFuture<'a, bool> {
        Box::pin(async move {
            let url = self.endpoint(&["exchanges", &self.vhost, "amq.default", "publish"])?;
            let body = json!({
                "properties": {
                    "message_id": message_id,
                    "delivery_mode": 2,
                    "content_type": "application/json",
                },
                "routing_key": routing_key,
                "payload": payload.to_string(),
                "payload_encoding": "string",
            });
            let response = self.send(Method::POST, url, &body).await?;
            let parsed: PublishResponse = response
                .json()
                .await
                .map_err(|e| BrokerError::Malformed(format!("publish response: {e}")))?;
            Ok(parsed.routed)
        })
    }

    fn fetch<'a>(&'a self, queue: &'a str, max: usize) -> BrokerFuture<'a, Vec<Delivered>> {
        Box::pin(async move {
            let url = self.endpoint(&["queues", &self.vhost, queue, "get"])?;
            let body = json!({
                "count": max,
                "ackmode": "ack_requeue_false",
                "encoding": "auto",
            });
            let response = self.send(Method::POST, url, &body).await?;
            let deliveries: Vec<Delivery> = response
                .json()
                .await
                .map_err(|e| BrokerError::Malformed(format!("get response: {e}")))?;
            Ok(deliveries.into_iter().map(Delivery::into_message).collect())
        })
    }
}
