//! HTTP client for the hosted signaling service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::{SignalingConfig, SignalingDialect};
use crate::error::SignalingError;
use crate::session::SdpType;
use crate::signaling::{Ack, RetrievalOutcome, SignalingService};

/// Body of a successful fetch
#[derive(Debug, Deserialize)]
struct DataReply {
    data: String,
}

/// Stateless request/response wrapper around the signaling endpoints
pub struct HttpSignalingClient {
    client: Client,
    base_url: String,
    dialect: SignalingDialect,
}

impl HttpSignalingClient {
    pub fn new(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let mut builder = Client::builder();
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| SignalingError::NoResponse(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            dialect: config.dialect,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn publish(
        &self,
        sdp_type: SdpType,
        name: &str,
        password: &str,
        sdp: &str,
    ) -> Result<Ack, SignalingError> {
        let mut body = Map::new();
        body.insert(self.dialect.id_field().to_string(), Value::from(name));
        body.insert("password".to_string(), Value::from(password));
        body.insert(sdp_type.field_name().to_string(), Value::from(sdp));

        let path = self.dialect.publish_path(sdp_type);
        tracing::debug!(path, session = name, "publishing {}", sdp_type);

        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| SignalingError::NoResponse(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            Ok(Ack)
        } else {
            Err(unexpected(status, response).await)
        }
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<reqwest::Response, SignalingError> {
        self.client
            .get(self.url(path))
            .query(params)
            .send()
            .await
            .map_err(|e| SignalingError::NoResponse(e.to_string()))
    }
}

/// Turn a non-success response into an error carrying its body
async fn unexpected(status: StatusCode, response: reqwest::Response) -> SignalingError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
    SignalingError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    }
}

/// Pull the SDP out of a `{"data": "..."}` reply
async fn read_sdp(response: reqwest::Response) -> Result<String, SignalingError> {
    let reply: DataReply = response
        .json()
        .await
        .map_err(|e| SignalingError::MalformedBody(e.to_string()))?;

    if reply.data.is_empty() {
        return Err(SignalingError::MalformedBody("empty session description".to_string()));
    }
    Ok(reply.data)
}

#[async_trait]
impl SignalingService for HttpSignalingClient {
    async fn publish_offer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        self.publish(SdpType::Offer, name, password, sdp).await
    }

    async fn publish_answer(&self, name: &str, password: &str, sdp: &str) -> Result<Ack, SignalingError> {
        self.publish(SdpType::Answer, name, password, sdp).await
    }

    async fn fetch_offer(&self, name: &str, password: &str) -> Result<RetrievalOutcome, SignalingError> {
        let response = self
            .get("/getOffer", &[(self.dialect.id_field(), name), ("password", password)])
            .await?;

        match response.status() {
            StatusCode::OK => read_sdp(response).await.map(RetrievalOutcome::Found),
            StatusCode::FORBIDDEN => Ok(RetrievalOutcome::Forbidden),
            StatusCode::NOT_FOUND => Ok(RetrievalOutcome::NotFound),
            status => Err(unexpected(status, response).await),
        }
    }

    async fn fetch_answer(&self, name: &str) -> Result<Option<String>, SignalingError> {
        let response = self.get("/getAnswer", &[(self.dialect.id_field(), name)]).await?;

        match response.status() {
            StatusCode::OK => read_sdp(response).await.map(Some),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(unexpected(status, response).await),
        }
    }
}
