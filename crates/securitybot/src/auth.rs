//! HTTP push-auth bridge
//!
//! `POST {url}/challenge` with `{subject, reason}`, basic-auth'd with the
//! integration/secret key pair. The bridge blocks until the push is
//! answered or expires and returns `{"result": "allow" | "deny" | "timeout"}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tasker::{AuthClient, AuthOutcome, CollaboratorError, CollaboratorResult};
use tracing::debug;

use crate::chat::{send_error, status_error};
use crate::config::AuthBridgeConfig;

#[derive(Debug, Serialize)]
pub struct ChallengeRequest<'a> {
    pub subject: &'a str,
    pub reason: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeReply {
    pub result: String,
}

/// Parse the bridge's verdict.
pub fn parse_outcome(result: &str) -> CollaboratorResult<AuthOutcome> {
    match result.to_ascii_lowercase().as_str() {
        "allow" | "allowed" => Ok(AuthOutcome::Allowed),
        "deny" | "denied" => Ok(AuthOutcome::Denied),
        "timeout" | "timed_out" => Ok(AuthOutcome::TimedOut),
        other => Err(CollaboratorError::Malformed(format!(
            "unknown auth result: {}",
            other
        ))),
    }
}

/// [`AuthClient`] over the HTTP bridge.
#[derive(Clone)]
pub struct HttpAuthBridge {
    http: reqwest::Client,
    base_url: String,
    integration_key: String,
    secret_key: String,
}

impl HttpAuthBridge {
    pub fn new(config: &AuthBridgeConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            integration_key: config.integration_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl AuthClient for HttpAuthBridge {
    async fn challenge(&self, subject: &str, reason: &str) -> CollaboratorResult<AuthOutcome> {
        let response = self
            .http
            .post(format!("{}/challenge", self.base_url))
            .basic_auth(&self.integration_key, Some(&self.secret_key))
            .json(&ChallengeRequest { subject, reason })
            .send()
            .await
            .map_err(send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let reply: ChallengeReply = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        debug!(subject, result = %reply.result, "Push challenge answered");
        parse_outcome(&reply.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outcome() {
        assert_eq!(parse_outcome("allow").unwrap(), AuthOutcome::Allowed);
        assert_eq!(parse_outcome("DENY").unwrap(), AuthOutcome::Denied);
        assert_eq!(parse_outcome("timeout").unwrap(), AuthOutcome::TimedOut);
        assert!(matches!(
            parse_outcome("fraud"),
            Err(CollaboratorError::Malformed(_))
        ));
    }
}
