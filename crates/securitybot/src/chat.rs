//! HTTP chat bridge
//!
//! Speaks JSON to a sidecar that owns the actual chat workspace connection.
//!
//! ```text
//! POST {url}/prompt            PromptMessage
//! GET  {url}/replies/{hash}    200 ReplyMessage | 204/404 no reply yet
//! POST {url}/escalation        EscalationMessage
//! POST {url}/report            ReportMessage
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tasker::{
    ChatClient, CollaboratorError, CollaboratorResult, Disposition, Escalation, Response,
    TaskRecord,
};
use tracing::debug;

use crate::config::ChatBridgeConfig;

/// Ask the subject whether they performed the action.
#[derive(Debug, Serialize)]
pub struct PromptMessage<'a> {
    pub hash: &'a str,
    pub subject: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<&'a str>,
}

/// Subject's answer as the bridge reports it.
#[derive(Debug, Deserialize)]
pub struct ReplyMessage {
    #[serde(default)]
    pub comment: String,
    pub performed: bool,
    pub authenticated: bool,
}

impl From<ReplyMessage> for Response {
    fn from(reply: ReplyMessage) -> Self {
        Response::new(reply.comment, reply.performed, reply.authenticated)
    }
}

#[derive(Debug, Serialize)]
pub struct EscalationMessage<'a> {
    pub hash: &'a str,
    /// Who is being notified
    pub target: &'a str,
    /// Whose alert it is
    pub subject: &'a str,
    pub title: &'a str,
    pub delay_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportMessage<'a> {
    pub channel: &'a str,
    pub hash: &'a str,
    pub subject: &'a str,
    pub title: &'a str,
    pub disposition: Disposition,
    pub needs_attention: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<&'a str>,
}

/// Map a non-success status to a collaborator error.
pub(crate) fn status_error(status: StatusCode, body: String) -> CollaboratorError {
    if status.is_client_error() {
        CollaboratorError::Rejected(format!("{}: {}", status, body))
    } else {
        CollaboratorError::Unreachable(format!("{}: {}", status, body))
    }
}

pub(crate) fn send_error(e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Unreachable(e.to_string())
}

/// [`ChatClient`] over the HTTP bridge.
#[derive(Clone)]
pub struct HttpChatBridge {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    reporting_channel: String,
}

impl HttpChatBridge {
    pub fn new(config: &ChatBridgeConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            reporting_channel: config.reporting_channel.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> CollaboratorResult<()> {
        let response = self
            .authorize(self.http.post(self.endpoint(path)))
            .json(body)
            .send()
            .await
            .map_err(send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatClient for HttpChatBridge {
    async fn send_prompt(&self, task: &TaskRecord) -> CollaboratorResult<()> {
        self.post(
            "prompt",
            &PromptMessage {
                hash: &task.hash,
                subject: &task.ldap,
                title: &task.title,
                description: &task.description,
                reason: &task.reason,
                url: task.url.as_deref(),
            },
        )
        .await
    }

    async fn poll_reply(&self, task: &TaskRecord) -> CollaboratorResult<Option<Response>> {
        let response = self
            .authorize(self.http.get(self.endpoint(&format!("replies/{}", task.hash))))
            .send()
            .await
            .map_err(send_error)?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(hash = %task.hash, "No reply yet");
                Ok(None)
            }
            status if status.is_success() => {
                let reply: ReplyMessage = response
                    .json()
                    .await
                    .map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
                Ok(Some(reply.into()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, body))
            }
        }
    }

    async fn send_escalation(
        &self,
        task: &TaskRecord,
        escalation: &Escalation,
    ) -> CollaboratorResult<()> {
        self.post(
            "escalation",
            &EscalationMessage {
                hash: &task.hash,
                target: &escalation.subject,
                subject: &task.ldap,
                title: &task.title,
                delay_secs: escalation.delay_secs,
            },
        )
        .await
    }

    async fn report(&self, task: &TaskRecord, disposition: Disposition) -> CollaboratorResult<()> {
        self.post(
            "report",
            &ReportMessage {
                channel: &self.reporting_channel,
                hash: &task.hash,
                subject: &task.ldap,
                title: &task.title,
                disposition,
                needs_attention: disposition.needs_attention(),
                comment: task.comment.as_deref(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_rejections() {
        let err = status_error(StatusCode::FORBIDDEN, "bad token".into());
        assert_eq!(err, CollaboratorError::Rejected("403 Forbidden: bad token".into()));
        let err = status_error(StatusCode::BAD_GATEWAY, String::new());
        assert!(matches!(err, CollaboratorError::Unreachable(_)));
    }

    #[test]
    fn test_reply_maps_to_response() {
        let reply: ReplyMessage =
            serde_json::from_str(r#"{"comment": "ran test.sh", "performed": true, "authenticated": false}"#)
                .unwrap();
        let response: Response = reply.into();
        assert_eq!(response.performed, Some(true));
        assert_eq!(response.authenticated, Some(false));
        assert_eq!(response.comment, "ran test.sh");
    }

    #[test]
    fn test_report_wire_shape() {
        let msg = ReportMessage {
            channel: "sec-ops",
            hash: "abc",
            subject: "alice",
            title: "sudo_on_prod",
            disposition: Disposition::Unverified,
            needs_attention: true,
            comment: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["disposition"], "unverified");
        assert!(json.get("comment").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let bridge = HttpChatBridge::new(&ChatBridgeConfig {
            url: "http://bridge:9000/".into(),
            token: None,
            reporting_channel: "c".into(),
        })
        .unwrap();
        assert_eq!(bridge.endpoint("prompt"), "http://bridge:9000/prompt");
    }
}
