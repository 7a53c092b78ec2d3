//! Webhook related structures: the inbound delivery, its classification and
//! the policy deciding which pushes trigger a deployment.

use axum::{body::Bytes, http::HeaderMap};
use serde::Deserialize;

use crate::error::WebhookError;
use crate::signature::verify_github_signature;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A single webhook delivery as received, before any interpretation
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub raw_body: Bytes,
    pub declared_signature: String,
    pub declared_event_type: String,
}

impl InboundWebhook {
    /// Missing or non-UTF-8 headers are treated as empty strings.
    pub fn from_request(headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            raw_body: body,
            declared_signature: header_str(headers, SIGNATURE_HEADER).to_string(),
            declared_event_type: header_str(headers, EVENT_HEADER).to_string(),
        }
    }

    pub fn verify(&self, secret: &[u8]) -> bool {
        verify_github_signature(secret, &self.raw_body, &self.declared_signature)
    }

    pub fn classify(&self) -> Result<ParsedEvent, WebhookError> {
        ParsedEvent::classify(&self.declared_event_type, &self.raw_body)
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Minimal view of a push payload; everything besides `ref` is ignored.
#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    Ping,
    Push { git_ref: String, branch: String },
    Other { event_type: String },
}

impl ParsedEvent {
    /// Classifies a delivery by its declared event type. Only `push` bodies
    /// are parsed; a push without a `ref` field gets an empty ref.
    pub fn classify(event_type: &str, body: &[u8]) -> Result<Self, WebhookError> {
        match event_type {
            "ping" => Ok(ParsedEvent::Ping),
            "push" => {
                let payload: PushPayload =
                    serde_json::from_slice(body).map_err(WebhookError::MalformedPayload)?;
                let branch = branch_from_ref(&payload.git_ref).to_string();
                Ok(ParsedEvent::Push {
                    git_ref: payload.git_ref,
                    branch,
                })
            }
            other => Ok(ParsedEvent::Other {
                event_type: other.to_string(),
            }),
        }
    }
}

/// `refs/heads/<name>` becomes `<name>`; any other ref is returned as is.
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref)
}

/// Decides which push events trigger a deployment.
#[derive(Debug, Clone)]
pub struct DeployPolicy {
    target_ref: String,
}

impl DeployPolicy {
    pub fn new(target_ref: impl Into<String>) -> Self {
        Self {
            target_ref: target_ref.into(),
        }
    }

    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    pub fn target_branch(&self) -> &str {
        branch_from_ref(&self.target_ref)
    }

    /// Full ref equality: `refs/tags/main` never matches `refs/heads/main`.
    pub fn triggers(&self, event: &ParsedEvent) -> bool {
        matches!(event, ParsedEvent::Push { git_ref, .. } if *git_ref == self.target_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn push(git_ref: &str) -> ParsedEvent {
        ParsedEvent::Push {
            git_ref: git_ref.to_string(),
            branch: branch_from_ref(git_ref).to_string(),
        }
    }

    #[test]
    fn test_branch_from_ref() {
        assert_eq!(branch_from_ref("refs/heads/main"), "main");
        assert_eq!(branch_from_ref("refs/heads/feature/login"), "feature/login");
        assert_eq!(branch_from_ref("refs/tags/main"), "refs/tags/main");
        assert_eq!(branch_from_ref("main"), "main");
        assert_eq!(branch_from_ref(""), "");
    }

    #[test]
    fn test_classify_ping_ignores_body() {
        let event = ParsedEvent::classify("ping", b"definitely not json").unwrap();
        assert_eq!(event, ParsedEvent::Ping);
    }

    #[test]
    fn test_classify_push() {
        let body = br#"{"ref":"refs/heads/main","after":"abc123","repository":{"name":"home"}}"#;
        let event = ParsedEvent::classify("push", body).unwrap();
        assert_eq!(event, push("refs/heads/main"));
    }

    #[test]
    fn test_classify_push_without_ref() {
        let event = ParsedEvent::classify("push", b"{}").unwrap();
        assert_eq!(
            event,
            ParsedEvent::Push {
                git_ref: String::new(),
                branch: String::new()
            }
        );
    }

    #[test]
    fn test_classify_malformed_push() {
        for body in [&b"not json"[..], b"", br#"{"ref": 42}"#, br#""refs/heads/main""#] {
            let result = ParsedEvent::classify("push", body);
            assert!(
                matches!(result, Err(WebhookError::MalformedPayload(_))),
                "body {:?} should be rejected",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_classify_other_events() {
        let event = ParsedEvent::classify("issues", b"{}").unwrap();
        assert_eq!(
            event,
            ParsedEvent::Other {
                event_type: "issues".to_string()
            }
        );

        let event = ParsedEvent::classify("", b"").unwrap();
        assert_eq!(
            event,
            ParsedEvent::Other {
                event_type: String::new()
            }
        );
    }

    #[test]
    fn test_policy_requires_exact_ref() {
        let policy = DeployPolicy::new("refs/heads/main");

        assert!(policy.triggers(&push("refs/heads/main")));
        assert!(!policy.triggers(&push("refs/heads/dev")));
        assert!(!policy.triggers(&push("refs/heads/main-2")));
        assert!(!policy.triggers(&push("refs/tags/main")));
        assert!(!policy.triggers(&push("main")));
        assert!(!policy.triggers(&ParsedEvent::Ping));
        assert!(!policy.triggers(&ParsedEvent::Other {
            event_type: "refs/heads/main".to_string()
        }));
        assert_eq!(policy.target_branch(), "main");
    }

    #[test]
    fn test_inbound_webhook_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", HeaderValue::from_static("sha256=abc"));
        headers.insert("x-github-event", HeaderValue::from_static("push"));

        let webhook = InboundWebhook::from_request(&headers, Bytes::from_static(b"{}"));
        assert_eq!(webhook.declared_signature, "sha256=abc");
        assert_eq!(webhook.declared_event_type, "push");

        let webhook = InboundWebhook::from_request(&HeaderMap::new(), Bytes::new());
        assert_eq!(webhook.declared_signature, "");
        assert_eq!(webhook.declared_event_type, "");
        assert!(!webhook.verify(b"s3cr3t"));
    }
}
