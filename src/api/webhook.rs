//! Webhook handler for GitHub deliveries

use axum::{
    Extension, Json,
    body::Bytes,
    extract::State as AxumState,
    http::HeaderMap,
};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::api::middleware::ClientIp;
use crate::deploy::spawn_deployment;
use crate::error::WebhookError;
use crate::webhook::{DELIVERY_HEADER, InboundWebhook, ParsedEvent, header_str};

/// Handles `POST /webhook/github`.
///
/// Checks run in a fixed order: secret configured, signature, then event
/// classification. A qualifying push is handed to the deployer in a detached
/// task; the response never waits for it.
pub async fn github_webhook(
    AxumState(state): AxumState<SharedState>,
    Extension(client_ip): Extension<ClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let delivery = header_str(&headers, DELIVERY_HEADER);

    let Some(secret) = state.settings.webhook_secret() else {
        error!(
            "Webhook secret not configured; rejecting delivery '{}' from {}",
            delivery, client_ip
        );
        return Err(WebhookError::SecretNotConfigured);
    };

    let webhook = InboundWebhook::from_request(&headers, body);
    if !webhook.verify(secret) {
        warn!(
            "Signature verification failed for delivery '{}' from {}",
            delivery, client_ip
        );
        return Err(WebhookError::InvalidSignature);
    }

    let event = webhook.classify().inspect_err(|e| {
        warn!(
            "Rejecting '{}' delivery '{}': {}",
            webhook.declared_event_type, delivery, e
        );
    })?;

    let response = match &event {
        ParsedEvent::Ping => {
            info!("Ping received (delivery '{}')", delivery);
            json!({ "message": "pong" })
        }
        ParsedEvent::Push { branch, .. } if state.policy.triggers(&event) => {
            info!(
                "Push to '{}' from {} (delivery '{}'), starting deployment",
                branch, client_ip, delivery
            );
            spawn_deployment(state.deployer.clone(), branch.clone());
            json!({ "message": "Deployment queued", "branch": branch })
        }
        ParsedEvent::Push { branch, .. } => {
            let target = state.policy.target_branch();
            info!(
                "Ignoring push to '{}', only '{}' triggers deployment",
                branch,
                state.policy.target_ref()
            );
            json!({
                "message": format!(
                    "Push to '{}' ignored, only '{}' triggers deployment",
                    branch, target
                )
            })
        }
        ParsedEvent::Other { event_type } => {
            info!("Ignoring '{}' event (delivery '{}')", event_type, delivery);
            json!({ "message": format!("Event '{}' ignored", event_type) })
        }
    };

    Ok(Json(response))
}
