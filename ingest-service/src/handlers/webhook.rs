use crate::models::actor;
use crate::provider::resources::{
    OptionalRelationship, WebhookEventCallback, WebhookEventResource, WebhookEventType,
};
use crate::provider::AUTHENTICITY_HEADER;
use crate::services::metrics::record_webhook_event;
use crate::startup::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::utils::signature::verify_body_signature;
use tracing::{info, instrument, warn};

/// `POST /webhook`: authenticate an Up webhook delivery and apply it.
///
/// Signature and payload failures are rejected without alerting; anything
/// that fails after that is alerted and surfaces as a 500.
#[instrument(skip_all)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(AUTHENTICITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let verified = verify_body_signature(state.webhook_secret.expose_secret(), &body, signature)
        .unwrap_or(false);
    if !verified {
        warn!("Invalid webhook signature");
        record_webhook_event("unverified", "forbidden");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    if body.is_empty() {
        warn!("No webhook event payload found");
        record_webhook_event("unverified", "bad_request");
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "No webhook event payload found"
        )));
    }

    let callback: WebhookEventCallback = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Malformed webhook event payload");
        record_webhook_event("unverified", "bad_request");
        AppError::BadRequest(anyhow::anyhow!("Malformed webhook event payload: {}", e))
    })?;

    let event = callback.data;
    let event_type = event.attributes.event_type;
    info!(event = %event.id, event_type = event_type.as_str(), "Webhook event received");

    let action = resolve_action(&state, &event).map_err(|e| {
        warn!(event = %event.id, error = %e, "Webhook event is missing its transaction");
        record_webhook_event(event_type.as_str(), "bad_request");
        e
    })?;

    match apply_action(&state, &event, action).await {
        Ok(()) => {
            record_webhook_event(event_type.as_str(), "success");
            Ok(StatusCode::OK)
        }
        Err(e) => {
            record_webhook_event(event_type.as_str(), "failure");
            Err(state
                .ingestor
                .notifier()
                .fail(&format!(
                    "processWebhookEvent: Error handling {} event {}: {}",
                    event_type.as_str(),
                    event.id,
                    e
                ))
                .await)
        }
    }
}

/// Work derived from a verified event, resolved before anything is processed.
#[derive(Debug)]
enum EventAction {
    Ping,
    Upsert { link: String },
    Delete { provider_id: String },
    Ignore,
}

/// A transaction event without a usable transaction relationship is a
/// payload error, not a processing failure.
fn resolve_action(
    state: &AppState,
    event: &WebhookEventResource,
) -> Result<EventAction, AppError> {
    match event.attributes.event_type {
        WebhookEventType::Ping => Ok(EventAction::Ping),
        WebhookEventType::TransactionCreated | WebhookEventType::TransactionSettled => {
            let relationship = transaction_relationship(event)?;
            let link = match (relationship.links.as_ref(), relationship.id()) {
                (Some(links), _) => links.related.clone(),
                (None, Some(id)) => state.ingestor.client().transaction_url(id),
                (None, None) => return Err(missing_transaction(event)),
            };
            Ok(EventAction::Upsert { link })
        }
        WebhookEventType::TransactionDeleted => {
            let provider_id = transaction_relationship(event)?
                .id()
                .ok_or_else(|| missing_transaction(event))?;
            Ok(EventAction::Delete {
                provider_id: provider_id.to_string(),
            })
        }
        WebhookEventType::Unknown => Ok(EventAction::Ignore),
    }
}

async fn apply_action(
    state: &AppState,
    event: &WebhookEventResource,
    action: EventAction,
) -> Result<(), AppError> {
    let ingestor = &state.ingestor;

    match action {
        EventAction::Ping => {
            info!(event = %event.id, "Webhook ping");
        }
        EventAction::Upsert { link } => {
            ingestor
                .guarded(actor::ACCOUNTS, ingestor.process_accounts())
                .await;
            ingestor.process_transaction(&link).await?;
        }
        EventAction::Delete { provider_id } => {
            ingestor
                .guarded(actor::ACCOUNTS, ingestor.process_accounts())
                .await;
            ingestor.delete_transaction(&provider_id).await?;
        }
        EventAction::Ignore => {
            info!(event = %event.id, "Ignoring unsupported webhook event type");
        }
    }
    Ok(())
}

fn transaction_relationship(
    event: &WebhookEventResource,
) -> Result<&OptionalRelationship, AppError> {
    event
        .relationships
        .transaction
        .as_ref()
        .ok_or_else(|| missing_transaction(event))
}

fn missing_transaction(event: &WebhookEventResource) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Webhook event {} has no transaction",
        event.id
    ))
}
