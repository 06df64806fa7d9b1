//! Reconciles local payout state with signed gateway events.
//!
//! Only a bad signature is reported back to the sender as a failure. Every
//! other problem is logged and acknowledged so the gateway does not retry
//! events that are ours to fix.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::domain::{EntryId, PayoutId, PayoutStatus, RequirementsStatus, UserId};
use crate::gateway::signature::decode_event;
use crate::gateway::{GatewayError, GatewayEvent, SignatureError, TransferGateway};
use crate::ledger::{Ledger, LedgerError, PayoutChange};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook verification failed: {0}")]
    Verification(#[from] GatewayError),
    #[error("Malformed {event_type} payload: {reason}")]
    Payload { event_type: String, reason: String },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Updated {
        payout_id: PayoutId,
        from: PayoutStatus,
        to: PayoutStatus,
    },
    Unchanged {
        payout_id: PayoutId,
    },
    Refunded {
        payout_id: PayoutId,
        refund_entry: EntryId,
    },
    AlreadyRefunded {
        payout_id: PayoutId,
    },
    UnknownTransfer {
        transfer_id: String,
    },
    AccountUpdated {
        user_id: UserId,
    },
    UnknownAccount {
        account_id: String,
    },
    Ignored {
        event_type: String,
    },
    /// Processing failed; the event is still acknowledged.
    Errored {
        event_type: String,
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct TransferObject {
    id: String,
    status: Option<String>,
    #[serde(default)]
    reversed: bool,
}

#[derive(Debug, Deserialize)]
struct AccountObject {
    id: String,
    capabilities: Option<serde_json::Value>,
    requirements: Option<AccountRequirements>,
}

#[derive(Debug, Deserialize)]
struct AccountRequirements {
    #[serde(default)]
    currently_due: Vec<String>,
}

pub struct WebhookHandler {
    ledger: Arc<Ledger>,
    gateway: Arc<TransferGateway>,
    secret: String,
}

fn decode<T: DeserializeOwned>(event: &GatewayEvent) -> Result<T, WebhookError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| WebhookError::Payload {
        event_type: event.event_type.clone(),
        reason: e.to_string(),
    })
}

/// Best-effort `type` of an envelope that did not decode.
fn envelope_type(payload: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|body| body.get("type")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_owned())
}

impl WebhookHandler {
    pub fn new(ledger: Arc<Ledger>, gateway: Arc<TransferGateway>, secret: &str) -> Self {
        Self {
            ledger,
            gateway,
            secret: secret.to_owned(),
        }
    }

    /// Verifies the raw body against its signature header, then processes the
    /// event. Returns `Err` only when verification fails.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let header = signature.ok_or(GatewayError::Signature(SignatureError::MalformedHeader))?;
        self.gateway.verify_webhook_signature(payload, header, &self.secret)?;
        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(e) => {
                let event_type = envelope_type(payload);
                error!(%event_type, error = %e, "verified webhook is not a gateway event");
                return Ok(WebhookOutcome::Errored {
                    event_type,
                    error: e.to_string(),
                });
            }
        };
        debug!(event_id = %event.id, event_type = %event.event_type, "webhook verified");

        match self.process_event(&event).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "webhook processing failed"
                );
                Ok(WebhookOutcome::Errored {
                    event_type: event.event_type.clone(),
                    error: e.to_string(),
                })
            }
        }
    }

    pub async fn process_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<WebhookOutcome, WebhookError> {
        match event.event_type.as_str() {
            "transfer.created" | "transfer.updated" => {
                let transfer: TransferObject = decode(event)?;
                let status = if transfer.reversed {
                    Some(PayoutStatus::Canceled)
                } else {
                    transfer
                        .status
                        .as_deref()
                        .map(str::parse::<PayoutStatus>)
                        .transpose()
                        .map_err(|e| WebhookError::Payload {
                            event_type: event.event_type.clone(),
                            reason: e.to_string(),
                        })?
                };
                self.sync_transfer(&transfer.id, status).await
            }
            "transfer.failed" => {
                let transfer: TransferObject = decode(event)?;
                self.sync_transfer(&transfer.id, Some(PayoutStatus::Failed)).await
            }
            "account.updated" => {
                let account: AccountObject = decode(event)?;
                let requirements_status = account.requirements.map(|r| {
                    if r.currently_due.is_empty() {
                        RequirementsStatus::Complete
                    } else {
                        RequirementsStatus::Incomplete
                    }
                });
                match self
                    .ledger
                    .update_account_snapshot(&account.id, account.capabilities, requirements_status)
                    .await?
                {
                    Some(updated) => Ok(WebhookOutcome::AccountUpdated {
                        user_id: updated.user_id,
                    }),
                    None => {
                        info!(
                            account_id = %account.id,
                            "no payout account linked to gateway account"
                        );
                        Ok(WebhookOutcome::UnknownAccount {
                            account_id: account.id,
                        })
                    }
                }
            }
            other => {
                debug!(event_type = other, "ignoring unhandled event type");
                Ok(WebhookOutcome::Ignored {
                    event_type: other.to_owned(),
                })
            }
        }
    }

    async fn sync_transfer(
        &self,
        transfer_id: &str,
        status: Option<PayoutStatus>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(payout) = self
            .ledger
            .store()
            .payout_by_transfer(transfer_id)
            .await
            .map_err(LedgerError::from)?
        else {
            info!(transfer_id, "no payout matches transfer");
            return Ok(WebhookOutcome::UnknownTransfer {
                transfer_id: transfer_id.to_owned(),
            });
        };
        let payout_id = payout.id;
        let Some(status) = status else {
            return Ok(WebhookOutcome::Unchanged { payout_id });
        };

        Ok(match self.ledger.apply_payout_status(payout_id, status).await? {
            PayoutChange::Unchanged => WebhookOutcome::Unchanged { payout_id },
            PayoutChange::Updated { from, to } => WebhookOutcome::Updated {
                payout_id,
                from,
                to,
            },
            PayoutChange::Refunded(refund) => WebhookOutcome::Refunded {
                payout_id,
                refund_entry: refund.id,
            },
            PayoutChange::AlreadyRefunded => WebhookOutcome::AlreadyRefunded { payout_id },
        })
    }
}
