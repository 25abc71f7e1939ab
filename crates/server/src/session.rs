use std::sync::Arc;

use shared::{
    domain::{ActorId, ActorKind, TenantId},
    error::{ApiError, ErrorCode},
    protocol::{FormEvent, FormResponse, TenantNotice},
};
use storage::Storage;
use tracing::error;
use workflow::{SubmitOutcome, WorkflowController};

/// One provisioning form session. Owns the controller for the lifetime of
/// the websocket connection and translates controller outcomes into wire
/// frames; the caller guarantees events arrive one at a time.
pub struct FormSession {
    tenant_id: TenantId,
    controller: WorkflowController,
}

impl FormSession {
    pub fn new(tenant_id: TenantId, storage: Storage) -> Self {
        let storage = Arc::new(storage);
        let controller = WorkflowController::new(
            tenant_id,
            ActorKind::ServiceAccount,
            storage.clone(),
            storage,
        );
        Self {
            tenant_id,
            controller,
        }
    }

    pub async fn handle(&mut self, event: FormEvent) -> FormResponse {
        match event {
            FormEvent::Change { attrs } => match self.controller.handle_change(&attrs).await {
                Ok(field_errors) => FormResponse::Form { field_errors },
                Err(err) => internal(&err),
            },
            FormEvent::Submit { attrs } => match self.controller.handle_submit(&attrs).await {
                Ok(SubmitOutcome::Created { actor }) => FormResponse::Navigate {
                    to: new_identity_path(self.tenant_id, actor.id),
                },
                Ok(SubmitOutcome::AlreadyCreated { actor_id }) => FormResponse::Navigate {
                    to: new_identity_path(self.tenant_id, actor_id),
                },
                Ok(SubmitOutcome::Rejected { field_errors }) => {
                    FormResponse::Form { field_errors }
                }
                Ok(SubmitOutcome::QuotaExceeded {
                    limit,
                    field_errors,
                }) => FormResponse::QuotaNotice {
                    notice: TenantNotice::QuotaExceeded { limit },
                    field_errors,
                },
                Err(err) => internal(&err),
            },
        }
    }
}

/// Second-stage (credential issuance) location for a created actor; the
/// handoff token is the actor id itself.
pub fn new_identity_path(tenant_id: TenantId, actor_id: ActorId) -> String {
    format!(
        "/tenants/{}/service_accounts/{}/new_identity",
        tenant_id.0, actor_id.0
    )
}

fn internal(err: &anyhow::Error) -> FormResponse {
    error!(%err, "form event failed");
    FormResponse::Error(ApiError::new(ErrorCode::Internal, err.to_string()))
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
