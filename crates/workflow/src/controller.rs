use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::{ActorId, ActorKind, TenantId},
    protocol::{ActorAttrs, FieldErrors},
};
use tracing::debug;

use crate::{
    validate::{validate, Strictness},
    ActorRecord, ActorStore, CreateActorError, Draft, GroupDirectory,
};

/// Session state. The rejected states carry the last outcome but accept
/// events exactly like `Editing`; `Created` is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormState {
    Editing,
    Committing,
    Created,
    RejectedValidation,
    RejectedQuota,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Rejected {
        field_errors: FieldErrors,
    },
    QuotaExceeded {
        limit: i64,
        field_errors: FieldErrors,
    },
    Created {
        actor: ActorRecord,
    },
    /// This session already created its actor; the original handoff id is
    /// repeated and no second entity exists.
    AlreadyCreated {
        actor_id: ActorId,
    },
}

/// Orchestrates validation, the quota-guarded store and the handoff for one
/// form session. Owns the draft; collaborators arrive as injected traits.
pub struct WorkflowController {
    tenant_id: TenantId,
    groups: Arc<dyn GroupDirectory>,
    actors: Arc<dyn ActorStore>,
    state: FormState,
    draft: Draft,
    created: Option<ActorId>,
}

impl WorkflowController {
    pub fn new(
        tenant_id: TenantId,
        kind: ActorKind,
        groups: Arc<dyn GroupDirectory>,
        actors: Arc<dyn ActorStore>,
    ) -> Self {
        Self {
            tenant_id,
            groups,
            actors,
            state: FormState::Editing,
            draft: Draft::new(kind),
            created: None,
        }
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Merges the change into the draft and re-renders field errors. Never
    /// touches the store. A change after `Created` is ignored.
    pub async fn handle_change(&mut self, attrs: &ActorAttrs) -> Result<FieldErrors> {
        if self.created.is_some() {
            return Ok(FieldErrors::default());
        }
        self.draft.merge(attrs);
        let validation = validate(
            &self.draft,
            self.tenant_id,
            self.groups.as_ref(),
            Strictness::OnChange,
        )
        .await?;
        self.state = FormState::Editing;
        Ok(validation.field_errors)
    }

    pub async fn handle_submit(&mut self, attrs: &ActorAttrs) -> Result<SubmitOutcome> {
        if let Some(actor_id) = self.created {
            debug!(actor_id = actor_id.0, "duplicate submit after creation");
            return Ok(SubmitOutcome::AlreadyCreated { actor_id });
        }

        self.draft.merge(attrs);
        let validation = validate(
            &self.draft,
            self.tenant_id,
            self.groups.as_ref(),
            Strictness::OnSubmit,
        )
        .await?;
        let Some(actor) = validation.actor else {
            self.state = FormState::RejectedValidation;
            return Ok(SubmitOutcome::Rejected {
                field_errors: validation.field_errors,
            });
        };

        self.state = FormState::Committing;
        match self.actors.create_actor(self.tenant_id, &actor).await {
            Ok(record) => {
                debug!(actor_id = record.id.0, "actor created");
                self.state = FormState::Created;
                self.created = Some(record.id);
                Ok(SubmitOutcome::Created { actor: record })
            }
            Err(CreateActorError::QuotaExceeded { limit }) => {
                // Field errors are rebuilt from the submitted draft before the
                // notice goes out; the pre-commit pass is not reused.
                let revalidated = validate(
                    &self.draft,
                    self.tenant_id,
                    self.groups.as_ref(),
                    Strictness::OnSubmit,
                )
                .await?;
                self.state = FormState::RejectedQuota;
                Ok(SubmitOutcome::QuotaExceeded {
                    limit,
                    field_errors: revalidated.field_errors,
                })
            }
            Err(CreateActorError::NameTaken) => {
                let mut field_errors = FieldErrors::default();
                field_errors.add("name", "has already been taken");
                self.state = FormState::RejectedValidation;
                Ok(SubmitOutcome::Rejected { field_errors })
            }
            Err(CreateActorError::MissingGroup) => {
                let mut field_errors = FieldErrors::default();
                field_errors.add("memberships", "does not exist");
                self.state = FormState::RejectedValidation;
                Ok(SubmitOutcome::Rejected { field_errors })
            }
            Err(err) => {
                // Unclassified storage failure: not retried here, the session
                // stays usable for a resubmit.
                self.state = FormState::Editing;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
