use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ActorId, ActorKind, GroupId, TenantId},
    protocol::ActorAttrs,
};
use thiserror::Error;

pub mod controller;
pub mod validate;

pub use controller::{FormState, SubmitOutcome, WorkflowController};
pub use validate::{validate, Strictness, Validation};

/// Session-owned candidate actor state. Never persisted; mutated only by the
/// controller merging submitted attributes.
#[derive(Debug, Clone)]
pub struct Draft {
    pub kind: ActorKind,
    pub name: String,
    pub memberships: BTreeSet<GroupId>,
}

impl Draft {
    pub fn new(kind: ActorKind) -> Self {
        Self {
            kind,
            name: String::new(),
            memberships: BTreeSet::new(),
        }
    }

    /// Merges raw transport attributes into the typed draft. Absent fields
    /// keep their current value; present fields replace it wholesale.
    pub fn merge(&mut self, attrs: &ActorAttrs) {
        if let Some(name) = &attrs.name {
            self.name = name.clone();
        }
        if let Some(memberships) = &attrs.memberships {
            self.memberships = memberships.iter().copied().map(GroupId).collect();
        }
    }
}

/// Draft that passed the full rule set; the only shape the store accepts.
/// The name is already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedActor {
    pub kind: ActorKind,
    pub name: String,
    pub memberships: BTreeSet<GroupId>,
}

/// Persisted actor as returned by the store after commit.
#[derive(Debug, Clone)]
pub struct ActorRecord {
    pub id: ActorId,
    pub tenant_id: TenantId,
    pub kind: ActorKind,
    pub name: String,
    pub memberships: BTreeSet<GroupId>,
    pub created_at: DateTime<Utc>,
}

/// Read-only group existence lookup used by validation.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Returns the subset of `ids` that exist for `tenant_id`.
    async fn existing_groups(
        &self,
        tenant_id: TenantId,
        ids: &BTreeSet<GroupId>,
    ) -> Result<BTreeSet<GroupId>>;
}

/// Durable creation. The per-tenant slot check and the insert must share one
/// transaction so concurrent submissions cannot both pass the check.
#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn create_actor(
        &self,
        tenant_id: TenantId,
        actor: &ValidatedActor,
    ) -> Result<ActorRecord, CreateActorError>;
}

#[derive(Debug, Error)]
pub enum CreateActorError {
    /// The tenant is at its configured limit; no row was written and no slot
    /// was consumed.
    #[error("service account limit of {limit} reached")]
    QuotaExceeded { limit: i64 },
    #[error("actor name has already been taken")]
    NameTaken,
    #[error("membership references a group outside the tenant")]
    MissingGroup,
    #[error("tenant not found")]
    TenantNotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
