use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ActorId, ActorKind, GroupId, TenantId},
    error::ApiError,
};

/// Raw form attributes as submitted by the client. Fields absent from a
/// change event leave the corresponding draft field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memberships: Option<Vec<i64>>,
}

/// Field name -> ordered list of human-readable messages. Empty map means
/// the draft is valid. Rebuilt from scratch on every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Tenant-level blocking notice, rendered on a separate channel from
/// per-field errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenantNotice {
    QuotaExceeded { limit: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FormEvent {
    Change { attrs: ActorAttrs },
    Submit { attrs: ActorAttrs },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FormResponse {
    Form {
        field_errors: FieldErrors,
    },
    QuotaNotice {
        notice: TenantNotice,
        field_errors: FieldErrors,
    },
    Navigate {
        to: String,
    },
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub tenant_id: TenantId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSummary {
    pub actor_id: ActorId,
    pub tenant_id: TenantId,
    pub kind: ActorKind,
    pub name: String,
    pub memberships: Vec<GroupId>,
    pub created_at: DateTime<Utc>,
}
