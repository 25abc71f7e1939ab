use anyhow::Result;
use shared::{domain::TenantId, protocol::FieldErrors};

use crate::{Draft, GroupDirectory, ValidatedActor};

pub const NAME_MAX_CHARS: usize = 512;

/// Presentation context for one shared rule set. The rules themselves never
/// differ between contexts, so per-keystroke and final-submit feedback cannot
/// drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Per-keystroke feedback: a still-empty required field is treated as
    /// not-yet-satisfied and kept out of the reported errors.
    OnChange,
    /// Final-submit feedback: every violated rule is reported.
    OnSubmit,
}

#[derive(Debug)]
pub struct Validation {
    pub field_errors: FieldErrors,
    /// Present only when the full rule set passed, independent of which
    /// messages `strictness` let through.
    pub actor: Option<ValidatedActor>,
}

/// Evaluates the complete rule set over the draft. Deterministic; all
/// violated rules for a field are reported in a fixed order. The group
/// lookup is the only collaborator touched, and only when the draft
/// references memberships.
pub async fn validate(
    draft: &Draft,
    tenant_id: TenantId,
    groups: &dyn GroupDirectory,
    strictness: Strictness,
) -> Result<Validation> {
    let mut field_errors = FieldErrors::default();
    let mut valid = true;

    let name = draft.name.trim();
    if name.is_empty() {
        valid = false;
        if strictness == Strictness::OnSubmit {
            field_errors.add("name", "can't be blank");
        }
    } else if name.chars().count() > NAME_MAX_CHARS {
        valid = false;
        field_errors.add(
            "name",
            format!("should be at most {NAME_MAX_CHARS} character(s)"),
        );
    }

    if !draft.memberships.is_empty() {
        let existing = groups.existing_groups(tenant_id, &draft.memberships).await?;
        for missing in draft.memberships.difference(&existing) {
            valid = false;
            field_errors.add("memberships", format!("group {} does not exist", missing.0));
        }
    }

    let actor = valid.then(|| ValidatedActor {
        kind: draft.kind,
        name: name.to_string(),
        memberships: draft.memberships.clone(),
    });

    Ok(Validation {
        field_errors,
        actor,
    })
}
