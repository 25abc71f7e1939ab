use super::*;
use shared::protocol::ActorAttrs;

async fn setup(limit: i64) -> (Storage, TenantId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let tenant = storage.create_tenant("acme", limit).await.expect("tenant");
    (storage, tenant)
}

fn change(name: &str) -> FormEvent {
    FormEvent::Change {
        attrs: ActorAttrs {
            name: Some(name.to_string()),
            memberships: None,
        },
    }
}

fn submit(name: &str) -> FormEvent {
    FormEvent::Submit {
        attrs: ActorAttrs {
            name: Some(name.to_string()),
            memberships: None,
        },
    }
}

#[tokio::test]
async fn submit_navigates_to_the_new_identity_page() {
    let (storage, tenant) = setup(1).await;
    let mut session = FormSession::new(tenant, storage.clone());

    let response = session.handle(submit("svc-1")).await;
    let FormResponse::Navigate { to } = response else {
        panic!("expected navigation, got {response:?}");
    };
    let actors = storage
        .list_actors_for_tenant(tenant, ActorKind::ServiceAccount)
        .await
        .expect("actors");
    assert_eq!(actors.len(), 1);
    assert_eq!(to, new_identity_path(tenant, actors[0].id));
    assert!(to.ends_with("/new_identity"));
}

#[tokio::test]
async fn second_session_hits_the_quota_notice() {
    let (storage, tenant) = setup(1).await;

    let mut first = FormSession::new(tenant, storage.clone());
    let FormResponse::Navigate { .. } = first.handle(submit("svc-1")).await else {
        panic!("first session should navigate");
    };

    let mut second = FormSession::new(tenant, storage.clone());
    let response = second.handle(submit("svc-2")).await;
    let FormResponse::QuotaNotice {
        notice,
        field_errors,
    } = response
    else {
        panic!("second session should hit the quota, got {response:?}");
    };
    assert_eq!(notice, TenantNotice::QuotaExceeded { limit: 1 });
    assert!(field_errors.is_empty());

    let count = storage
        .count_actors(tenant, ActorKind::ServiceAccount)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn blank_submit_renders_field_errors_and_creates_nothing() {
    let (storage, tenant) = setup(1).await;
    let mut session = FormSession::new(tenant, storage.clone());

    let response = session.handle(submit("")).await;
    let FormResponse::Form { field_errors } = response else {
        panic!("expected field errors, got {response:?}");
    };
    assert_eq!(
        field_errors.messages("name"),
        ["can't be blank".to_string()]
    );

    let count = storage
        .count_actors(tenant, ActorKind::ServiceAccount)
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn change_events_render_live_errors_without_required_noise() {
    let (storage, tenant) = setup(1).await;
    let mut session = FormSession::new(tenant, storage);

    // An untouched required field stays quiet while typing.
    let FormResponse::Form { field_errors } = session.handle(change("")).await else {
        panic!("expected form render");
    };
    assert!(field_errors.is_empty());

    let FormResponse::Form { field_errors } = session.handle(change(&"x".repeat(513))).await
    else {
        panic!("expected form render");
    };
    assert_eq!(
        field_errors.messages("name"),
        ["should be at most 512 character(s)".to_string()]
    );

    let FormResponse::Form { field_errors } = session.handle(change("svc-1")).await else {
        panic!("expected form render");
    };
    assert!(field_errors.is_empty());
}

#[tokio::test]
async fn resubmit_after_creation_repeats_the_handoff() {
    let (storage, tenant) = setup(5).await;
    let mut session = FormSession::new(tenant, storage.clone());

    let FormResponse::Navigate { to: first } = session.handle(submit("svc-1")).await else {
        panic!("expected navigation");
    };
    let FormResponse::Navigate { to: second } = session.handle(submit("svc-other")).await else {
        panic!("expected repeated navigation");
    };
    assert_eq!(first, second);

    let count = storage
        .count_actors(tenant, ActorKind::ServiceAccount)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn duplicate_name_from_another_session_becomes_a_field_error() {
    let (storage, tenant) = setup(5).await;

    let mut first = FormSession::new(tenant, storage.clone());
    let FormResponse::Navigate { .. } = first.handle(submit("svc-1")).await else {
        panic!("first session should navigate");
    };

    let mut second = FormSession::new(tenant, storage);
    let response = second.handle(submit("svc-1")).await;
    let FormResponse::Form { field_errors } = response else {
        panic!("expected field errors, got {response:?}");
    };
    assert_eq!(
        field_errors.messages("name"),
        ["has already been taken".to_string()]
    );
}

#[tokio::test]
async fn membership_flow_validates_and_persists_group_links() {
    let (storage, tenant) = setup(5).await;
    let ops = storage.create_group(tenant, "ops").await.expect("group");
    let mut session = FormSession::new(tenant, storage.clone());

    let event = FormEvent::Change {
        attrs: ActorAttrs {
            name: Some("svc-deploy".to_string()),
            memberships: Some(vec![ops.0, 42]),
        },
    };
    let FormResponse::Form { field_errors } = session.handle(event).await else {
        panic!("expected form render");
    };
    assert_eq!(
        field_errors.messages("memberships"),
        ["group 42 does not exist".to_string()]
    );

    let event = FormEvent::Submit {
        attrs: ActorAttrs {
            name: None,
            memberships: Some(vec![ops.0]),
        },
    };
    let FormResponse::Navigate { .. } = session.handle(event).await else {
        panic!("corrected draft should navigate");
    };

    let actors = storage
        .list_actors_for_tenant(tenant, ActorKind::ServiceAccount)
        .await
        .expect("actors");
    assert_eq!(actors[0].memberships, [ops].into_iter().collect());
}
