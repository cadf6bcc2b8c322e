use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;
use warden_authz::{
    subscription_key, AuthzConfig, ConnectionHandle, ConnectionRegistry,
    InMemoryConnectionRegistry, InMemoryMembershipStore, InMemorySubscriptionRegistry,
    PermissionCache, PermissionPropagation,
};
use warden_core::{Role, UserId};
use warden_protocol::{parse_notice, RevocationNotice};

type Store = Arc<InMemoryMembershipStore>;
type Connections = Arc<InMemoryConnectionRegistry>;
type Subscriptions = Arc<InMemorySubscriptionRegistry>;

struct Harness {
    store: Store,
    cache: Arc<PermissionCache<Store>>,
    connections: Connections,
    subscriptions: Subscriptions,
    propagation: PermissionPropagation<Store, Connections, Subscriptions>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryMembershipStore::new());
    let cache = Arc::new(PermissionCache::new(
        Arc::clone(&store),
        &AuthzConfig::default(),
    ));
    let connections = Arc::new(InMemoryConnectionRegistry::new());
    let subscriptions = Arc::new(InMemorySubscriptionRegistry::new());
    let propagation = PermissionPropagation::new(
        Arc::clone(&cache),
        Arc::clone(&connections),
        Arc::clone(&subscriptions),
    );
    Harness {
        store,
        cache,
        connections,
        subscriptions,
        propagation,
    }
}

async fn connect(harness: &Harness, user_id: UserId) -> (Uuid, mpsc::Receiver<String>) {
    let connection_id = Uuid::new_v4();
    harness
        .cache
        .load_permissions(connection_id, user_id)
        .await
        .expect("permission load should succeed");
    let (handle, receiver) = ConnectionHandle::channel(AuthzConfig::default().outbound_queue);
    harness.connections.register(connection_id, handle).await;
    (connection_id, receiver)
}

#[tokio::test]
async fn revocation_reaches_the_live_connection_end_to_end() {
    let harness = harness();
    let user_id = UserId::new();
    harness.store.upsert_membership("t-1", user_id, "admin").await;
    harness.store.upsert_membership("t-2", user_id, "viewer").await;

    let (connection_id, mut receiver) = connect(&harness, user_id).await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-a"))
        .await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-b"))
        .await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-2", "doc-c"))
        .await;
    assert!(harness.cache.has_role(connection_id, "t-1", Role::Admin).await);

    harness.store.remove_membership(user_id, "t-1").await;
    let result = harness
        .propagation
        .on_membership_revoked(user_id, "t-1")
        .await
        .expect("propagation should succeed");

    assert_eq!(result.affected_connections, 1);
    assert_eq!(result.removed_subscriptions, 2);
    assert_eq!(result.notified_connection_ids, vec![connection_id]);

    let payload = receiver.recv().await.expect("notice should arrive");
    let notice = parse_notice(payload.as_bytes()).expect("notice should parse");
    assert!(matches!(notice, RevocationNotice::FullyRevoked { .. }));
    assert_eq!(notice.tenant_id(), "t-1");
    assert!(notice.reason().contains("removed"));

    // The cache reflects the revocation immediately, not after the TTL.
    assert!(!harness.cache.has_role(connection_id, "t-1", Role::Viewer).await);
    assert!(harness.cache.has_role(connection_id, "t-2", Role::Viewer).await);
    assert_eq!(
        harness.subscriptions.subscription_count(connection_id).await,
        1
    );

    // The result serializes for audit logs.
    let audit = serde_json::to_value(&result).expect("result should serialize");
    assert_eq!(audit["affected_connections"], 1);
    assert_eq!(audit["removed_subscriptions"], 2);
    assert_eq!(
        audit["notified_connection_ids"][0],
        connection_id.to_string()
    );
}

#[tokio::test]
async fn upgrades_refresh_silently() {
    let harness = harness();
    let user_id = UserId::new();
    harness.store.upsert_membership("t-1", user_id, "viewer").await;

    let (connection_id, mut receiver) = connect(&harness, user_id).await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-a"))
        .await;
    assert!(!harness.cache.has_role(connection_id, "t-1", Role::Admin).await);

    harness.store.upsert_membership("t-1", user_id, "admin").await;
    let result = harness
        .propagation
        .on_role_changed(user_id, "t-1", Role::Viewer, Role::Admin)
        .await
        .expect("propagation should succeed");

    assert_eq!(result.affected_connections, 1);
    assert_eq!(result.removed_subscriptions, 0);
    assert!(result.notified_connection_ids.is_empty());
    assert!(receiver.try_recv().is_err(), "upgrade must not notify");

    assert!(harness.cache.has_role(connection_id, "t-1", Role::Admin).await);
    assert_eq!(
        harness.subscriptions.subscription_count(connection_id).await,
        1
    );
}

#[tokio::test]
async fn downgrades_refresh_before_teardown_and_carry_the_new_role() {
    let harness = harness();
    let user_id = UserId::new();
    harness.store.upsert_membership("t-1", user_id, "admin").await;

    let (connection_id, mut receiver) = connect(&harness, user_id).await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-a"))
        .await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-b"))
        .await;

    harness.store.upsert_membership("t-1", user_id, "viewer").await;
    let result = harness
        .propagation
        .on_role_changed(user_id, "t-1", Role::Admin, Role::Viewer)
        .await
        .expect("propagation should succeed");

    assert_eq!(result.removed_subscriptions, 2);
    assert_eq!(result.notified_connection_ids, vec![connection_id]);

    let payload = receiver.recv().await.expect("notice should arrive");
    let value: Value = serde_json::from_str(&payload).expect("payload should be json");
    assert_eq!(value["type"], "permission_revoked");
    assert_eq!(value["tenantId"], "t-1");
    assert_eq!(value["newRole"], "viewer");
    let reason = value["reason"].as_str().expect("reason should be a string");
    assert!(reason.contains("admin") && reason.contains("viewer"));

    // The check made right after the call sees the downgraded role.
    assert!(!harness.cache.has_role(connection_id, "t-1", Role::Admin).await);
    assert!(harness.cache.has_role(connection_id, "t-1", Role::Viewer).await);
}

#[tokio::test]
async fn failed_pushes_are_swallowed_and_unreported() {
    let harness = harness();
    let user_id = UserId::new();
    harness.store.upsert_membership("t-1", user_id, "member").await;

    let (connection_id, receiver) = connect(&harness, user_id).await;
    harness
        .subscriptions
        .add_subscription(connection_id, subscription_key("t-1", "doc-a"))
        .await;
    drop(receiver);

    harness.store.remove_membership(user_id, "t-1").await;
    let result = harness
        .propagation
        .on_membership_revoked(user_id, "t-1")
        .await
        .expect("a dead socket must not fail propagation");

    assert_eq!(result.affected_connections, 1);
    assert_eq!(result.removed_subscriptions, 1);
    assert!(result.notified_connection_ids.is_empty());
    assert!(!harness.cache.has_role(connection_id, "t-1", Role::Viewer).await);
}

#[tokio::test]
async fn connections_missing_from_the_registry_are_still_corrected() {
    let harness = harness();
    let user_id = UserId::new();
    harness.store.upsert_membership("t-1", user_id, "owner").await;

    let connection_id = Uuid::new_v4();
    harness
        .cache
        .load_permissions(connection_id, user_id)
        .await
        .expect("permission load should succeed");

    harness.store.remove_membership(user_id, "t-1").await;
    let result = harness
        .propagation
        .on_membership_revoked(user_id, "t-1")
        .await
        .expect("propagation should succeed");

    assert_eq!(result.affected_connections, 1);
    assert!(result.notified_connection_ids.is_empty());
    assert!(!harness.cache.has_role(connection_id, "t-1", Role::Viewer).await);
}

#[tokio::test]
async fn every_connection_of_the_user_is_notified_and_others_are_not() {
    let harness = harness();
    let alice = UserId::new();
    let bob = UserId::new();
    harness.store.upsert_membership("t-1", alice, "member").await;
    harness.store.upsert_membership("t-1", bob, "member").await;

    let (alice_first, mut alice_first_rx) = connect(&harness, alice).await;
    let (alice_second, mut alice_second_rx) = connect(&harness, alice).await;
    let (bob_connection, mut bob_rx) = connect(&harness, bob).await;
    for connection_id in [alice_first, alice_second, bob_connection] {
        harness
            .subscriptions
            .add_subscription(connection_id, subscription_key("t-1", "doc-a"))
            .await;
    }
    assert_eq!(harness.connections.connection_ids().await.len(), 3);

    harness.store.remove_membership(alice, "t-1").await;
    let result = harness
        .propagation
        .on_membership_revoked(alice, "t-1")
        .await
        .expect("propagation should succeed");

    assert_eq!(result.affected_connections, 2);
    assert_eq!(result.removed_subscriptions, 2);
    assert_eq!(result.notified_connection_ids.len(), 2);
    assert!(result.notified_connection_ids.contains(&alice_first));
    assert!(result.notified_connection_ids.contains(&alice_second));

    assert!(alice_first_rx.recv().await.is_some());
    assert!(alice_second_rx.recv().await.is_some());
    assert!(bob_rx.try_recv().is_err(), "other users must not be notified");
    assert!(harness.cache.has_role(bob_connection, "t-1", Role::Member).await);
    assert_eq!(
        harness.subscriptions.subscription_count(bob_connection).await,
        1
    );
}
