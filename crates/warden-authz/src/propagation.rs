use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;
use warden_core::{has_sufficient_role, Role, UserId};
use warden_protocol::RevocationNotice;

use crate::{
    cache::PermissionCache,
    errors::AuthzError,
    events::{membership_revoked, notice_kind, role_downgraded},
    metrics::{
        record_revocation_notice_dropped, record_revocation_notice_emitted,
        NOTICE_DROP_REASON_CLOSED, NOTICE_DROP_REASON_FULL_QUEUE,
        NOTICE_DROP_REASON_NO_CONNECTION, NOTICE_DROP_REASON_SERIALIZE_ERROR,
    },
    registry::{ConnectionRegistry, NotifyError, SubscriptionRegistry},
    repository::MembershipListRepository,
};

/// What one propagation run touched. Reporting only: callers log it, and
/// `notified_connection_ids` is the authoritative record of which clients
/// actually received the push.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationResult {
    pub affected_connections: usize,
    pub removed_subscriptions: usize,
    pub notified_connection_ids: Vec<Uuid>,
}

/// Reacts to membership changes reported by the persistence layer:
/// locates every live connection of the affected user, tears down
/// now-unauthorized subscriptions, pushes a `permission_revoked` notice,
/// and refreshes the cache entry so the change is visible before the TTL
/// would have caught it.
pub struct PermissionPropagation<R, C, S> {
    cache: Arc<PermissionCache<R>>,
    connections: C,
    subscriptions: S,
}

impl<R, C, S> PermissionPropagation<R, C, S>
where
    R: MembershipListRepository,
    C: ConnectionRegistry,
    S: SubscriptionRegistry,
{
    pub fn new(cache: Arc<PermissionCache<R>>, connections: C, subscriptions: S) -> Self {
        Self {
            cache,
            connections,
            subscriptions,
        }
    }

    /// Handles a membership that was removed outright. Per connection:
    /// tear down the tenant's subscriptions, push the notice best-effort,
    /// then refresh the cache entry.
    ///
    /// # Errors
    /// Repository failures during the cache refresh propagate; a failed
    /// push does not (the connection is just left out of
    /// `notified_connection_ids`).
    pub async fn on_membership_revoked(
        &self,
        user_id: UserId,
        tenant_id: &str,
    ) -> Result<PropagationResult, AuthzError> {
        let connection_ids = self.cache.connection_ids_for_user(user_id).await;
        let notice = membership_revoked(tenant_id);
        let mut result = PropagationResult {
            affected_connections: connection_ids.len(),
            ..PropagationResult::default()
        };

        for connection_id in connection_ids {
            result.removed_subscriptions += self
                .subscriptions
                .remove_subscriptions_for_tenant(connection_id, tenant_id)
                .await;
            if self.notify(connection_id, &notice).await {
                result.notified_connection_ids.push(connection_id);
            }
            self.cache.refresh_permissions(connection_id).await?;
        }

        tracing::info!(
            event = "authz.propagation.revoked",
            %user_id,
            tenant_id,
            affected = result.affected_connections,
            removed = result.removed_subscriptions,
            notified = result.notified_connection_ids.len()
        );
        Ok(result)
    }

    /// Handles a role change. An upgrade (or no change) only refreshes
    /// the affected cache entries: nothing the client holds became
    /// unauthorized. A downgrade refreshes first, so teardown-time checks
    /// already see the new role, then removes the tenant's subscriptions
    /// and pushes a notice carrying the new role.
    ///
    /// # Errors
    /// Repository failures during the cache refresh propagate.
    pub async fn on_role_changed(
        &self,
        user_id: UserId,
        tenant_id: &str,
        old_role: Role,
        new_role: Role,
    ) -> Result<PropagationResult, AuthzError> {
        let connection_ids = self.cache.connection_ids_for_user(user_id).await;
        let mut result = PropagationResult {
            affected_connections: connection_ids.len(),
            ..PropagationResult::default()
        };

        if has_sufficient_role(new_role, old_role) {
            for connection_id in connection_ids {
                self.cache.refresh_permissions(connection_id).await?;
            }
            tracing::info!(
                event = "authz.propagation.role_upgraded",
                %user_id,
                tenant_id,
                old_role = %old_role,
                new_role = %new_role,
                affected = result.affected_connections
            );
            return Ok(result);
        }

        let notice = role_downgraded(tenant_id, old_role, new_role);
        for connection_id in connection_ids {
            self.cache.refresh_permissions(connection_id).await?;
            result.removed_subscriptions += self
                .subscriptions
                .remove_subscriptions_for_tenant(connection_id, tenant_id)
                .await;
            if self.notify(connection_id, &notice).await {
                result.notified_connection_ids.push(connection_id);
            }
        }

        tracing::info!(
            event = "authz.propagation.role_downgraded",
            %user_id,
            tenant_id,
            old_role = %old_role,
            new_role = %new_role,
            affected = result.affected_connections,
            removed = result.removed_subscriptions,
            notified = result.notified_connection_ids.len()
        );
        Ok(result)
    }

    /// Best-effort push. Every failure mode is swallowed here; a client
    /// that already went away must not abort bookkeeping for the rest.
    async fn notify(&self, connection_id: Uuid, notice: &RevocationNotice) -> bool {
        let kind = notice_kind(notice);
        let Ok(payload) = notice.to_payload() else {
            record_revocation_notice_dropped(kind, NOTICE_DROP_REASON_SERIALIZE_ERROR);
            return false;
        };
        let Some(handle) = self.connections.get_connection(connection_id).await else {
            record_revocation_notice_dropped(kind, NOTICE_DROP_REASON_NO_CONNECTION);
            return false;
        };
        match handle.send(payload) {
            Ok(()) => {
                record_revocation_notice_emitted(kind);
                true
            }
            Err(NotifyError::QueueFull) => {
                record_revocation_notice_dropped(kind, NOTICE_DROP_REASON_FULL_QUEUE);
                false
            }
            Err(NotifyError::Closed) => {
                record_revocation_notice_dropped(kind, NOTICE_DROP_REASON_CLOSED);
                false
            }
        }
    }
}
