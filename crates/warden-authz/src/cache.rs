use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use uuid::Uuid;
use warden_core::{has_sufficient_role, Role, UserId};

use crate::{
    core::{AuthzConfig, ConnectionPermissions},
    errors::AuthzError,
    metrics::record_cache_refresh,
    repository::{Membership, MembershipListRepository},
};

/// Both maps update in lockstep, so they live behind one lock.
#[derive(Default)]
struct CacheMaps {
    permissions: HashMap<Uuid, ConnectionPermissions>,
    connection_users: HashMap<Uuid, UserId>,
}

/// Per-connection cache of a user's tenant memberships with TTL expiry.
/// Sole owner of both connection maps; every reload replaces the whole
/// snapshot.
pub struct PermissionCache<R> {
    repo: R,
    ttl: Duration,
    maps: RwLock<CacheMaps>,
}

impl<R: MembershipListRepository> PermissionCache<R> {
    pub fn new(repo: R, config: &AuthzConfig) -> Self {
        Self {
            repo,
            ttl: config.permission_ttl,
            maps: RwLock::new(CacheMaps::default()),
        }
    }

    /// Loads the user's memberships and stores a fresh snapshot for the
    /// connection, overwriting any prior entry for that connection id.
    ///
    /// # Errors
    /// Repository failures propagate unchanged; nothing is cached on error.
    pub async fn load_permissions(
        &self,
        connection_id: Uuid,
        user_id: UserId,
    ) -> Result<ConnectionPermissions, AuthzError> {
        let memberships = self.repo.find_by_user_id(user_id).await?;
        let entry = build_entry(user_id, memberships);
        tracing::debug!(
            event = "authz.cache.load",
            %connection_id,
            %user_id,
            memberships = entry.memberships.len()
        );

        let mut maps = self.maps.write().await;
        maps.connection_users.insert(connection_id, user_id);
        maps.permissions.insert(connection_id, entry.clone());
        Ok(entry)
    }

    /// Returns the snapshot for the connection unless it is unknown or
    /// stale. Never mutates: an expired entry stays in place until it is
    /// reloaded, refreshed, or removed.
    pub async fn get_connection_permissions(
        &self,
        connection_id: Uuid,
    ) -> Option<ConnectionPermissions> {
        let maps = self.maps.read().await;
        let entry = maps.permissions.get(&connection_id)?;
        if entry.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.clone())
    }

    /// The single authorization gate for inbound tenant-scoped traffic.
    /// False when the connection is unknown or expired, when the user has
    /// no membership in the tenant, or when the stored role string does
    /// not parse.
    pub async fn has_role(&self, connection_id: Uuid, tenant_id: &str, required: Role) -> bool {
        let maps = self.maps.read().await;
        let Some(entry) = maps.permissions.get(&connection_id) else {
            return false;
        };
        if entry.loaded_at.elapsed() > self.ttl {
            return false;
        }
        let Some(membership) = entry.memberships.get(tenant_id) else {
            return false;
        };
        Role::parse(&membership.role).is_ok_and(|actual| has_sufficient_role(actual, required))
    }

    /// Reloads the connection's snapshot using the user id recorded at
    /// load time. Returns `None` for connections that were never loaded or
    /// were removed. Removal is permanent, even if a reload is already in
    /// flight when it happens.
    ///
    /// # Errors
    /// Repository failures propagate unchanged.
    pub async fn refresh_permissions(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<ConnectionPermissions>, AuthzError> {
        let user_id = {
            let maps = self.maps.read().await;
            maps.connection_users.get(&connection_id).copied()
        };
        let Some(user_id) = user_id else {
            record_cache_refresh("unknown_connection");
            return Ok(None);
        };

        let memberships = self.repo.find_by_user_id(user_id).await?;
        let entry = build_entry(user_id, memberships);

        let mut maps = self.maps.write().await;
        if maps.connection_users.get(&connection_id) != Some(&user_id) {
            record_cache_refresh("removed_mid_refresh");
            return Ok(None);
        }
        maps.permissions.insert(connection_id, entry.clone());
        record_cache_refresh("refreshed");
        Ok(Some(entry))
    }

    /// Drops the connection's snapshot and user association. Idempotent.
    pub async fn remove_connection(&self, connection_id: Uuid) {
        let mut maps = self.maps.write().await;
        maps.permissions.remove(&connection_id);
        maps.connection_users.remove(&connection_id);
    }

    /// Entries currently tracked, expired or not. Monitoring only.
    pub async fn active_connection_count(&self) -> usize {
        self.maps.read().await.permissions.len()
    }

    /// Every connection id currently associated with the user. An
    /// O(connections) scan; propagation is rare enough that no secondary
    /// index is kept.
    pub(crate) async fn connection_ids_for_user(&self, user_id: UserId) -> Vec<Uuid> {
        let maps = self.maps.read().await;
        maps.connection_users
            .iter()
            .filter_map(|(connection_id, owner)| (*owner == user_id).then_some(*connection_id))
            .collect()
    }
}

fn build_entry(user_id: UserId, memberships: Vec<Membership>) -> ConnectionPermissions {
    let mut by_tenant = HashMap::with_capacity(memberships.len());
    for membership in memberships {
        // Last write wins if the repository ever returns duplicate tenants.
        by_tenant.insert(membership.tenant_id.clone(), membership);
    }
    ConnectionPermissions {
        user_id,
        memberships: by_tenant,
        loaded_at: Instant::now(),
    }
}
