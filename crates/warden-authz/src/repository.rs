use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio::sync::RwLock;
use ulid::Ulid;
use warden_core::UserId;

use crate::{core::now_unix, errors::AuthzError};

/// A user's standing in one tenant. The role is kept as the raw string the
/// store returned; sufficiency checks parse it and treat anything
/// unrecognized as insufficient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub membership_id: String,
    pub tenant_id: String,
    pub user_id: UserId,
    pub role: String,
    pub created_at_unix: i64,
    pub updated_at_unix: i64,
}

#[allow(async_fn_in_trait)]
pub trait MembershipListRepository {
    /// Returns every membership the user holds, across tenants.
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<Membership>, AuthzError>;
}

#[allow(async_fn_in_trait)]
pub trait MembershipRepository {
    /// Returns the user's membership in the tenant, if any. Existence is
    /// read access; the role does not matter here.
    async fn find_by_user_and_tenant(
        &self,
        user_id: UserId,
        tenant_id: &str,
    ) -> Result<Option<Membership>, AuthzError>;
}

impl<T> MembershipListRepository for Arc<T>
where
    T: MembershipListRepository + Send + Sync,
{
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<Membership>, AuthzError> {
        self.as_ref().find_by_user_id(user_id).await
    }
}

impl<T> MembershipRepository for Arc<T>
where
    T: MembershipRepository + Send + Sync,
{
    async fn find_by_user_and_tenant(
        &self,
        user_id: UserId,
        tenant_id: &str,
    ) -> Result<Option<Membership>, AuthzError> {
        self.as_ref().find_by_user_and_tenant(user_id, tenant_id).await
    }
}

/// In-memory membership backend. Hosts use it for tests and single-node
/// deployments; the mutation helpers exist so revocation scenarios can be
/// driven without a database.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    memberships: RwLock<HashMap<(UserId, String), Membership>>,
}

impl InMemoryMembershipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the membership for `(user_id, tenant_id)`,
    /// returning the stored record. One membership per pair.
    pub async fn upsert_membership(
        &self,
        tenant_id: &str,
        user_id: UserId,
        role: &str,
    ) -> Membership {
        let mut memberships = self.memberships.write().await;
        let key = (user_id, tenant_id.to_owned());
        let now = now_unix();
        let record = match memberships.get(&key) {
            Some(existing) => Membership {
                role: role.to_owned(),
                updated_at_unix: now,
                ..existing.clone()
            },
            None => Membership {
                membership_id: Ulid::new().to_string(),
                tenant_id: tenant_id.to_owned(),
                user_id,
                role: role.to_owned(),
                created_at_unix: now,
                updated_at_unix: now,
            },
        };
        memberships.insert(key, record.clone());
        record
    }

    /// Removes the membership, reporting whether one existed.
    pub async fn remove_membership(&self, user_id: UserId, tenant_id: &str) -> bool {
        self.memberships
            .write()
            .await
            .remove(&(user_id, tenant_id.to_owned()))
            .is_some()
    }
}

impl MembershipListRepository for InMemoryMembershipStore {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<Membership>, AuthzError> {
        let memberships = self.memberships.read().await;
        let mut found: Vec<Membership> = memberships
            .values()
            .filter(|membership| membership.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.created_at_unix
                .cmp(&b.created_at_unix)
                .then_with(|| a.tenant_id.cmp(&b.tenant_id))
        });
        Ok(found)
    }
}

impl MembershipRepository for InMemoryMembershipStore {
    async fn find_by_user_and_tenant(
        &self,
        user_id: UserId,
        tenant_id: &str,
    ) -> Result<Option<Membership>, AuthzError> {
        let memberships = self.memberships.read().await;
        Ok(memberships.get(&(user_id, tenant_id.to_owned())).cloned())
    }
}

/// Read-only `memberships` table adapter. This subsystem only consumes
/// role data; writes stay with the owning service.
pub struct PostgresMembershipRepository {
    pool: PgPool,
}

impl PostgresMembershipRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a repository over a lazily-connected pool.
    ///
    /// # Errors
    /// Returns an error if the connection string is invalid.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)
            .map_err(|e| anyhow!("postgres pool init failed: {e}"))?;
        Ok(Self::new(pool))
    }
}

impl MembershipListRepository for PostgresMembershipRepository {
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Vec<Membership>, AuthzError> {
        let rows = sqlx::query(
            "SELECT membership_id, tenant_id, user_id, role, created_at_unix, updated_at_unix
             FROM memberships
             WHERE user_id = $1
             ORDER BY created_at_unix",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut memberships = Vec::with_capacity(rows.len());
        for row in rows {
            memberships.push(membership_from_row(&row)?);
        }
        Ok(memberships)
    }
}

impl MembershipRepository for PostgresMembershipRepository {
    async fn find_by_user_and_tenant(
        &self,
        user_id: UserId,
        tenant_id: &str,
    ) -> Result<Option<Membership>, AuthzError> {
        let row = sqlx::query(
            "SELECT membership_id, tenant_id, user_id, role, created_at_unix, updated_at_unix
             FROM memberships
             WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id.to_string())
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }
}

fn membership_from_row(row: &sqlx::postgres::PgRow) -> Result<Membership, AuthzError> {
    let user_id: String = row.try_get("user_id")?;
    let user_id = UserId::try_from(user_id).map_err(AuthzError::repository)?;
    Ok(Membership {
        membership_id: row.try_get("membership_id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id,
        role: row.try_get("role")?,
        created_at_unix: row.try_get("created_at_unix")?,
        updated_at_unix: row.try_get("updated_at_unix")?,
    })
}

#[cfg(test)]
mod tests {
    use warden_core::UserId;

    use super::{InMemoryMembershipStore, MembershipListRepository, MembershipRepository};

    #[tokio::test]
    async fn upsert_keeps_one_membership_per_user_and_tenant() {
        let store = InMemoryMembershipStore::new();
        let user_id = UserId::new();

        let first = store.upsert_membership("t-1", user_id, "member").await;
        let second = store.upsert_membership("t-1", user_id, "admin").await;
        assert_eq!(first.membership_id, second.membership_id);
        assert_eq!(second.role, "admin");

        let all = store.find_by_user_id(user_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, "admin");
    }

    #[tokio::test]
    async fn lookups_are_scoped_to_the_requested_user() {
        let store = InMemoryMembershipStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        store.upsert_membership("t-1", alice, "owner").await;
        store.upsert_membership("t-1", bob, "viewer").await;
        store.upsert_membership("t-2", bob, "member").await;

        let bob_memberships = store.find_by_user_id(bob).await.unwrap();
        assert_eq!(bob_memberships.len(), 2);
        assert!(bob_memberships.iter().all(|m| m.user_id == bob));

        let single = store.find_by_user_and_tenant(alice, "t-1").await.unwrap();
        assert_eq!(single.unwrap().role, "owner");
        assert!(store
            .find_by_user_and_tenant(alice, "t-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_membership_reports_existence() {
        let store = InMemoryMembershipStore::new();
        let user_id = UserId::new();
        store.upsert_membership("t-1", user_id, "member").await;

        assert!(store.remove_membership(user_id, "t-1").await);
        assert!(!store.remove_membership(user_id, "t-1").await);
        assert!(store
            .find_by_user_and_tenant(user_id, "t-1")
            .await
            .unwrap()
            .is_none());
    }
}
