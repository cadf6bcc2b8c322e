use futures_util::future::join_all;
use warden_core::UserId;

use crate::{
    errors::AuthzError,
    metrics::record_filter_denied,
    repository::MembershipRepository,
};

/// Minimal shape a record must expose to be filtered: an id, the tenant
/// that owns it, and the user that owns it.
pub trait TenantScoped {
    fn record_id(&self) -> &str;
    fn tenant_id(&self) -> &str;
    fn owner_id(&self) -> &str;
}

/// Records the user may read, in their original order, plus how many were
/// withheld. Which records were denied is deliberately not reported.
#[derive(Debug)]
pub struct FilterOutcome<T> {
    pub allowed: Vec<T>,
    pub denied_count: usize,
}

/// Single-membership existence check, used as a cheap pre-filter before
/// evaluating a whole batch.
///
/// # Errors
/// Repository failures propagate unchanged.
pub async fn can_access_tenant<R: MembershipRepository>(
    user_id: UserId,
    tenant_id: &str,
    repo: &R,
) -> Result<bool, AuthzError> {
    Ok(repo
        .find_by_user_and_tenant(user_id, tenant_id)
        .await?
        .is_some())
}

/// Evaluates every record's read permission concurrently against a fresh
/// repository read (the cache is deliberately not consulted: this runs on
/// server-initiated fan-out where staleness is worse than the extra I/O).
/// A record is readable iff it belongs to the requested tenant and the
/// user holds any membership there; records from other tenants are denied
/// without a repository call.
///
/// # Errors
/// Repository failures propagate unchanged.
pub async fn filter_records_for_user<T, R>(
    user_id: UserId,
    tenant_id: &str,
    records: Vec<T>,
    repo: &R,
) -> Result<FilterOutcome<T>, AuthzError>
where
    T: TenantScoped,
    R: MembershipRepository,
{
    if records.is_empty() {
        return Ok(FilterOutcome {
            allowed: Vec::new(),
            denied_count: 0,
        });
    }

    let checks = records.iter().map(|record| async move {
        if record.tenant_id() != tenant_id {
            record_filter_denied("cross_tenant");
            return Ok(false);
        }
        let membership = repo.find_by_user_and_tenant(user_id, tenant_id).await?;
        if membership.is_none() {
            record_filter_denied("no_membership");
        }
        Ok::<bool, AuthzError>(membership.is_some())
    });
    let verdicts = join_all(checks).await;

    let mut allowed = Vec::with_capacity(records.len());
    let mut denied_count = 0;
    for (record, verdict) in records.into_iter().zip(verdicts) {
        if verdict? {
            allowed.push(record);
        } else {
            denied_count += 1;
        }
    }
    tracing::debug!(
        event = "authz.filter.evaluated",
        tenant_id,
        allowed = allowed.len(),
        denied = denied_count
    );
    Ok(FilterOutcome {
        allowed,
        denied_count,
    })
}
