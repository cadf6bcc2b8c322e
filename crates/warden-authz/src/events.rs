use warden_core::Role;
use warden_protocol::RevocationNotice;

pub(crate) const NOTICE_KIND_REVOKED: &str = "revoked";
pub(crate) const NOTICE_KIND_DOWNGRADED: &str = "downgraded";

/// Notice for a membership that was removed outright.
#[must_use]
pub fn membership_revoked(tenant_id: &str) -> RevocationNotice {
    RevocationNotice::FullyRevoked {
        tenant_id: tenant_id.to_owned(),
        reason: format!("membership removed from workspace {tenant_id}"),
    }
}

/// Notice for a role that was lowered. The reason names both roles so the
/// client (and anyone reading logs) can tell what changed.
#[must_use]
pub fn role_downgraded(tenant_id: &str, old_role: Role, new_role: Role) -> RevocationNotice {
    RevocationNotice::Downgraded {
        tenant_id: tenant_id.to_owned(),
        reason: format!("role changed from {old_role} to {new_role}"),
        new_role,
    }
}

pub(crate) const fn notice_kind(notice: &RevocationNotice) -> &'static str {
    match notice {
        RevocationNotice::FullyRevoked { .. } => NOTICE_KIND_REVOKED,
        RevocationNotice::Downgraded { .. } => NOTICE_KIND_DOWNGRADED,
    }
}
