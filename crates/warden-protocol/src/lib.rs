#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use warden_core::Role;

/// Event type identifier for the revocation push.
pub const PERMISSION_REVOKED_EVENT: &str = "permission_revoked";
/// Maximum allowed notice payload bytes at the parse boundary.
pub const MAX_NOTICE_BYTES: usize = 16 * 1024;

/// Server-to-client push telling a connection that its access to a tenant
/// changed while the connection was open. A full revocation omits
/// `newRole`; a downgrade carries the role the client now holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationNotice {
    FullyRevoked {
        tenant_id: String,
        reason: String,
    },
    Downgraded {
        tenant_id: String,
        reason: String,
        new_role: Role,
    },
}

impl RevocationNotice {
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::FullyRevoked { tenant_id, .. } | Self::Downgraded { tenant_id, .. } => tenant_id,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::FullyRevoked { reason, .. } | Self::Downgraded { reason, .. } => reason,
        }
    }

    #[must_use]
    pub const fn new_role(&self) -> Option<Role> {
        match self {
            Self::FullyRevoked { .. } => None,
            Self::Downgraded { new_role, .. } => Some(*new_role),
        }
    }

    /// Serializes the notice to its wire payload.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidJson`] if serialization fails.
    pub fn to_payload(&self) -> Result<String, ProtocolError> {
        let wire = match self {
            Self::FullyRevoked { tenant_id, reason } => WireNotice {
                event_type: PERMISSION_REVOKED_EVENT.to_owned(),
                tenant_id: tenant_id.clone(),
                reason: reason.clone(),
                new_role: None,
            },
            Self::Downgraded {
                tenant_id,
                reason,
                new_role,
            } => WireNotice {
                event_type: PERMISSION_REVOKED_EVENT.to_owned(),
                tenant_id: tenant_id.clone(),
                reason: reason.clone(),
                new_role: Some(*new_role),
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

/// Wire shape of the notice: `{ type, tenantId, reason, newRole? }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireNotice {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "tenantId")]
    tenant_id: String,
    reason: String,
    #[serde(rename = "newRole", default, skip_serializing_if = "Option::is_none")]
    new_role: Option<Role>,
}

/// Parse and validate an incoming notice at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds limits, is malformed
/// JSON, or carries an event type other than `permission_revoked`.
pub fn parse_notice(input: &[u8]) -> Result<RevocationNotice, ProtocolError> {
    if input.len() > MAX_NOTICE_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_NOTICE_BYTES,
            actual: input.len(),
        });
    }

    let wire: WireNotice = serde_json::from_slice(input)?;
    if wire.event_type != PERMISSION_REVOKED_EVENT {
        return Err(ProtocolError::UnknownEventType(wire.event_type));
    }

    Ok(match wire.new_role {
        Some(new_role) => RevocationNotice::Downgraded {
            tenant_id: wire.tenant_id,
            reason: wire.reason,
            new_role,
        },
        None => RevocationNotice::FullyRevoked {
            tenant_id: wire.tenant_id,
            reason: wire.reason,
        },
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
    #[error("invalid json payload")]
    InvalidJson,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
