#![forbid(unsafe_code)]

mod cache;
mod core;
mod errors;
mod events;
mod filter;
mod metrics;
mod propagation;
mod registry;
mod repository;

pub use cache::PermissionCache;
pub use errors::{init_tracing, AuthzError};
pub use events::{membership_revoked, role_downgraded};
pub use filter::{can_access_tenant, filter_records_for_user, FilterOutcome, TenantScoped};
pub use metrics::render_metrics;
pub use propagation::{PermissionPropagation, PropagationResult};
pub use registry::{
    subscription_key, ConnectionHandle, ConnectionRegistry, InMemoryConnectionRegistry,
    InMemorySubscriptionRegistry, NotifyError, SubscriptionRegistry,
};
pub use repository::{
    InMemoryMembershipStore, Membership, MembershipListRepository, MembershipRepository,
    PostgresMembershipRepository,
};
pub use self::core::{
    AuthzConfig, ConnectionControl, ConnectionPermissions, DEFAULT_OUTBOUND_QUEUE,
    DEFAULT_PERMISSION_TTL_SECS,
};
