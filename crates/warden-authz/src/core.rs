use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use warden_core::UserId;

use crate::repository::Membership;

pub const DEFAULT_PERMISSION_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) revocation_notices_emitted: Mutex<HashMap<&'static str, u64>>,
    pub(crate) revocation_notices_dropped: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) cache_refreshes: Mutex<HashMap<&'static str, u64>>,
    pub(crate) filter_denials: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct AuthzConfig {
    /// How long a loaded permission snapshot stays fresh. Sub-second
    /// values are valid; expiry is checked against a monotonic clock.
    pub permission_ttl: Duration,
    /// Capacity hosts should give each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            permission_ttl: Duration::from_secs(DEFAULT_PERMISSION_TTL_SECS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// Close signal for a live connection, observed by the host's send loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionControl {
    Open,
    Close,
}

/// Authorization snapshot held for one live connection. Replaced wholesale
/// on every reload; never partially mutated.
#[derive(Debug, Clone)]
pub struct ConnectionPermissions {
    pub user_id: UserId,
    pub memberships: HashMap<String, Membership>,
    pub loaded_at: Instant,
}

pub(crate) fn now_unix() -> i64 {
    let now = SystemTime::now();
    let seconds = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
