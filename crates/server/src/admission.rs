//! Pluggable admission control.
//!
//! The server consults an [`AdmissionControl`] before handling each
//! request, keyed by client address. The upload core is independent of
//! the policy behind it; deployments plug in rate limiting or connection
//! caps here without touching the session machinery.

use std::sync::Arc;

/// Admission decision contract.
pub trait AdmissionControl: Send + Sync + 'static {
    /// Whether a request from `key` (typically a client IP) may proceed.
    fn allow(&self, key: &str) -> bool;
}

/// Default policy: admit everything.
pub struct AllowAll;

impl AdmissionControl for AllowAll {
    fn allow(&self, _key: &str) -> bool {
        true
    }
}

/// Shared handle type used by the router.
pub type SharedAdmission = Arc<dyn AdmissionControl>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_admits() {
        let policy = AllowAll;
        assert!(policy.allow("10.0.0.1"));
        assert!(policy.allow(""));
    }
}
