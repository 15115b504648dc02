//! Sandbox Handle - identifies one sandbox and its expiry
//!
//! A handle is plain data. Every workflow step re-resolves it from the
//! sandbox id through its [`SandboxProvider`](super::SandboxProvider), so
//! nothing about a sandbox has to live in memory across step boundaries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a single sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Unique identifier (e.g., "sbx-01926abc...")
    pub sandbox_id: String,
    /// Template the sandbox was created from
    pub template: String,
    /// When this sandbox was created
    pub created_at: DateTime<Utc>,
    /// Absolute deadline after which the sandbox is gone
    pub expires_at: DateTime<Utc>,
}

impl SandboxHandle {
    /// Create a handle that expires `timeout` after now
    pub fn new(sandbox_id: String, template: String, timeout: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            sandbox_id,
            template,
            created_at,
            expires_at: deadline_from(created_at, timeout),
        }
    }

    /// Move the deadline to `timeout` from now
    pub fn extend(&mut self, timeout: Duration) {
        self.expires_at = deadline_from(Utc::now(), timeout);
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

fn deadline_from(start: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    start.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_expiry() {
        let mut handle = SandboxHandle::new("sbx-1".into(), "nextjs".into(), Duration::ZERO);
        assert!(handle.is_expired());
        assert_eq!(handle.remaining(), Duration::ZERO);

        handle.extend(Duration::from_secs(600));
        assert!(!handle.is_expired());
        assert!(handle.remaining() > Duration::from_secs(590));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let handle = SandboxHandle::new("sbx-2".into(), "t".into(), Duration::MAX);
        assert!(!handle.is_expired());
    }
}
