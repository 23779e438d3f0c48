//! Tier fall-through rules.
//!
//! A resolution always starts in memory. Which lower tier it may move to on
//! a miss depends on the configured [`CacheLevel`] and on whether the disk
//! tier could be opened when the loader was built.

use crate::domain::entities::{CacheLevel, Tier};
use crate::domain::errors::ResolveError;

/// Decides which tier a resolution moves to after each miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePolicy {
    level: CacheLevel,
    disk_enabled: bool,
}

impl CascadePolicy {
    /// Creates the policy for `level`. `disk_enabled` records whether the
    /// disk store was opened.
    #[must_use]
    pub const fn new(level: CacheLevel, disk_enabled: bool) -> Self {
        Self {
            level,
            disk_enabled,
        }
    }

    /// Configured cache level.
    #[must_use]
    pub const fn level(&self) -> CacheLevel {
        self.level
    }

    /// Returns true if the disk tier is available.
    #[must_use]
    pub const fn disk_enabled(&self) -> bool {
        self.disk_enabled
    }

    /// Next tier after a memory miss.
    ///
    /// # Errors
    /// `PolicyDenied` under `Memory`; `DiskUnavailable` under `Disk` when the
    /// disk tier was never opened.
    pub const fn after_memory_miss(&self) -> Result<Tier, ResolveError> {
        match (self.level, self.disk_enabled) {
            (CacheLevel::Memory, _) => Err(ResolveError::policy_denied(self.level, Tier::Disk)),
            (CacheLevel::Disk, false) => Err(ResolveError::DiskUnavailable),
            (CacheLevel::Full, false) => Ok(Tier::Network),
            (CacheLevel::Full | CacheLevel::Disk, true) => Ok(Tier::Disk),
        }
    }

    /// Next tier after a disk miss.
    ///
    /// # Errors
    /// `PolicyDenied` unless the level is `Full`.
    pub const fn after_disk_miss(&self) -> Result<Tier, ResolveError> {
        if self.level.allows_network() {
            Ok(Tier::Network)
        } else {
            Err(ResolveError::policy_denied(self.level, Tier::Network))
        }
    }

    /// Whether fetched bytes go through the disk store before decoding.
    #[must_use]
    pub const fn persists_fetched(&self) -> bool {
        self.disk_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use test_case::test_case;

    #[test_case(CacheLevel::Full, true, Ok(Tier::Disk) ; "full_with_disk")]
    #[test_case(CacheLevel::Full, false, Ok(Tier::Network) ; "full_without_disk")]
    #[test_case(CacheLevel::Disk, true, Ok(Tier::Disk) ; "disk_with_disk")]
    #[test_case(CacheLevel::Disk, false, Err(ErrorKind::DiskUnavailable) ; "disk_without_disk")]
    #[test_case(CacheLevel::Memory, true, Err(ErrorKind::PolicyDenied) ; "memory_with_disk")]
    #[test_case(CacheLevel::Memory, false, Err(ErrorKind::PolicyDenied) ; "memory_without_disk")]
    fn test_after_memory_miss(level: CacheLevel, disk: bool, expected: Result<Tier, ErrorKind>) {
        let policy = CascadePolicy::new(level, disk);
        assert_eq!(
            policy.after_memory_miss().map_err(|e| e.kind()),
            expected
        );
    }

    #[test]
    fn test_accessors_report_construction() {
        let policy = CascadePolicy::new(CacheLevel::Disk, false);
        assert_eq!(policy.level(), CacheLevel::Disk);
        assert!(!policy.disk_enabled());
        assert!(!policy.persists_fetched());
        assert!(CascadePolicy::new(CacheLevel::Full, true).disk_enabled());
    }

    #[test]
    fn test_after_disk_miss() {
        assert_eq!(
            CascadePolicy::new(CacheLevel::Full, true)
                .after_disk_miss()
                .ok(),
            Some(Tier::Network)
        );
        let err = CascadePolicy::new(CacheLevel::Disk, true)
            .after_disk_miss()
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::PolicyDenied {
                level: CacheLevel::Disk,
                tier: Tier::Network
            }
        ));
    }
}
