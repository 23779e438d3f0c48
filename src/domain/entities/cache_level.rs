//! Cache level policy.

use serde::{Deserialize, Serialize};

/// Restricts which tiers a resolution may consult.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    /// Memory, disk and network are all eligible.
    #[default]
    Full,
    /// Only the memory tier is consulted.
    #[serde(alias = "memory_only")]
    #[value(alias = "memory-only")]
    Memory,
    /// Memory and disk are consulted; the network never is.
    #[serde(alias = "disk_only")]
    #[value(alias = "disk-only")]
    Disk,
}

impl CacheLevel {
    /// Returns true if the disk tier may be consulted.
    #[must_use]
    pub const fn allows_disk(self) -> bool {
        matches!(self, Self::Full | Self::Disk)
    }

    /// Returns true if the network tier may be consulted.
    #[must_use]
    pub const fn allows_network(self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
        }
    }
}

/// A cache tier below memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The on-disk store.
    Disk,
    /// The network fetcher.
    Network,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}
