//! Retention tiers for backup artifacts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Retention class of a backup artifact.
///
/// Each tier has its own directory in the snapshot store and its own
/// retention count in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Scheduled daily backup.
    Daily,
    /// Scheduled weekly backup.
    Weekly,
    /// Scheduled monthly backup.
    Monthly,
    /// Ad hoc backup taken during an incident, never pruned by default.
    Emergency,
    /// Safety snapshot taken right before a destructive restore.
    PreRollback,
    /// Safety snapshot of a sync target taken before it is overwritten.
    PreSync,
}

impl Tier {
    /// Every tier, in display order.
    pub const ALL: [Self; 6] = [
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Emergency,
        Self::PreRollback,
        Self::PreSync,
    ];

    /// Tiers produced by the regular schedule. Emergency restores pick
    /// their source from these.
    pub const SCHEDULED: [Self; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Returns the tier name as used in file names and on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Emergency => "emergency",
            Self::PreRollback => "pre-rollback",
            Self::PreSync => "pre-sync",
        }
    }

    /// Returns the snapshot store directory holding this tier.
    #[must_use]
    pub const fn directory(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Emergency => "emergency",
            Self::PreRollback => "rollback",
            Self::PreSync => "sync",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| format!("unknown backup tier `{s}`"))
    }
}
