use std::{cmp::Ordering, fmt::Display};
use versions::Versioning;

/// Represents the status the local client version can have compared to the
/// latest release reported by OptHub
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum VersionStatus {
    /// Client is outdated
    OutOfDate,
    /// Client is up-to-date
    UpToDate,
    /// Client is newer than the advertised release
    Overdated,
}

impl Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            VersionStatus::OutOfDate => "Client is outdated, please upgrade",
            VersionStatus::UpToDate => "Client is up to date",
            VersionStatus::Overdated => "Client is newer than the latest release",
        };
        write!(f, "{}", status)
    }
}

impl VersionStatus {
    /// Compares the local and remote versions
    /// ```
    /// use opthub_core::version_status::VersionStatus;
    ///
    /// assert_eq!(VersionStatus::new("0.4.0","0.4.0"), VersionStatus::UpToDate);
    ///
    /// assert_eq!(VersionStatus::new("0.3.9","0.4.0"), VersionStatus::OutOfDate);
    ///
    /// assert_eq!(VersionStatus::new("0.5.0-rc1","0.4.0"), VersionStatus::Overdated);
    /// ```
    pub fn new(local: &'_ str, remote: &'_ str) -> VersionStatus {
        let local = Versioning::new(local).unwrap_or_default();
        let remote = Versioning::new(remote).unwrap_or_default();

        match local.cmp(&remote) {
            Ordering::Less => VersionStatus::OutOfDate,
            Ordering::Equal => VersionStatus::UpToDate,
            Ordering::Greater => VersionStatus::Overdated,
        }
    }

    pub fn needs_upgrade(&self) -> bool {
        matches!(self, VersionStatus::OutOfDate)
    }
}
