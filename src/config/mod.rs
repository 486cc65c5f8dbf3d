//! Agent configuration resolution.
//!
//! This module contains four logical entities:
//!  * Metadata: the raw metadata document, as fetched from the metadata server.
//!  * Merge: precedence rules folding metadata and flags into a resolved configuration.
//!  * ResolvedConfig: the effective agent settings at a point in time.
//!  * ConfigStore: the currently published `ResolvedConfig`, shared by all agent components.

mod merge;
mod metadata;
mod paths;
mod store;

pub use crate::config::merge::resolve;
pub use crate::config::metadata::{Attributes, InstanceNode, ProjectNode, RawMetadataDocument};
pub use crate::config::paths::{
    agent_version, restart_file, serial_log_port, task_state_file, OsFamily,
};
pub use crate::config::store::ConfigStore;

/// Production service endpoint.
pub const DEFAULT_ENDPOINT: &str = "osconfig.googleapis.com:443";

/// Default service poll interval, in minutes.
pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 10;

pub(crate) const GOOGET_REPO_FILE_PATH: &str =
    "C:/ProgramData/GooGet/repos/google_osconfig_managed.repo";
pub(crate) const ZYPPER_REPO_FILE_PATH: &str = "/etc/zypp/repos.d/google_osconfig_managed.repo";
pub(crate) const YUM_REPO_FILE_PATH: &str = "/etc/yum.repos.d/google_osconfig_managed.repo";
pub(crate) const APT_REPO_FILE_PATH: &str = "/etc/apt/sources.list.d/google_osconfig_managed.list";

/// Effective agent configuration.
///
/// It is never mutated once published: a refresh builds a whole new
/// value which replaces the previous one in the `ConfigStore`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub os_inventory_enabled: bool,
    pub guest_policies_enabled: bool,
    pub task_notification_enabled: bool,
    pub debug_enabled: bool,

    /// Service endpoint, as `host:port`.
    pub svc_endpoint: String,
    /// Service poll interval, in minutes (always > 0).
    pub poll_interval_minutes: u32,

    pub googet_repo_file_path: String,
    pub zypper_repo_file_path: String,
    pub yum_repo_file_path: String,
    pub apt_repo_file_path: String,

    pub numeric_project_id: i64,
    pub project_id: String,
    /// Instance zone, including its `projects/<id>/zones/` prefix.
    pub instance_zone: String,
    pub instance_name: String,
    pub instance_id: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            os_inventory_enabled: false,
            guest_policies_enabled: false,
            task_notification_enabled: false,
            debug_enabled: false,
            svc_endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            googet_repo_file_path: GOOGET_REPO_FILE_PATH.to_string(),
            zypper_repo_file_path: ZYPPER_REPO_FILE_PATH.to_string(),
            yum_repo_file_path: YUM_REPO_FILE_PATH.to_string(),
            apt_repo_file_path: APT_REPO_FILE_PATH.to_string(),
            numeric_project_id: 0,
            project_id: String::new(),
            instance_zone: String::new(),
            instance_name: String::new(),
            instance_id: String::new(),
        }
    }
}

impl ResolvedConfig {
    /// Feature flags, as a single group.
    pub fn features(&self) -> FeatureFlags {
        FeatureFlags {
            os_inventory: self.os_inventory_enabled,
            guest_policies: self.guest_policies_enabled,
            task_notification: self.task_notification_enabled,
        }
    }

    pub(crate) fn set_features(&mut self, features: FeatureFlags) {
        self.os_inventory_enabled = features.os_inventory;
        self.guest_policies_enabled = features.guest_policies;
        self.task_notification_enabled = features.task_notification;
    }
}

/// Agent features toggled by metadata, always resolved together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub os_inventory: bool,
    pub guest_policies: bool,
    pub task_notification: bool,
}

impl FeatureFlags {
    /// All features set to the same state.
    pub fn all(enabled: bool) -> Self {
        Self {
            os_inventory: enabled,
            guest_policies: enabled,
            task_notification: enabled,
        }
    }
}

/// Process-level overrides, fixed at startup.
///
/// These take precedence over any metadata-supplied value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlagOverrides {
    /// Service endpoint override; only effective when different from `DEFAULT_ENDPOINT`.
    pub endpoint: String,
    /// Force debug verbosity.
    pub debug: bool,
    /// Log to standard output.
    pub stdout: bool,
}

impl Default for FlagOverrides {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            debug: false,
            stdout: false,
        }
    }
}

impl FlagOverrides {
    /// Return the endpoint override, if one was explicitly requested.
    pub(crate) fn endpoint_override(&self) -> Option<&str> {
        if self.endpoint.is_empty() || self.endpoint == DEFAULT_ENDPOINT {
            None
        } else {
            Some(&self.endpoint)
        }
    }
}
