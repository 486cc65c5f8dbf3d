//! Shared configuration snapshot.

use super::{FeatureFlags, FlagOverrides, ResolvedConfig};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Currently published agent configuration.
///
/// Cloning a store yields another handle to the same snapshot. Readers
/// always get a full copy, so fields updated together are observed
/// together.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    current: Arc<RwLock<ResolvedConfig>>,
    flags: Arc<FlagOverrides>,
}

impl ConfigStore {
    /// Create a store holding default settings.
    pub fn new(flags: FlagOverrides) -> Self {
        Self::with_config(flags, ResolvedConfig::default())
    }

    pub fn with_config(flags: FlagOverrides, config: ResolvedConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(config)),
            flags: Arc::new(flags),
        }
    }

    /// Return a copy of the current snapshot.
    pub fn get(&self) -> ResolvedConfig {
        // Snapshots are only ever swapped whole, a poisoned lock still guards a consistent value.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    /// Atomically publish a new snapshot.
    pub fn replace(&self, config: ResolvedConfig) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    /// Process-level overrides this store was created with.
    pub fn flags(&self) -> &FlagOverrides {
        &self.flags
    }

    pub fn features(&self) -> FeatureFlags {
        self.get().features()
    }

    /// Whether OS inventory collection is enabled.
    pub fn os_inventory_enabled(&self) -> bool {
        self.get().os_inventory_enabled
    }

    /// Whether guest policies are enabled.
    pub fn guest_policies_enabled(&self) -> bool {
        self.get().guest_policies_enabled
    }

    /// Whether task notifications are enabled.
    pub fn task_notification_enabled(&self) -> bool {
        self.get().task_notification_enabled
    }

    /// Debug log verbosity, from flags or metadata.
    pub fn debug(&self) -> bool {
        self.flags.debug || self.get().debug_enabled
    }

    pub fn stdout(&self) -> bool {
        self.flags.stdout
    }

    /// Service endpoint.
    pub fn svc_endpoint(&self) -> String {
        self.get().svc_endpoint
    }

    /// How often to poll the service.
    pub fn svc_poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.get().poll_interval_minutes) * 60)
    }

    pub fn googet_repo_file_path(&self) -> String {
        self.get().googet_repo_file_path
    }

    pub fn zypper_repo_file_path(&self) -> String {
        self.get().zypper_repo_file_path
    }

    pub fn yum_repo_file_path(&self) -> String {
        self.get().yum_repo_file_path
    }

    pub fn apt_repo_file_path(&self) -> String {
        self.get().apt_repo_file_path
    }

    pub fn numeric_project_id(&self) -> i64 {
        self.get().numeric_project_id
    }

    pub fn project_id(&self) -> String {
        self.get().project_id
    }

    /// Zone the instance is running in.
    pub fn zone(&self) -> String {
        self.get().instance_zone
    }

    pub fn instance_name(&self) -> String {
        self.get().instance_name
    }

    pub fn instance_id(&self) -> String {
        self.get().instance_id
    }

    /// URI of the instance the agent is running on.
    ///
    /// The zone already carries the `projects/<id>/zones/` prefix.
    pub fn instance_uri(&self) -> String {
        let cfg = self.get();
        format!("{}/instances/{}", cfg.instance_zone, cfg.instance_name)
    }
}
