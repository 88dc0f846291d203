//! Failure/interrupt cleanup.
//!
//! Whatever happens — fatal error, operator abort, or a normal finish — the
//! install-time root gets unmounted and every pool this run created gets
//! exported, exactly once. A pool left imported by a dead installer blocks
//! both reboots and re-runs.

use poolstrap_hal::InstallerHal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct Cleaner {
    hal: Arc<dyn InstallerHal>,
    target: PathBuf,
    pools: Mutex<Vec<String>>,
    ran: AtomicBool,
    dry_run: bool,
}

impl Cleaner {
    pub fn new(hal: Arc<dyn InstallerHal>, target: PathBuf, dry_run: bool) -> Self {
        Self {
            hal,
            target,
            pools: Mutex::new(Vec::new()),
            ran: AtomicBool::new(false),
            dry_run,
        }
    }

    /// Register a pool created (or imported) by this run. Only registered
    /// pools are exported on cleanup.
    pub fn register_pool(&self, name: &str) {
        let mut pools = self.pools.lock().unwrap();
        if !pools.iter().any(|p| p == name) {
            pools.push(name.to_string());
        }
    }

    pub fn registered_pools(&self) -> Vec<String> {
        self.pools.lock().unwrap().clone()
    }

    /// Unmount everything under the target, export registered pools in
    /// reverse creation order, and drop transient working state. Idempotent:
    /// a second invocation (double interrupt) does nothing.
    pub fn run(&self) {
        if self.ran.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("🧹 Cleaning up: unmounting {}", self.target.display());
        if let Err(err) = self.hal.unmount_recursive(&self.target, self.dry_run) {
            log::warn!("Unmount of {} failed: {}", self.target.display(), err);
        }

        let pools = self.pools.lock().unwrap().clone();
        for pool in pools.iter().rev() {
            log::info!("🧹 Exporting pool '{}'", pool);
            if let Err(err) = self.hal.zpool_export(pool, self.dry_run) {
                log::warn!("Export of pool '{}' failed: {}", pool, err);
            }
        }

        // The mountpoint directory is the run's only transient working state.
        // Non-recursive: it only goes away once everything under it is
        // actually unmounted and the directory is empty.
        if !self.dry_run {
            let _ = std::fs::remove_dir(&self.target);
        }

        let _ = self.hal.sync();
    }
}
