//! Pool and dataset operations issued to the ZFS command-line tools.
//!
//! Argument construction is typed and pure (`to_args`) so destructive command
//! lines can be asserted in tests without executing anything.

use poolstrap_error::HalResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ZpoolOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl ZpoolOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

#[derive(Debug, Clone)]
pub struct ZfsOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl ZfsOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

/// Which pool features a new pool may enable.
///
/// `Restricted` creates the pool with all features disabled (`-d`) and then
/// enables only the listed ones; the boot pool uses this so it never gains a
/// feature the bootloader's pool reader cannot parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeaturePolicy {
    Full,
    Restricted(Vec<String>),
}

/// Typed `zpool create` invocation.
#[derive(Debug, Clone)]
pub struct ZpoolCreateRequest {
    pub name: String,
    pub ashift: u32,
    pub features: FeaturePolicy,
    /// Pool-level properties (`-o`).
    pub pool_props: Vec<(String, String)>,
    /// Filesystem-level properties applied to the root dataset (`-O`).
    pub fs_props: Vec<(String, String)>,
    /// Passphrase-based at-rest encryption with an interactive prompt.
    pub encryption: bool,
    /// Alternate root for install-time mounting (`-R`).
    pub altroot: Option<PathBuf>,
    pub force: bool,
    /// Device-group specification, e.g. `["mirror", "/dev/...-part3", ...]`.
    pub vdev: Vec<String>,
}

impl ZpoolCreateRequest {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.push("-o".to_string());
        args.push(format!("ashift={}", self.ashift));
        if let FeaturePolicy::Restricted(features) = &self.features {
            args.push("-d".to_string());
            for feature in features {
                args.push("-o".to_string());
                args.push(format!("feature@{}=enabled", feature));
            }
        }
        for (key, value) in &self.pool_props {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        if self.encryption {
            for prop in [
                "encryption=aes-256-gcm",
                "keylocation=prompt",
                "keyformat=passphrase",
            ] {
                args.push("-O".to_string());
                args.push(prop.to_string());
            }
        }
        for (key, value) in &self.fs_props {
            args.push("-O".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(altroot) = &self.altroot {
            args.push("-R".to_string());
            args.push(altroot.display().to_string());
        }
        args.push(self.name.clone());
        args.extend(self.vdev.iter().cloned());
        args
    }

    /// Feature names requested for this pool, empty for the full default set.
    pub fn requested_features(&self) -> &[String] {
        match &self.features {
            FeaturePolicy::Full => &[],
            FeaturePolicy::Restricted(features) => features,
        }
    }
}

/// Typed `zfs create` invocation.
#[derive(Debug, Clone)]
pub struct ZfsCreateRequest {
    pub name: String,
    pub props: Vec<(String, String)>,
}

impl ZfsCreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Vec::new(),
        }
    }

    pub fn prop(mut self, key: &str, value: &str) -> Self {
        self.props.push((key.to_string(), value.to_string()));
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        for (key, value) in &self.props {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.name.clone());
        args
    }
}

pub trait ZfsOps {
    fn zpool_create(&self, req: &ZpoolCreateRequest, opts: &ZpoolOptions) -> HalResult<()>;

    fn zpool_export(&self, pool: &str, dry_run: bool) -> HalResult<()>;

    /// Import an exported pool under an alternate root, loading encryption
    /// keys if the pool needs them.
    fn zpool_import(&self, pool: &str, altroot: Option<&Path>, dry_run: bool) -> HalResult<()>;

    /// Names of currently imported pools.
    fn zpool_list_names(&self) -> HalResult<Vec<String>>;

    /// Names of exported pools visible to `zpool import` (not yet imported).
    fn zpool_importable_names(&self) -> HalResult<Vec<String>>;

    fn zpool_get(&self, pool: &str, prop: &str) -> HalResult<String>;

    fn zfs_create(&self, req: &ZfsCreateRequest, opts: &ZfsOptions) -> HalResult<()>;

    /// Explicitly mount a dataset (needed for `canmount=noauto` datasets).
    fn zfs_mount(&self, dataset: &str, dry_run: bool) -> HalResult<()>;

    fn zfs_set(&self, dataset: &str, prop: &str, value: &str, dry_run: bool) -> HalResult<()>;
}
