//! Fake HAL implementation for testing.
//!
//! Records all operations without executing them, and models just enough
//! world state (imported pools, partition nodes, mounted paths) for the
//! install workflows to run end to end in CI without root privileges or
//! real hardware. Failures can be scripted per disk, pool, or bootloader id.

use super::{
    BootloaderOps, EspFormatOptions, FormatOps, FsOps, GrubOptions, HostInfoOps, MountOps,
    MountOptions, PartitionOps, ProbeOps, ProcessOps, SgdiskOp, SgdiskOptions, SystemOps,
    WipeFsOptions, ZfsCreateRequest, ZfsOps, ZfsOptions, ZpoolCreateRequest, ZpoolOptions,
};
use crate::hal::format_ops::SwapFormatOptions;
use poolstrap_error::{HalError, HalResult};
use std::collections::{BTreeSet, HashMap, HashSet};
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone)]
pub enum Operation {
    WipeFsAll {
        disk: PathBuf,
    },
    Sgdisk {
        disk: PathBuf,
        op: SgdiskOp,
    },
    FormatEsp {
        device: PathBuf,
        label: String,
        sectors_per_cluster: u8,
    },
    FormatSwap {
        device: PathBuf,
        label: String,
    },
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    ZpoolCreate {
        name: String,
        args: Vec<String>,
        encrypted: bool,
        features: Vec<String>,
    },
    ZpoolExport {
        pool: String,
    },
    ZpoolImport {
        pool: String,
    },
    ZfsCreate {
        name: String,
        props: Vec<(String, String)>,
    },
    ZfsMount {
        dataset: String,
    },
    ZfsSet {
        dataset: String,
        prop: String,
        value: String,
    },
    GrubInstall {
        efi_dir: PathBuf,
        bootloader_id: String,
    },
    Command {
        program: String,
        args: Vec<String>,
    },
    CreateDirAll {
        path: PathBuf,
    },
    SetPermissions {
        path: PathBuf,
        mode: u32,
    },
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
    },
    CopyFile {
        src: PathBuf,
        dst: PathBuf,
    },
    AppendLine {
        path: PathBuf,
        line: String,
    },
    WriteFile {
        path: PathBuf,
    },
    Sync,
    UdevSettle,
    Partprobe {
        disk: PathBuf,
    },
}

#[derive(Debug, Clone)]
struct FakeHalState {
    operations: Vec<Operation>,
    mounted_paths: HashSet<PathBuf>,
    imported_pools: BTreeSet<String>,
    importable_pools: BTreeSet<String>,
    existing_paths: HashSet<PathBuf>,
    signatures: HashMap<PathBuf, String>,
    fail_sgdisk_disks: HashSet<PathBuf>,
    fail_pool_creates: HashSet<String>,
    fail_grub_ids: HashSet<String>,
    suppress_partition_nodes: bool,
    meminfo: String,
    mountinfo: String,
    efi_firmware: bool,
}

impl Default for FakeHalState {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            mounted_paths: HashSet::new(),
            imported_pools: BTreeSet::new(),
            importable_pools: BTreeSet::new(),
            existing_paths: HashSet::new(),
            signatures: HashMap::new(),
            fail_sgdisk_disks: HashSet::new(),
            fail_pool_creates: HashSet::new(),
            fail_grub_ids: HashSet::new(),
            suppress_partition_nodes: false,
            meminfo: "MemTotal: 16384000 kB\nMemAvailable: 8000000 kB\n".to_string(),
            mountinfo: String::new(),
            efi_firmware: true,
        }
    }
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| check(op))
            .count()
    }

    pub fn clear_operations(&self) {
        self.state.lock().unwrap().operations.clear();
    }

    /// Names of pools currently modeled as imported.
    pub fn imported_pools(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .imported_pools
            .iter()
            .cloned()
            .collect()
    }

    pub fn add_imported_pool(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .imported_pools
            .insert(name.to_string());
    }

    pub fn add_importable_pool(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .importable_pools
            .insert(name.to_string());
    }

    pub fn register_path(&self, path: &Path) {
        self.state
            .lock()
            .unwrap()
            .existing_paths
            .insert(path.to_path_buf());
    }

    pub fn set_signature(&self, device: &Path, signature: &str) {
        self.state
            .lock()
            .unwrap()
            .signatures
            .insert(device.to_path_buf(), signature.to_string());
    }

    /// Script every sgdisk operation on `disk` to fail.
    pub fn fail_sgdisk_on(&self, disk: &Path) {
        self.state
            .lock()
            .unwrap()
            .fail_sgdisk_disks
            .insert(disk.to_path_buf());
    }

    pub fn fail_zpool_create(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_pool_creates
            .insert(name.to_string());
    }

    pub fn fail_grub_id(&self, bootloader_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_grub_ids
            .insert(bootloader_id.to_string());
    }

    /// Simulate a kernel that never exposes new partition nodes.
    pub fn suppress_partition_nodes(&self) {
        self.state.lock().unwrap().suppress_partition_nodes = true;
    }

    pub fn set_meminfo(&self, content: &str) {
        self.state.lock().unwrap().meminfo = content.to_string();
    }

    pub fn set_mountinfo(&self, content: &str) {
        self.state.lock().unwrap().mountinfo = content.to_string();
    }

    pub fn set_efi_firmware(&self, present: bool) {
        self.state.lock().unwrap().efi_firmware = present;
    }

    fn record(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn command_failed(program: &str, stderr: &str) -> HalError {
        HalError::CommandFailed {
            program: program.to_string(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }
}

impl ProcessOps for FakeHal {
    fn command_output_with_cwd(
        &self,
        program: &str,
        args: &[&str],
        _cwd: Option<&Path>,
        _timeout: Duration,
    ) -> HalResult<Output> {
        self.record(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        });
        #[cfg(unix)]
        let status = std::process::ExitStatus::from_raw(0);
        #[cfg(not(unix))]
        let status = std::process::Command::new("true").status().unwrap();

        Ok(Output {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn command_status_with_cwd(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> HalResult<()> {
        let _ = self.command_output_with_cwd(program, args, cwd, timeout)?;
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        self.record(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });
        self.state
            .lock()
            .unwrap()
            .mounted_paths
            .insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        self.record(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.state.lock().unwrap().mounted_paths.remove(target);
        Ok(())
    }

    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount -R {}", target.display());
            return Ok(());
        }

        self.record(Operation::Unmount {
            target: target.to_path_buf(),
        });
        let mut state = self.state.lock().unwrap();
        state
            .mounted_paths
            .retain(|mp| !(mp == target || mp.starts_with(target)));
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state.lock().unwrap().mounted_paths.contains(path))
    }
}

impl PartitionOps for FakeHal {
    fn wipefs_all(&self, disk: &Path, opts: &WipeFsOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }
        self.record(Operation::WipeFsAll {
            disk: disk.to_path_buf(),
        });
        Ok(())
    }

    fn sgdisk(&self, disk: &Path, op: SgdiskOp, opts: &SgdiskOptions) -> HalResult<String> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(String::new());
        }

        if self
            .state
            .lock()
            .unwrap()
            .fail_sgdisk_disks
            .contains(disk)
        {
            return Err(Self::command_failed(
                "sgdisk",
                &format!("Problem opening {} for writing!", disk.display()),
            ));
        }

        // Model the kernel exposing a node for each new partition so the
        // post-partition wait succeeds.
        if let SgdiskOp::New { number, .. } = &op {
            let mut state = self.state.lock().unwrap();
            if !state.suppress_partition_nodes {
                let node = PathBuf::from(format!("{}-part{}", disk.display(), number));
                state.existing_paths.insert(node);
            }
        }

        self.record(Operation::Sgdisk {
            disk: disk.to_path_buf(),
            op,
        });
        Ok(String::new())
    }
}

impl FormatOps for FakeHal {
    fn format_esp(&self, device: &Path, label: &str, opts: &EspFormatOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }
        self.record(Operation::FormatEsp {
            device: device.to_path_buf(),
            label: label.to_string(),
            sectors_per_cluster: opts.sectors_per_cluster,
        });
        Ok(())
    }

    fn format_swap(&self, device: &Path, label: &str, opts: &SwapFormatOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }
        self.record(Operation::FormatSwap {
            device: device.to_path_buf(),
            label: label.to_string(),
        });
        Ok(())
    }
}

impl ZfsOps for FakeHal {
    fn zpool_create(&self, req: &ZpoolCreateRequest, opts: &ZpoolOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }

        {
            let state = self.state.lock().unwrap();
            if state.fail_pool_creates.contains(&req.name) {
                return Err(Self::command_failed(
                    "zpool",
                    &format!("cannot create '{}': one or more vdevs is unavailable", req.name),
                ));
            }
            if state.imported_pools.contains(&req.name) {
                return Err(Self::command_failed(
                    "zpool",
                    &format!("cannot create '{}': pool already exists", req.name),
                ));
            }
        }

        self.record(Operation::ZpoolCreate {
            name: req.name.clone(),
            args: req.to_args(),
            encrypted: req.encryption,
            features: req.requested_features().to_vec(),
        });
        self.state
            .lock()
            .unwrap()
            .imported_pools
            .insert(req.name.clone());
        Ok(())
    }

    fn zpool_export(&self, pool: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::ZpoolExport {
            pool: pool.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if state.imported_pools.remove(pool) {
            state.importable_pools.insert(pool.to_string());
        }
        Ok(())
    }

    fn zpool_import(&self, pool: &str, _altroot: Option<&Path>, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if !state.importable_pools.remove(pool) {
            return Err(Self::command_failed(
                "zpool",
                &format!("cannot import '{}': no such pool available", pool),
            ));
        }
        state.imported_pools.insert(pool.to_string());
        state.operations.push(Operation::ZpoolImport {
            pool: pool.to_string(),
        });
        Ok(())
    }

    fn zpool_list_names(&self) -> HalResult<Vec<String>> {
        Ok(self.imported_pools())
    }

    fn zpool_importable_names(&self) -> HalResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .importable_pools
            .iter()
            .cloned()
            .collect())
    }

    fn zpool_get(&self, pool: &str, prop: &str) -> HalResult<String> {
        if !self.state.lock().unwrap().imported_pools.contains(pool) {
            return Err(Self::command_failed(
                "zpool",
                &format!("cannot open '{}': no such pool", pool),
            ));
        }
        Ok(match prop {
            "health" => "ONLINE".to_string(),
            _ => "-".to_string(),
        })
    }

    fn zfs_create(&self, req: &ZfsCreateRequest, opts: &ZfsOptions) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }

        let pool = req.name.split('/').next().unwrap_or_default().to_string();
        if !self.state.lock().unwrap().imported_pools.contains(&pool) {
            return Err(Self::command_failed(
                "zfs",
                &format!("cannot create '{}': no such pool '{}'", req.name, pool),
            ));
        }

        self.record(Operation::ZfsCreate {
            name: req.name.clone(),
            props: req.props.clone(),
        });
        Ok(())
    }

    fn zfs_mount(&self, dataset: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::ZfsMount {
            dataset: dataset.to_string(),
        });
        Ok(())
    }

    fn zfs_set(&self, dataset: &str, prop: &str, value: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::ZfsSet {
            dataset: dataset.to_string(),
            prop: prop.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}

impl ProbeOps for FakeHal {
    fn blkid_uuid(&self, _device: &Path) -> HalResult<String> {
        Ok("FAKE-UUID".to_string())
    }

    fn probe_signature(&self, device: &Path) -> HalResult<Option<String>> {
        Ok(self.state.lock().unwrap().signatures.get(device).cloned())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().existing_paths.contains(path)
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record(Operation::Sync);
        Ok(())
    }

    fn udev_settle(&self) -> HalResult<()> {
        self.record(Operation::UdevSettle);
        Ok(())
    }

    fn partprobe(&self, disk: &Path) -> HalResult<()> {
        self.record(Operation::Partprobe {
            disk: disk.to_path_buf(),
        });
        Ok(())
    }
}

impl FsOps for FakeHal {
    fn create_dir_all(&self, path: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::CreateDirAll {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn set_permissions(&self, path: &Path, mode: u32, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::SetPermissions {
            path: path.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::Chown {
            path: path.to_path_buf(),
            uid,
            gid,
        });
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::CopyFile {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        });
        Ok(())
    }

    fn append_line(&self, path: &Path, line: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::AppendLine {
            path: path.to_path_buf(),
            line: line.to_string(),
        });
        Ok(())
    }

    fn write_file(&self, path: &Path, _content: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            return Ok(());
        }
        self.record(Operation::WriteFile {
            path: path.to_path_buf(),
        });
        Ok(())
    }
}

impl HostInfoOps for FakeHal {
    fn proc_meminfo(&self) -> HalResult<String> {
        Ok(self.state.lock().unwrap().meminfo.clone())
    }

    fn proc_mountinfo(&self) -> HalResult<String> {
        Ok(self.state.lock().unwrap().mountinfo.clone())
    }

    fn efi_firmware_present(&self) -> bool {
        self.state.lock().unwrap().efi_firmware
    }

    fn is_root(&self) -> bool {
        true
    }
}

impl BootloaderOps for FakeHal {
    fn grub_install(
        &self,
        _boot_dir: &Path,
        efi_dir: &Path,
        bootloader_id: &str,
        opts: &GrubOptions,
    ) -> HalResult<()> {
        if !opts.dry_run && !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        if opts.dry_run {
            return Ok(());
        }

        if self
            .state
            .lock()
            .unwrap()
            .fail_grub_ids
            .contains(bootloader_id)
        {
            return Err(Self::command_failed(
                "grub-install",
                "failed to register the EFI boot entry",
            ));
        }

        self.record(Operation::GrubInstall {
            efi_dir: efi_dir.to_path_buf(),
            bootloader_id: bootloader_id.to_string(),
        });
        // A successful install leaves the bootloader binary on the firmware
        // partition; the orchestrator verifies exactly this path.
        let binary = efi_dir
            .join("EFI")
            .join(bootloader_id)
            .join("grubx64.efi");
        self.state.lock().unwrap().existing_paths.insert(binary);
        Ok(())
    }
}
