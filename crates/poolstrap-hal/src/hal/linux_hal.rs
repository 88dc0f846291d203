//! Linux HAL implementation using real system calls and external tools.

use super::{
    BootloaderOps, EspFormatOptions, FormatOps, FsOps, GrubOptions, HostInfoOps, MountOps,
    MountOptions, PartitionOps, ProbeOps, ProcessOps, SgdiskOp, SgdiskOptions, SystemOps,
    WipeFsOptions, ZfsCreateRequest, ZfsOps, ZfsOptions, ZpoolCreateRequest, ZpoolOptions,
};
use crate::hal::format_ops::SwapFormatOptions;
use poolstrap_error::{HalError, HalResult};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(60);
const WIPEFS_TIMEOUT: Duration = Duration::from_secs(60);
const SGDISK_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const ZPOOL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ZFS_TIMEOUT: Duration = Duration::from_secs(60);
const GRUB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

impl ProcessOps for LinuxHal {
    fn command_output_with_cwd(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> HalResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        output_with_timeout(program, &mut cmd, timeout)
    }

    fn command_status_with_cwd(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> HalResult<()> {
        let output = self.command_output_with_cwd(program, args, cwd, timeout)?;
        if !output.status.success() {
            return Err(output_failed(program, &output));
        }
        Ok(())
    }
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        let flags = nix::mount::MsFlags::empty();
        let data = options.options.as_deref();

        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount -R {}", target.display());
            return Ok(());
        }

        // Read current mount table and unmount deepest-first for anything under `target`.
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse(&content);

        let mut under: Vec<std::path::PathBuf> = entries
            .iter()
            .map(|e| e.mount_point.clone())
            .filter(|mp| mp == target || mp.starts_with(target))
            .collect();

        // Unmount deepest paths first.
        under.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

        for mp in under {
            // Ignore errors for already-unmounted paths; the export step will
            // surface anything genuinely stuck.
            let _ = nix::mount::umount2(&mp, nix::mount::MntFlags::empty());
        }

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse(&content);
        Ok(crate::procfs::mountinfo::is_mounted(&entries, path))
    }
}

impl PartitionOps for LinuxHal {
    fn wipefs_all(&self, disk: &Path, opts: &WipeFsOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: wipefs -a {}", disk.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("wipefs");
        cmd.args(["-a"]).arg(disk);
        let output = output_with_timeout("wipefs", &mut cmd, WIPEFS_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("wipefs", &output));
        }
        Ok(())
    }

    fn sgdisk(&self, disk: &Path, op: SgdiskOp, opts: &SgdiskOptions) -> HalResult<String> {
        if opts.dry_run {
            log::info!("DRY RUN: sgdisk {:?} {}", op, disk.display());
            return Ok(String::new());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("sgdisk");
        cmd.args(op.to_args()).arg(disk);
        let output = output_with_timeout("sgdisk", &mut cmd, SGDISK_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("sgdisk", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl FormatOps for LinuxHal {
    fn format_esp(&self, device: &Path, label: &str, opts: &EspFormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkdosfs -F 32 {} ({})", device.display(), label);
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let cluster = opts.sectors_per_cluster.to_string();
        let mut cmd = Command::new("mkdosfs");
        cmd.args(["-F", "32", "-s", &cluster, "-n", label]).arg(device);
        let output = output_with_timeout("mkdosfs", &mut cmd, FORMAT_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("mkdosfs", &output));
        }
        Ok(())
    }

    fn format_swap(&self, device: &Path, label: &str, opts: &SwapFormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkswap {} ({})", device.display(), label);
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("mkswap");
        cmd.args(["-L", label]).arg(device);
        let output = output_with_timeout("mkswap", &mut cmd, FORMAT_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("mkswap", &output));
        }
        Ok(())
    }
}

impl ZfsOps for LinuxHal {
    fn zpool_create(&self, req: &ZpoolCreateRequest, opts: &ZpoolOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: zpool {}", req.to_args().join(" "));
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let args = req.to_args();
        if req.encryption {
            // The passphrase prompt is a deliberate synchronous block: zpool
            // reads it from the operator's terminal, so stdio is inherited
            // and no timeout applies.
            let mut cmd = Command::new("zpool");
            cmd.args(&args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            let status = cmd.status().map_err(|e| map_command_err("zpool", e))?;
            if !status.success() {
                return Err(HalError::CommandFailed {
                    program: "zpool".to_string(),
                    code: status.code(),
                    stderr: String::new(),
                });
            }
            return Ok(());
        }

        let mut cmd = Command::new("zpool");
        cmd.args(&args);
        status_with_timeout("zpool", &mut cmd, ZPOOL_TIMEOUT)
    }

    fn zpool_export(&self, pool: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: zpool export {}", pool);
            return Ok(());
        }
        let mut cmd = Command::new("zpool");
        cmd.args(["export", pool]);
        status_with_timeout("zpool", &mut cmd, ZPOOL_TIMEOUT)
    }

    fn zpool_import(&self, pool: &str, altroot: Option<&Path>, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: zpool import {}", pool);
            return Ok(());
        }
        let mut args: Vec<String> = vec!["import".to_string(), "-l".to_string()];
        if let Some(altroot) = altroot {
            args.push("-R".to_string());
            args.push(altroot.display().to_string());
        }
        args.push(pool.to_string());
        // `-l` may prompt for a passphrase on encrypted pools; inherit stdio
        // and skip the timeout, like encrypted pool creation.
        let mut cmd = Command::new("zpool");
        cmd.args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = cmd.status().map_err(|e| map_command_err("zpool", e))?;
        if !status.success() {
            return Err(HalError::CommandFailed {
                program: "zpool".to_string(),
                code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn zpool_list_names(&self) -> HalResult<Vec<String>> {
        let mut cmd = Command::new("zpool");
        cmd.args(["list", "-H", "-o", "name"]);
        let output = output_with_timeout("zpool", &mut cmd, PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("zpool", &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn zpool_importable_names(&self) -> HalResult<Vec<String>> {
        let mut cmd = Command::new("zpool");
        cmd.arg("import");
        let output = output_with_timeout("zpool", &mut cmd, PROBE_TIMEOUT)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("no pools available") {
            return Err(output_failed("zpool", &output));
        }
        Ok(stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("pool:"))
            .map(|name| name.trim().to_string())
            .collect())
    }

    fn zpool_get(&self, pool: &str, prop: &str) -> HalResult<String> {
        let mut cmd = Command::new("zpool");
        cmd.args(["get", "-H", "-o", "value", prop, pool]);
        let output = output_with_timeout("zpool", &mut cmd, PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("zpool", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn zfs_create(&self, req: &ZfsCreateRequest, opts: &ZfsOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: zfs {}", req.to_args().join(" "));
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        let mut cmd = Command::new("zfs");
        cmd.args(req.to_args());
        status_with_timeout("zfs", &mut cmd, ZFS_TIMEOUT)
    }

    fn zfs_mount(&self, dataset: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: zfs mount {}", dataset);
            return Ok(());
        }
        let mut cmd = Command::new("zfs");
        cmd.args(["mount", dataset]);
        status_with_timeout("zfs", &mut cmd, ZFS_TIMEOUT)
    }

    fn zfs_set(&self, dataset: &str, prop: &str, value: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: zfs set {}={} {}", prop, value, dataset);
            return Ok(());
        }
        let assignment = format!("{}={}", prop, value);
        let mut cmd = Command::new("zfs");
        cmd.args(["set", &assignment, dataset]);
        status_with_timeout("zfs", &mut cmd, ZFS_TIMEOUT)
    }
}

impl ProbeOps for LinuxHal {
    fn blkid_uuid(&self, device: &Path) -> HalResult<String> {
        let mut cmd = Command::new("blkid");
        cmd.args(["-s", "UUID", "-o", "value"]).arg(device);
        let output = output_with_timeout("blkid", &mut cmd, PROBE_TIMEOUT)?;

        if !output.status.success() {
            return Err(output_failed("blkid", &output));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn probe_signature(&self, device: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("blkid");
        cmd.args(["-o", "export"]).arg(device);
        let output = output_with_timeout("blkid", &mut cmd, PROBE_TIMEOUT)?;

        // blkid exits non-zero when no signature is present; that is a
        // perfectly clean device, not an error.
        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut fstype = None;
        let mut label = None;
        for line in stdout.lines() {
            if let Some(value) = line.strip_prefix("TYPE=") {
                fstype = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("LABEL=") {
                label = Some(value.to_string());
            }
        }
        Ok(match (fstype, label) {
            (Some(t), Some(l)) => Some(format!("{} ({})", t, l)),
            (Some(t), None) => Some(t),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        let mut cmd = Command::new("sync");
        status_with_timeout("sync", &mut cmd, SYNC_TIMEOUT)
    }

    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        status_with_timeout("udevadm", &mut cmd, SYNC_TIMEOUT)
    }

    fn partprobe(&self, disk: &Path) -> HalResult<()> {
        let mut cmd = Command::new("partprobe");
        cmd.arg(disk);
        status_with_timeout("partprobe", &mut cmd, SYNC_TIMEOUT)
    }
}

impl FsOps for LinuxHal {
    fn create_dir_all(&self, path: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: mkdir -p {}", path.display());
            return Ok(());
        }
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn set_permissions(&self, path: &Path, mode: u32, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: chmod {:o} {}", mode, path.display());
            return Ok(());
        }
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: chown {}:{} {}", uid, gid, path.display());
            return Ok(());
        }
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: cp {} {}", src.display(), dst.display());
            return Ok(());
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(())
    }

    fn append_line(&self, path: &Path, line: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: append to {}: {}", path.display(), line);
            return Ok(());
        }
        use std::io::Write;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn write_file(&self, path: &Path, content: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: write {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}

impl HostInfoOps for LinuxHal {
    fn proc_meminfo(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/proc/meminfo")?)
    }

    fn proc_mountinfo(&self) -> HalResult<String> {
        Ok(fs::read_to_string("/proc/self/mountinfo")?)
    }

    fn efi_firmware_present(&self) -> bool {
        Path::new("/sys/firmware/efi").exists()
    }

    fn is_root(&self) -> bool {
        // SAFETY: geteuid has no failure modes and touches no memory.
        unsafe { libc::geteuid() == 0 }
    }
}

impl BootloaderOps for LinuxHal {
    fn grub_install(
        &self,
        boot_dir: &Path,
        efi_dir: &Path,
        bootloader_id: &str,
        opts: &GrubOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!(
                "DRY RUN: grub-install --bootloader-id={} --efi-directory={}",
                bootloader_id,
                efi_dir.display()
            );
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let boot = boot_dir.display().to_string();
        let efi = efi_dir.display().to_string();
        let mut cmd = Command::new("grub-install");
        cmd.args([
            "--target=x86_64-efi",
            &format!("--boot-directory={}", boot),
            &format!("--efi-directory={}", efi),
            &format!("--bootloader-id={}", bootloader_id),
            "--recheck",
            "--no-floppy",
        ]);
        status_with_timeout("grub-install", &mut cmd, GRUB_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipefs_requires_confirmation() {
        let hal = LinuxHal::new();
        let opts = WipeFsOptions::new(false, false);
        let err = hal.wipefs_all(Path::new("/dev/null"), &opts).unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn sgdisk_requires_confirmation() {
        let hal = LinuxHal::new();
        let opts = SgdiskOptions::new(false, false);
        let err = hal
            .sgdisk(Path::new("/dev/null"), SgdiskOp::ZapAll, &opts)
            .unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn zpool_create_requires_confirmation() {
        let hal = LinuxHal::new();
        let req = ZpoolCreateRequest {
            name: "testpool".to_string(),
            ashift: 12,
            features: crate::FeaturePolicy::Full,
            pool_props: vec![],
            fs_props: vec![],
            encryption: false,
            altroot: None,
            force: false,
            vdev: vec!["/dev/null".to_string()],
        };
        let err = hal
            .zpool_create(&req, &ZpoolOptions::new(false, false))
            .unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn dry_run_never_touches_the_system() {
        let hal = LinuxHal::new();
        hal.wipefs_all(Path::new("/dev/null"), &WipeFsOptions::new(true, false))
            .unwrap();
        hal.sgdisk(
            Path::new("/dev/null"),
            SgdiskOp::Print,
            &SgdiskOptions::new(true, false),
        )
        .unwrap();
        hal.zfs_set("rpool", "mountpoint", "/", true).unwrap();
    }
}
