//! Backing file allocation, partitioning, and block-device plumbing.
//!
//! The partition node path is a naming contract between [`attach_loop`] and
//! [`map_partitions`]: `kpartx` exposes partition N of `/dev/loopX` as
//! `/dev/mapper/loopXpN`. [`partition_node`] derives the single partition's
//! node from the loop device's base name; nothing else may assume that
//! layout.

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};

use crate::process::{Cmd, ExecutionLog};

/// sfdisk recipe: one bootable primary partition spanning the whole device.
const WHOLE_DISK_BOOTABLE: &str = ";;;*;\n";

/// Create a zero-filled backing file of `size_mb` megabytes.
pub fn allocate_image(staging: &Path, size_mb: u64, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", staging.display()))
        .arg("bs=1M")
        .arg(format!("count={}", size_mb))
        .error_msg("allocating backing file")
        .run(log)
}

/// Write the fixed single-partition MBR table into the backing file.
pub fn write_partition_table(staging: &Path, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("sfdisk")
        .arg_path(staging)
        .stdin(WHOLE_DISK_BOOTABLE)
        .error_msg("writing partition table")
        .run(log)
}

/// Bind the backing file to a free loop device, returning its path.
pub fn attach_loop(staging: &Path, log: &mut ExecutionLog) -> Result<String> {
    let output = Cmd::new("losetup")
        .args(["--show", "-f"])
        .arg_path(staging)
        .error_msg("attaching loop device")
        .run_capture(log)?;

    let device = output.trim().to_string();
    if device.is_empty() {
        bail!(
            "losetup reported no device for '{}'",
            staging.display()
        );
    }
    Ok(device)
}

pub fn detach_loop(device: &str, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("losetup")
        .arg("-d")
        .arg(device)
        .error_msg("detaching loop device")
        .run(log)
}

/// Expose the loop device's partitions as device-mapper nodes.
pub fn map_partitions(device: &str, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("kpartx")
        .args(["-a", "-v"])
        .arg(device)
        .error_msg("mapping partitions")
        .run(log)
}

pub fn unmap_partitions(device: &str, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("kpartx")
        .arg("-d")
        .arg(device)
        .error_msg("removing partition mappings")
        .run(log)
}

/// Device-mapper node for the image's single partition.
pub fn partition_node(device: &str) -> Result<PathBuf> {
    let base = Path::new(device)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("cannot derive partition node from '{}'", device))?;
    Ok(PathBuf::from(format!("/dev/mapper/{}p1", base)))
}
