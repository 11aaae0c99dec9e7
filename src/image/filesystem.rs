//! Filesystem creation and mountpoint management for the mapped partition.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::{Cmd, ExecutionLog};

/// The one filesystem type images are built with.
pub const IMAGE_FILESYSTEM: &str = "ext3";

pub fn make_filesystem(partition: &Path, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("mkfs.ext3")
        .arg_path(partition)
        .error_msg("creating filesystem")
        .run(log)
}

/// Allocate a fresh temporary mountpoint, resolved to an absolute path.
///
/// The directory's removal belongs to the resource stack, so the tempdir
/// guard is dissolved here and the plain path returned.
pub fn create_mountpoint() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("sysimage-")
        .tempdir()
        .context("creating temporary mountpoint")?;
    let path = dir.into_path();
    fs::canonicalize(&path)
        .with_context(|| format!("resolving mountpoint '{}'", path.display()))
}

pub fn mount(partition: &Path, mountpoint: &Path, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("mount")
        .args(["-t", IMAGE_FILESYSTEM])
        .arg_path(partition)
        .arg_path(mountpoint)
        .error_msg("mounting the partition")
        .run(log)
}

/// Lazy unmount, tolerant of a briefly busy mount.
pub fn unmount(mountpoint: &Path, log: &mut ExecutionLog) -> Result<()> {
    Cmd::new("umount")
        .arg("-l")
        .arg_path(mountpoint)
        .error_msg("unmounting the partition")
        .run(log)
}

pub fn remove_mountpoint(mountpoint: &Path) -> Result<()> {
    fs::remove_dir(mountpoint)
        .with_context(|| format!("removing mountpoint '{}'", mountpoint.display()))
}
