//! The image-construction pipeline.
//!
//! Stages run strictly in order, each blocking on its external command.
//! Every stage that acquires a host resource (loop device, partition
//! mapping, mountpoint) registers its release on the [`ResourceStack`]
//! immediately after the acquisition succeeds, and the stack is unwound in
//! reverse on every exit path: unmount, remove the mountpoint, remove the
//! partition mapping, detach the loop device. Finalization runs after the
//! unwind, when the backing file is synced and released, and scrubs the
//! staging file last.

pub mod blockdev;
pub mod bootloader;
pub mod filesystem;
pub mod format;
pub mod populate;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::preflight;
use crate::process::ExecutionLog;
use crate::teardown::ResourceStack;

pub use format::OutputFormat;
pub use populate::SourceSpec;

/// Everything one build needs, assembled by the caller up front.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Final image path; must not exist yet.
    pub output: PathBuf,
    /// Kernel image to install into the boot directory.
    pub kernel: PathBuf,
    /// Optional initrd installed alongside the kernel.
    pub initrd: Option<PathBuf>,
    /// Disk image size in megabytes.
    pub disk_size_mb: u64,
    /// Kernel command line embedded in the boot configuration.
    pub kernel_cmdline: String,
    pub format: OutputFormat,
    /// For vdi output, a disk UUID to stamp onto the converted image.
    pub disk_uuid: Option<String>,
    /// Content sources, overlaid in order.
    pub sources: Vec<SourceSpec>,
    /// Print the image file tree after population.
    pub print_tree: bool,
}

impl BuildRequest {
    /// The temporary backing file the pipeline works on: `<output>.tmp`.
    pub fn staging_path(&self) -> PathBuf {
        let mut name = self.output.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Paths to the host resources the pipeline has acquired so far.
///
/// Each field is set exactly once, by the stage that acquires it, and holds
/// until the corresponding teardown runs.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub backing_file: PathBuf,
    pub loop_device: Option<String>,
    pub partition: Option<PathBuf>,
    pub mountpoint: Option<PathBuf>,
}

/// Build the image described by `request`.
///
/// On failure every acquired resource is released in reverse order before
/// the error is returned; the accumulated command log is the caller's to
/// dump.
pub fn build(request: &BuildRequest, log: &mut ExecutionLog) -> Result<()> {
    preflight::check_build(request)?;

    let staging = request.staging_path();
    let mut resources = ResourceStack::new();
    let staged = run_stages(request, &staging, log, &mut resources);
    resources.unwind_all(log);
    format::finalize(request, &staging, staged, log)
}

fn run_stages(
    request: &BuildRequest,
    staging: &Path,
    log: &mut ExecutionLog,
    resources: &mut ResourceStack,
) -> Result<()> {
    let mut state = PipelineState {
        backing_file: staging.to_path_buf(),
        ..Default::default()
    };

    println!("Creating filesystem image");
    blockdev::allocate_image(&state.backing_file, request.disk_size_mb, log)?;

    println!("Creating partition table");
    blockdev::write_partition_table(&state.backing_file, log)?;

    println!("Setting up loop device");
    let device = blockdev::attach_loop(&state.backing_file, log)?;
    state.loop_device = Some(device.clone());
    {
        let device = device.clone();
        resources.push("Tearing down loop device", move |log| {
            blockdev::detach_loop(&device, log)
        });
    }

    println!("Writing MBR boot code");
    bootloader::write_mbr(&device, log)?;

    println!("Mapping image partitions");
    blockdev::map_partitions(&device, log)?;
    {
        let device = device.clone();
        resources.push("Tearing down partition mappings", move |log| {
            blockdev::unmap_partitions(&device, log)
        });
    }

    let partition = blockdev::partition_node(&device)?;
    state.partition = Some(partition.clone());

    println!("Creating filesystem");
    filesystem::make_filesystem(&partition, log)?;

    let mountpoint = filesystem::create_mountpoint()?;
    state.mountpoint = Some(mountpoint.clone());
    {
        let mountpoint = mountpoint.clone();
        resources.push("Removing the mountpoint", move |_| {
            filesystem::remove_mountpoint(&mountpoint)
        });
    }

    println!("Mounting the partition");
    filesystem::mount(&partition, &mountpoint, log)?;
    {
        let mountpoint = mountpoint.clone();
        resources.push("Unmounting the partition", move |log| {
            filesystem::unmount(&mountpoint, log)
        });
    }

    println!("Installing bootloader");
    bootloader::install(
        &mountpoint,
        &request.kernel,
        request.initrd.as_deref(),
        &request.kernel_cmdline,
        log,
    )?;

    for source in &request.sources {
        println!(
            "Populating {} from {}",
            source.root.display(),
            source.source.display()
        );
        populate::apply_source(&mountpoint, source, log)?;
    }

    if request.print_tree {
        populate::print_tree(&mountpoint)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(output: &Path) -> BuildRequest {
        BuildRequest {
            output: output.to_path_buf(),
            kernel: PathBuf::from("/boot/vmlinuz"),
            initrd: None,
            disk_size_mb: 128,
            kernel_cmdline: "root=/dev/sda1 ro".to_string(),
            format: OutputFormat::Raw,
            disk_uuid: None,
            sources: Vec::new(),
            print_tree: false,
        }
    }

    #[test]
    fn test_staging_path_appends_tmp() {
        let req = request(Path::new("/build/out.img"));
        assert_eq!(req.staging_path(), PathBuf::from("/build/out.img.tmp"));
    }

    #[test]
    fn test_build_refuses_existing_output_without_running_commands() {
        let temp = tempfile::TempDir::new().unwrap();
        let output = temp.path().join("exists.img");
        std::fs::write(&output, b"occupied").unwrap();

        let mut log = ExecutionLog::new();
        let err = build(&request(&output), &mut log).unwrap_err();

        assert!(err.to_string().contains("already exists"));
        // Refused before any external command ran.
        assert!(log.is_empty());
        assert_eq!(std::fs::read(&output).unwrap(), b"occupied");
    }

    #[test]
    fn test_build_rejects_missing_kernel_before_mutation() {
        let temp = tempfile::TempDir::new().unwrap();
        let output = temp.path().join("new.img");
        let mut req = request(&output);
        req.kernel = temp.path().join("no-such-vmlinuz");

        let mut log = ExecutionLog::new();
        assert!(build(&req, &mut log).is_err());
        assert!(log.is_empty());
        assert!(!output.exists());
        assert!(!req.staging_path().exists());
    }
}
