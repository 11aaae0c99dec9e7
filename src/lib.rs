//! Bootable VM disk image builder.
//!
//! Builds a raw or converted virtual-disk image from a kernel, an optional
//! initrd, and a set of filesystem content sources (archives or
//! directories). The heavy lifting is delegated to the standard host tools
//! (`dd`, `sfdisk`, `losetup`, `kpartx`, `mkfs.ext3`, `mount`, `extlinux`,
//! `tar`, `rsync`, `vboxmanage`), orchestrated as a single-threaded
//! pipeline with strict reverse-order cleanup of every host resource it
//! acquires.
//!
//! # Architecture
//!
//! ```text
//! sysimage
//!     │
//!     ├── process    - external command runner + per-run command log
//!     ├── preflight  - host checks before any mutation
//!     ├── teardown   - LIFO stack of resource release actions
//!     └── image      - the pipeline
//!         ├── blockdev    dd / sfdisk / losetup / kpartx
//!         ├── filesystem  mkfs.ext3, mountpoint, mount / umount
//!         ├── bootloader  MBR blob, syslinux.cfg, extlinux
//!         ├── populate    source overlays (tar / rsync)
//!         └── format      raw rename or vboxmanage conversion
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sysimage::{build, BuildRequest, ExecutionLog, OutputFormat};
//!
//! let request = BuildRequest {
//!     output: "out.img".into(),
//!     kernel: "vmlinuz".into(),
//!     initrd: None,
//!     disk_size_mb: 128,
//!     kernel_cmdline: "root=/dev/sda1 ro".into(),
//!     format: OutputFormat::Raw,
//!     disk_uuid: None,
//!     sources: vec!["/:./system/".parse()?],
//!     print_tree: false,
//! };
//!
//! let mut log = ExecutionLog::new();
//! if let Err(err) = build(&request, &mut log) {
//!     log.dump(&mut std::io::stderr())?;
//!     eprintln!("{err:#}");
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod image;
pub mod preflight;
pub mod process;
pub mod teardown;

pub use image::{build, BuildRequest, OutputFormat, SourceSpec};
pub use process::{Cmd, ExecutionLog};
pub use teardown::ResourceStack;
