//! Output format handling and finalization of the staged image.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::process::{Cmd, ExecutionLog};

use super::BuildRequest;

/// Programs every build needs, regardless of output format.
pub const BASE_REQUIRED_PROGRAMS: &[&str] = &[
    "dd", "sfdisk", "losetup", "kpartx", "mkfs.ext3", "mount", "umount", "extlinux", "tar",
    "rsync",
];

/// Disk image output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Raw disk image, finalized by renaming the staging file.
    Raw,
    Vdi,
    Vmdk,
    Vhd,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "vdi" => Ok(Self::Vdi),
            "vmdk" => Ok(Self::Vmdk),
            "vhd" => Ok(Self::Vhd),
            other => anyhow::bail!("unknown format '{}' (expected raw, vdi, vmdk, vhd)", other),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Vdi => write!(f, "vdi"),
            Self::Vmdk => write!(f, "vmdk"),
            Self::Vhd => write!(f, "vhd"),
        }
    }
}

impl OutputFormat {
    /// The converter's `--format` argument, or `None` for raw output.
    pub fn converter_format(&self) -> Option<&'static str> {
        match self {
            Self::Raw => None,
            Self::Vdi => Some("VDI"),
            Self::Vmdk => Some("VMDK"),
            Self::Vhd => Some("VHD"),
        }
    }

    /// Every program the pipeline will invoke for this format.
    pub fn required_programs(&self) -> Vec<&'static str> {
        let mut programs = BASE_REQUIRED_PROGRAMS.to_vec();
        if self.converter_format().is_some() {
            programs.push("vboxmanage");
        }
        programs
    }
}

/// Turn the staged image into the requested output, then scrub the staging
/// file.
///
/// Runs after the device-chain teardown so the backing file is fully synced
/// and released. On a staged failure no output is produced; on success the
/// staging file is either renamed into place (raw) or consumed by the
/// external converter. Either way the staging path is removed afterwards
/// with delete-if-exists semantics, which also covers partial images left
/// by a failed pipeline.
pub fn finalize(
    request: &BuildRequest,
    staging: &Path,
    staged: Result<()>,
    log: &mut ExecutionLog,
) -> Result<()> {
    let completed = staged.and_then(|()| complete(request, staging, log));

    if let Err(err) = remove_if_exists(staging) {
        eprintln!(
            "warning: removing staging image '{}': {:#}",
            staging.display(),
            err
        );
    }

    completed
}

fn complete(request: &BuildRequest, staging: &Path, log: &mut ExecutionLog) -> Result<()> {
    match request.format.converter_format() {
        None => fs::rename(staging, &request.output).with_context(|| {
            format!(
                "renaming '{}' -> '{}'",
                staging.display(),
                request.output.display()
            )
        }),
        Some(format) => {
            println!("Creating {} image", request.format);
            Cmd::new("vboxmanage")
                .arg("convertfromraw")
                .arg_path(staging)
                .arg_path(&request.output)
                .arg(format!("--format={}", format))
                .error_msg("converting image")
                .run(log)?;

            if request.format == OutputFormat::Vdi {
                if let Some(uuid) = &request.disk_uuid {
                    println!("Setting disk UUID");
                    Cmd::new("vboxmanage")
                        .args(["internalcommands", "sethduuid"])
                        .arg_path(&request.output)
                        .arg(uuid)
                        .error_msg("setting disk UUID")
                        .run(log)?;
                }
            }
            Ok(())
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing '{}'", path.display())),
    }
}
