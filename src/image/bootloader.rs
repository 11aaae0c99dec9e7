//! MBR boot code, kernel placement, and extlinux installation.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::process::{Cmd, ExecutionLog};

/// Boot files directory inside the image, also the extlinux install target.
pub const BOOT_DIR: &str = "boot";

/// Locations distros install the syslinux 440-byte MBR blob.
const MBR_CANDIDATES: &[&str] = &[
    // Debian/Ubuntu (extlinux package)
    "/usr/lib/extlinux/mbr.bin",
    // Arch
    "/usr/lib/syslinux/mbr/mbr.bin",
    // Alpine
    "/usr/lib/syslinux/bios/mbr.bin",
    // Fedora/RHEL
    "/usr/share/syslinux/mbr.bin",
];

/// Find the syslinux MBR boot-code blob on the host.
pub fn find_mbr_blob() -> Option<PathBuf> {
    for path in MBR_CANDIDATES {
        let p = PathBuf::from(path);
        if p.is_file() {
            return Some(p);
        }
    }
    None
}

/// Copy the 440-byte MBR boot code onto the start of the raw loop device.
pub fn write_mbr(device: &str, log: &mut ExecutionLog) -> Result<()> {
    let mbr = find_mbr_blob().ok_or_else(|| {
        anyhow!(
            "syslinux MBR boot code not found (looked in {})",
            MBR_CANDIDATES.join(", ")
        )
    })?;

    Cmd::new("dd")
        .arg(format!("if={}", mbr.display()))
        .arg(format!("of={}", device))
        .args(["bs=440", "count=1"])
        .error_msg("writing MBR boot code")
        .run(log)
}

/// Render the syslinux boot menu configuration.
///
/// The initrd directive appears only when an initrd is installed.
pub fn render_boot_config(kernel: &str, cmdline: &str, initrd: Option<&str>) -> String {
    let initrd_directive = match initrd {
        Some(name) => format!("INITRD {}", name),
        None => String::new(),
    };
    format!(
        "PROMPT 0\n\
         DEFAULT linux\n\
         LABEL linux\n    \
             LINUX {}\n    \
             APPEND {}\n    \
             {}\n",
        kernel, cmdline, initrd_directive
    )
}

/// Install the bootloader into the mounted filesystem.
///
/// Creates `boot/`, copies the kernel (and initrd, when supplied) into it,
/// writes `syslinux.cfg`, and runs `extlinux --install` against that
/// directory so the MBR boot code can chain-load it.
pub fn install(
    mountpoint: &Path,
    kernel: &Path,
    initrd: Option<&Path>,
    cmdline: &str,
    log: &mut ExecutionLog,
) -> Result<()> {
    let boot_dir = mountpoint.join(BOOT_DIR);
    fs::create_dir_all(&boot_dir)
        .with_context(|| format!("creating '{}'", boot_dir.display()))?;
    fs::set_permissions(&boot_dir, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("setting permissions on '{}'", boot_dir.display()))?;

    let kernel_name = file_name(kernel)?;
    fs::copy(kernel, boot_dir.join(kernel_name)).with_context(|| {
        format!(
            "copying kernel '{}' into '{}'",
            kernel.display(),
            boot_dir.display()
        )
    })?;

    let initrd_name = match initrd {
        Some(initrd) => {
            let name = file_name(initrd)?;
            fs::copy(initrd, boot_dir.join(name)).with_context(|| {
                format!(
                    "copying initrd '{}' into '{}'",
                    initrd.display(),
                    boot_dir.display()
                )
            })?;
            Some(name)
        }
        None => None,
    };

    let config = render_boot_config(kernel_name, cmdline, initrd_name);
    let config_path = boot_dir.join("syslinux.cfg");
    fs::write(&config_path, config)
        .with_context(|| format!("writing '{}'", config_path.display()))?;

    Cmd::new("extlinux")
        .arg("--install")
        .arg_path(&boot_dir)
        .error_msg("installing extlinux")
        .run(log)
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_config_without_initrd() {
        let rendered = render_boot_config("vmlinuz", "root=/dev/sda1 ro", None);
        assert_eq!(
            rendered,
            "PROMPT 0\n\
             DEFAULT linux\n\
             LABEL linux\n    \
                 LINUX vmlinuz\n    \
                 APPEND root=/dev/sda1 ro\n    \
                 \n"
        );
    }

    #[test]
    fn test_boot_config_with_initrd() {
        let rendered = render_boot_config("vmlinuz", "root=/dev/sda1 ro", Some("initrd.img"));
        assert!(rendered.contains("LINUX vmlinuz\n"));
        assert!(rendered.contains("APPEND root=/dev/sda1 ro\n"));
        assert!(rendered.contains("INITRD initrd.img\n"));
    }

    #[test]
    fn test_boot_config_embeds_cmdline_literally() {
        let rendered = render_boot_config("bzImage", "console=ttyS0 quiet", None);
        assert!(rendered.contains("APPEND console=ttyS0 quiet\n"));
    }

    #[test]
    fn test_file_name_rejects_trailing_dotdot() {
        assert!(file_name(Path::new("/boot/..")).is_err());
        assert_eq!(file_name(Path::new("/boot/vmlinuz")).unwrap(), "vmlinuz");
    }
}
