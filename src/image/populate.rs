//! Content population: overlaying sources onto the mounted filesystem.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::process::{Cmd, ExecutionLog};

/// One content source: a target root inside the image and a host path.
///
/// A directory source's contents are mirrored directly into the target
/// root; a file source is treated as an archive and extracted there. Later
/// sources overwrite files placed by earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// Absolute path within the target filesystem.
    pub root: PathBuf,
    /// Host path of the directory or archive to overlay.
    pub source: PathBuf,
}

impl std::str::FromStr for SourceSpec {
    type Err = anyhow::Error;

    /// Parse a `root:source` pair, e.g. `/etc:conf.tgz` or `/:./system/`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((root, source)) if !root.is_empty() && !source.is_empty() => Ok(Self {
                root: PathBuf::from(root),
                source: PathBuf::from(source),
            }),
            _ => bail!("malformed source '{}' (expected <root>:<source>)", s),
        }
    }
}

impl SourceSpec {
    /// Where this source lands, relative to the mounted image.
    pub fn target_path(&self, mountpoint: &Path) -> Result<PathBuf> {
        if !self.root.is_absolute() {
            bail!("source root '{}' is not absolute", self.root.display());
        }
        let relative = self.root.strip_prefix("/").unwrap_or(&self.root);
        Ok(mountpoint.join(relative))
    }
}

/// Overlay one source onto the mounted filesystem.
pub fn apply_source(mountpoint: &Path, spec: &SourceSpec, log: &mut ExecutionLog) -> Result<()> {
    let target = spec.target_path(mountpoint)?;
    fs::create_dir_all(&target)
        .with_context(|| format!("creating target root '{}'", target.display()))?;

    let source = fs::canonicalize(&spec.source)
        .with_context(|| format!("resolving source '{}'", spec.source.display()))?;

    if source.is_dir() {
        // Relative-path mode run from inside the source mirrors its
        // contents, with permissions, directly into the target root.
        Cmd::new("rsync")
            .args(["-RrvP", "."])
            .arg_path(&target)
            .current_dir(&source)
            .error_msg("copying source directory")
            .run(log)
    } else {
        Cmd::new("tar")
            .arg("xvf")
            .arg_path(&source)
            .current_dir(&target)
            .error_msg("extracting source archive")
            .run(log)
    }
}

/// Print the image's file tree, one path per line.
pub fn print_tree(mountpoint: &Path) -> Result<()> {
    for entry in WalkDir::new(mountpoint) {
        let entry = entry.context("walking image tree")?;
        let relative = entry
            .path()
            .strip_prefix(mountpoint)
            .unwrap_or_else(|_| entry.path());
        if relative.as_os_str().is_empty() {
            println!(".");
        } else {
            println!("./{}", relative.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::command_exists;
    use std::fs::File;

    #[test]
    fn test_parse_source_spec() {
        let spec: SourceSpec = "/etc:conf.tgz".parse().unwrap();
        assert_eq!(spec.root, PathBuf::from("/etc"));
        assert_eq!(spec.source, PathBuf::from("conf.tgz"));

        let spec: SourceSpec = "/:./system/".parse().unwrap();
        assert_eq!(spec.root, PathBuf::from("/"));
    }

    #[test]
    fn test_parse_rejects_malformed_spec() {
        assert!("no-colon".parse::<SourceSpec>().is_err());
        assert!(":source".parse::<SourceSpec>().is_err());
        assert!("/root:".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn test_target_path_requires_absolute_root() {
        let spec = SourceSpec {
            root: PathBuf::from("etc"),
            source: PathBuf::from("conf.tgz"),
        };
        assert!(spec.target_path(Path::new("/mnt")).is_err());
    }

    #[test]
    fn test_target_path_joins_under_mountpoint() {
        let spec = SourceSpec {
            root: PathBuf::from("/etc/app"),
            source: PathBuf::from("conf.tgz"),
        };
        let target = spec.target_path(Path::new("/mnt/image")).unwrap();
        assert_eq!(target, PathBuf::from("/mnt/image/etc/app"));
    }

    #[test]
    fn test_apply_source_fails_on_missing_source() {
        let mount = tempfile::TempDir::new().unwrap();
        let spec = SourceSpec {
            root: PathBuf::from("/data"),
            source: PathBuf::from("/definitely/not/here.tgz"),
        };
        let mut log = crate::process::ExecutionLog::new();
        assert!(apply_source(mount.path(), &spec, &mut log).is_err());
    }

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_archive_source_extracts_into_root() {
        if !command_exists("tar") {
            return;
        }

        let temp = tempfile::TempDir::new().unwrap();
        let mount = temp.path().join("mnt");
        fs::create_dir(&mount).unwrap();
        let archive = temp.path().join("conf.tar");
        write_archive(&archive, &[("app/settings.conf", "key=value\n")]);

        let spec = SourceSpec {
            root: PathBuf::from("/etc"),
            source: archive,
        };
        let mut log = crate::process::ExecutionLog::new();
        apply_source(&mount, &spec, &mut log).unwrap();

        let extracted = mount.join("etc/app/settings.conf");
        assert_eq!(fs::read_to_string(extracted).unwrap(), "key=value\n");
    }

    #[test]
    fn test_later_source_overwrites_earlier() {
        if !command_exists("tar") {
            return;
        }

        let temp = tempfile::TempDir::new().unwrap();
        let mount = temp.path().join("mnt");
        fs::create_dir(&mount).unwrap();

        let first = temp.path().join("first.tar");
        write_archive(&first, &[("motd", "first version\n")]);
        let second = temp.path().join("second.tar");
        write_archive(&second, &[("motd", "second version\n")]);

        let mut log = crate::process::ExecutionLog::new();
        for archive in [first, second] {
            let spec = SourceSpec {
                root: PathBuf::from("/etc"),
                source: archive,
            };
            apply_source(&mount, &spec, &mut log).unwrap();
        }

        assert_eq!(
            fs::read_to_string(mount.join("etc/motd")).unwrap(),
            "second version\n"
        );
    }

    #[test]
    fn test_directory_source_mirrors_contents() {
        if !command_exists("rsync") {
            return;
        }

        let temp = tempfile::TempDir::new().unwrap();
        let mount = temp.path().join("mnt");
        fs::create_dir(&mount).unwrap();
        let source = temp.path().join("confdir");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("top.conf"), "top\n").unwrap();
        fs::write(source.join("nested/deep.conf"), "deep\n").unwrap();

        let spec = SourceSpec {
            root: PathBuf::from("/etc"),
            source,
        };
        let mut log = crate::process::ExecutionLog::new();
        apply_source(&mount, &spec, &mut log).unwrap();

        // Contents land directly under the root, not under 'confdir/'.
        assert_eq!(fs::read_to_string(mount.join("etc/top.conf")).unwrap(), "top\n");
        assert_eq!(
            fs::read_to_string(mount.join("etc/nested/deep.conf")).unwrap(),
            "deep\n"
        );
    }
}
