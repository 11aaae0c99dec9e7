//! Preflight checks run before any host mutation.
//!
//! A build that cannot finish should fail here, with nothing to clean up:
//! no external command runs until every check passes.

use anyhow::{bail, Result};

use crate::image::BuildRequest;

/// Check if a program resolves on the host's search path.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Check that every listed program is available.
pub fn check_required_programs(programs: &[&str]) -> Result<()> {
    let missing: Vec<&str> = programs
        .iter()
        .copied()
        .filter(|program| !command_exists(program))
        .collect();

    if !missing.is_empty() {
        bail!("missing required programs: {}", missing.join(", "));
    }
    Ok(())
}

/// Validate a build request against the host before the pipeline starts.
pub fn check_build(request: &BuildRequest) -> Result<()> {
    if request.output.exists() {
        bail!(
            "output file '{}' already exists",
            request.output.display()
        );
    }
    if !request.kernel.is_file() {
        bail!("kernel image '{}' not found", request.kernel.display());
    }
    if let Some(initrd) = &request.initrd {
        if !initrd.is_file() {
            bail!("initrd image '{}' not found", initrd.display());
        }
    }
    check_required_programs(&request.format.required_programs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely-not-a-real-program-12345"));
    }

    #[test]
    fn test_check_required_programs_reports_missing() {
        let err =
            check_required_programs(&["ls", "definitely-not-a-real-program-12345"]).unwrap_err();
        assert!(err
            .to_string()
            .contains("definitely-not-a-real-program-12345"));
    }

    #[test]
    fn test_check_required_programs_all_present() {
        assert!(check_required_programs(&["ls", "cat"]).is_ok());
    }
}
