//! External command execution with per-run diagnostic logging.
//!
//! Every external program the builder runs goes through [`Cmd`], which
//! records an invocation header plus the captured stdout/stderr into the
//! run's [`ExecutionLog`]. The log is owned by the top-level invocation and
//! dumped to stderr once, on failure or on explicit request.
//!
//! Commands whose stdout is a machine-readable result (e.g. the device path
//! printed by `losetup --show`) use [`Cmd::run_capture`], which hands stdout
//! back to the caller instead of appending it to the log.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Accumulated diagnostic output of every external command in one run.
///
/// Entries appear in invocation order: a `=== program args` header followed
/// by whatever the command wrote. Created fresh per build, flushed at most
/// once.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    buffer: String,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn push_header(&mut self, line: &str) {
        self.buffer.push('\n');
        self.buffer.push_str("=== ");
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn push_output(&mut self, bytes: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Write the accumulated log to `out`, with a banner. No-op when empty.
    pub fn dump<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        writeln!(out, "=====================================================")?;
        writeln!(out, "================== command log ======================")?;
        writeln!(out, "=====================================================")?;
        out.write_all(self.buffer.as_bytes())?;
        writeln!(out)
    }

    #[cfg(test)]
    pub(crate) fn contents(&self) -> &str {
        &self.buffer
    }
}

/// Builder for a single synchronous external command.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    input: Option<String>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            input: None,
            cwd: None,
            error_msg: None,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Feed `content` to the command on stdin.
    pub fn stdin(mut self, content: &str) -> Self {
        self.input = Some(content.to_string());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Context message attached to a non-zero exit.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Run the command, logging its header and all of its output.
    pub fn run(self, log: &mut ExecutionLog) -> Result<()> {
        self.execute(log, false).map(|_| ())
    }

    /// Run the command, returning captured stdout to the caller.
    ///
    /// The invocation header and stderr still land in the log; stdout is the
    /// machine-readable result and bypasses it.
    pub fn run_capture(self, log: &mut ExecutionLog) -> Result<String> {
        self.execute(log, true)
    }

    fn execute(self, log: &mut ExecutionLog, capture_stdout: bool) -> Result<String> {
        log.push_header(&self.display_line());

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("launching '{}'", self.program))?;

        if let Some(input) = &self.input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .with_context(|| format!("writing stdin to '{}'", self.program))?;
            }
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for '{}'", self.program))?;

        if !capture_stdout {
            log.push_output(&output.stdout);
        }
        log.push_output(&output.stderr);

        if !output.status.success() {
            match self.error_msg {
                Some(msg) => bail!("{} ('{}' exited with {})", msg, self.program, output.status),
                None => bail!("'{}' exited with {}", self.program, output.status),
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}
