//! Thin builder around `std::process::Command` for host tools.
//!
//! Every call site wants the same three things: run to completion, capture
//! output, and fail with a message that tells the operator what to install or
//! look at.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::ComposeError;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Host command builder.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
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

    /// Message prefixed to the failure when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the result instead of failing on a non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Render for log lines.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(self) -> Result<CommandResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning '{}'", self.display()))?;

        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        if !result.success() && !self.allow_fail {
            let prefix = self
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("'{}' failed", self.display()));
            bail!(
                "{} (status {:?}): {}",
                prefix,
                result.code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

/// Fail with `MissingTool` unless `tool` is on PATH.
pub fn ensure_exists(tool: &str, hint: &str) -> Result<std::path::PathBuf> {
    which::which(tool).map_err(|_| {
        ComposeError::MissingTool {
            tool: tool.to_string(),
            hint: hint.to_string(),
        }
        .into()
    })
}
