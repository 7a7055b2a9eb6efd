//! External programs run as subprocesses.

use std::ffi::OsStr;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use camino::Utf8Path;

use crate::error::ToolError;

/// A single invocation of an external program.
///
/// Input is fed to stdin from a separate thread, so a program which starts
/// writing before it has read everything can't deadlock against us.
pub struct Tool {
    program: String,
    command: Command,
    input: Option<Vec<u8>>,
}

impl Tool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            command: Command::new(program),
            input: None,
        }
    }

    /// Prefers the copy installed in `node_modules/.bin`, falling back to
    /// whatever is on `PATH`.
    pub fn node(node_modules: &Utf8Path, program: &str) -> Self {
        let local = node_modules.join(".bin").join(program);
        let mut tool = Self::new(program);
        if local.is_file() {
            tool.command = Command::new(local.as_std_path());
        }
        tool
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env(key, value);
        self
    }

    pub fn input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.input = Some(data.into());
        self
    }

    /// Runs the program to completion and returns its stdout.
    pub fn run(mut self) -> Result<Vec<u8>, ToolError> {
        tracing::debug!("running {:?}", self.command);

        let stdin = if self.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = self
            .command
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => ToolError::Missing {
                    program: self.program.clone(),
                },
                _ => ToolError::Spawn {
                    program: self.program.clone(),
                    source,
                },
            })?;

        let writer = match (self.input.take(), child.stdin.take()) {
            (Some(data), Some(mut pipe)) => Some(std::thread::spawn(move || {
                // drop closes the pipe
                pipe.write_all(&data)
            })),
            _ => None,
        };

        let output = child.wait_with_output().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The program may legitimately exit without reading everything.
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(source)) => {
                    return Err(ToolError::Spawn {
                        program: self.program,
                        source,
                    });
                }
                Err(_) => tracing::error!("stdin writer for {} panicked", self.program),
            }
        }

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}
