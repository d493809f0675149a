use log::debug;
use std::fmt::{Display, Formatter};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// A tool that ran to completion but did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub program: String,
    pub code: Option<i32>,
    /// Captured diagnostic output. Empty when output was streamed.
    pub stderr: String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with code {}", self.program, code)?,
            None => write!(f, "{} was terminated by a signal", self.program)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {}", stderr)?;
        }
        Ok(())
    }
}

pub struct Completed {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    program: String,
}

impl Completed {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn check(self) -> Result<Self, Failure> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(self.into_failure())
        }
    }

    pub fn into_failure(self) -> Failure {
        Failure {
            program: self.program,
            code: self.status.code(),
            stderr: self.stderr,
        }
    }
}

/// Run a command and wait for it to exit.
///
/// When `stream` is set, stdout and stderr go straight to the terminal and
/// nothing is captured. Otherwise both are captured for the caller.
pub async fn run(command: &mut Command, stream: bool) -> Result<Completed, std::io::Error> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    debug!("Running {:?}", command.as_std());

    if stream {
        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        return Ok(Completed {
            status,
            stdout: String::new(),
            stderr: String::new(),
            program,
        });
    }

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    let completed = Completed {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        program,
    };
    if !completed.stdout.is_empty() {
        debug!("{} stdout: {}", completed.program, completed.stdout.trim_end());
    }
    Ok(completed)
}
