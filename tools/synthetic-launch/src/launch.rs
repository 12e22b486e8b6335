use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// shell convention for a command that could not be found
pub const EXIT_NOT_FOUND: i32 = 127;
/// shell convention for a command that could not be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// added to the signal number when the child was killed by a signal
pub const EXIT_SIGNAL_BASE: i32 = 128;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("`{}` not found", .0.display())]
    NotFound(PathBuf),
    #[error("`{}` is not executable", .0.display())]
    NotExecutable(PathBuf),
    #[error("failed to spawn `{}`: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for child: {0}")]
    Wait(#[source] io::Error),
}

impl LaunchError {
    /// Exit code a shell would report for the same failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => EXIT_NOT_FOUND,
            Self::NotExecutable(_) => EXIT_NOT_EXECUTABLE,
            Self::Spawn { .. } | Self::Wait(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumaPolicy {
    Disabled,
    Node {
        node: u32,
        membind: bool,
        numactl: PathBuf,
    },
}

/// The exact program and argv to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl LaunchPlan {
    pub fn build<S: AsRef<OsStr>>(numa: &NumaPolicy, binary: &Path, args: &[S]) -> Self {
        let forwarded = args.iter().map(|arg| arg.as_ref().to_owned());
        match numa {
            NumaPolicy::Disabled => Self {
                program: binary.to_owned(),
                args: forwarded.collect(),
            },
            NumaPolicy::Node {
                node,
                membind,
                numactl,
            } => {
                let node = OsString::from(node.to_string());
                let mut argv = vec![OsString::from("-N"), node.clone()];
                if *membind {
                    argv.push(OsString::from("-m"));
                    argv.push(node);
                }
                argv.push(binary.as_os_str().to_owned());
                argv.extend(forwarded);
                Self {
                    program: numactl.clone(),
                    args: argv,
                }
            }
        }
    }

    /// Space-separated rendering for logs and `--dry-run`. Arguments with
    /// whitespace are single-quoted.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn with inherited stdio and block until the child exits. Returns
    /// the child's exit code.
    pub async fn run(&self) -> Result<i32, LaunchError> {
        info!(command = %self.command_line(), "launching");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => LaunchError::NotFound(self.program.clone()),
                io::ErrorKind::PermissionDenied => LaunchError::NotExecutable(self.program.clone()),
                _ => LaunchError::Spawn {
                    program: self.program.clone(),
                    source: err,
                },
            })?;
        debug!(pid = ?child.id(), "child spawned");

        let status = wait_child(child).await?;
        let code = exit_code(status);
        info!(%status, code, "child exited");
        Ok(code)
    }
}

fn quote(arg: &OsStr) -> String {
    let raw = arg.to_string_lossy();
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        format!("'{}'", raw.replace('\'', r"'\''"))
    } else {
        raw.into_owned()
    }
}

/// The child shares our process group, so a terminal interrupt reaches it
/// too; keep waiting so its exit code is the one reported.
async fn wait_child(mut child: Child) -> Result<ExitStatus, LaunchError> {
    loop {
        tokio::select! {
            status = child.wait() => return status.map_err(LaunchError::Wait),
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("interrupt received, waiting for child to exit"),
                Err(err) => {
                    warn!(?err, "cannot listen for interrupts");
                    return child.wait().await.map_err(LaunchError::Wait);
                }
            },
        }
    }
}

/// Exit code of `status`, or `128 + signal` when the child was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return EXIT_SIGNAL_BASE + signal;
        }
    }
    1
}
