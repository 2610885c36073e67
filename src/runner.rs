/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Result of a completed external command.
#[derive(Debug, Clone)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn or collect command output: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunResult<T> = std::result::Result<T, RunError>;

/// Capability interface for executing external binaries with a timeout
/// (§6 C2). Consumed by the alt-mode monitor (`alt-mode help`, `alt-mode
/// devices`) and by `connectToTcpDevice` (`connect host:port`).
///
/// A nonzero exit status is not itself an error here: `run` only fails on
/// timeout or a spawn/IO failure. The caller decides whether a nonzero
/// status is fatal, matching the "local recoveries" list in the error
/// handling design, where a command's nonzero exit is logged and the cycle
/// simply resumes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, timeout: Duration, argv: &[&str]) -> RunResult<Output>;

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Production [`CommandRunner`], grounded on `tokio::process::Command` the
/// same way `systemd::Systemd::connect_with_opts` wraps a fallible future
/// in `tokio::time::timeout` and turns an `Elapsed` into a typed error
/// variant (§4.7).
#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, duration: Duration, argv: &[&str]) -> RunResult<Output> {
        let (program, args) = argv.split_first().expect("argv must be non-empty");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = timeout(duration, child.wait_with_output())
            .await
            .map_err(|_| RunError::Timeout(duration))??;

        Ok(Output {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
