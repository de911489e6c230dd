use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct Output {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool { self.code == 0 }
    pub fn combined(&self) -> String { format!("{}{}", self.stdout, self.stderr) }
}

/// Run a program to completion. The child is killed if `timeout` expires first.
pub async fn run<I, S>(program: &str, args: I, cwd: Option<&Path>, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    if let Some(dir) = cwd { cmd.current_dir(dir); }
    let t0 = Instant::now();
    let out = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(res) => res.with_context(|| format!("spawning {program}"))?,
        Err(_) => bail!("{program} timed out after {}s", timeout.as_secs_f64()),
    };
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("source_exec_ms", ms);
    let out = Output {
        code: out.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    };
    debug!(program, code = out.code, took_ms = ms as u64, "exec: done");
    Ok(out)
}

/// Like [`run`], but a non-zero exit is an error carrying stderr.
pub async fn run_ok<I, S>(program: &str, args: I, cwd: Option<&Path>, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let out = run(program, args, cwd, timeout).await?;
    if !out.success() {
        bail!("{program} exited with {}: {}", out.code, out.stderr.trim());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = run("sh", ["-c", "echo hi; echo oops >&2; exit 3"], None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
        let err = run_ok("sh", ["-c", "echo bad >&2; exit 1"], None, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let err = run("sh", ["-c", "sleep 5"], None, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), b"x").unwrap();
        let out = run_ok("ls", Vec::<&str>::new(), Some(dir.path()), Duration::from_secs(5)).await.unwrap();
        assert!(out.stdout.contains("marker"));
    }
}
