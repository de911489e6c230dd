use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::exec::run_ok;
use crate::{Backoff, Packager};

const SAVED_MARKER: &str = "saved it to:";

/// `Successfully packaged chart and saved it to: /x/foo-1.0.0.tgz` -> `foo-1.0.0.tgz`
pub fn parse_package_output(out: &str) -> Option<String> {
    let line = out.lines().find(|l| l.contains(SAVED_MARKER))?;
    let path = line.split(SAVED_MARKER).nth(1)?.trim();
    Path::new(path).file_name().map(|f| f.to_string_lossy().into_owned())
}

/// Packager backed by the `helm` binary.
pub struct HelmCli {
    timeout: Duration,
    backoff: Backoff,
}

impl HelmCli {
    pub fn new(timeout: Duration) -> Self { Self { timeout, backoff: Backoff::default() } }
    pub fn with_backoff(mut self, backoff: Backoff) -> Self { self.backoff = backoff; self }

    async fn package_once(&self, src: &Path, dest: &Path) -> Result<String> {
        let src = std::path::absolute(src).with_context(|| format!("resolving {}", src.display()))?;
        let out = run_ok("helm", [OsStr::new("package"), src.as_os_str(), OsStr::new("--destination"), dest.as_os_str()], None, self.timeout).await?;
        parse_package_output(&out.stdout).ok_or_else(|| anyhow!("unexpected helm output: {}", out.stdout.trim()))
    }
}

#[async_trait::async_trait]
impl Packager for HelmCli {
    async fn package(&self, src: &Path, dest: &Path) -> Result<String> {
        tokio::fs::create_dir_all(dest).await.with_context(|| format!("creating {}", dest.display()))?;
        let file = self.backoff.retry("helm package", || self.package_once(src, dest)).await?;
        info!(src = %src.display(), file = %file, "helm: packaged");
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_archive_name() {
        let out = "Successfully packaged chart and saved it to: /tmp/charts/firefox-1.0.3.tgz\n";
        assert_eq!(parse_package_output(out).as_deref(), Some("firefox-1.0.3.tgz"));
        assert_eq!(parse_package_output("Error: chart.yaml missing"), None);
    }
}
