//! Archive creation for bundles
//!
//! The archive format belongs to an external tool; the bundle builder only
//! names the members and where the result goes.

use crate::error::{ReposerveError, ReposerveResult};
use crate::process::CommandRunner;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// A zip file with no entries: just the end-of-central-directory record
pub const EMPTY_ZIP: [u8; 22] = [
    0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Builds an archive from files relative to a working directory
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Write an archive of `members` (relative to `cwd`) to `output`
    async fn create(&self, cwd: &Path, output: &Path, members: &[String]) -> ReposerveResult<()>;
}

/// Archiver backed by the `zip` executable
pub struct ZipArchiver {
    zip: String,
    runner: CommandRunner,
}

impl ZipArchiver {
    pub fn new(zip: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            zip: zip.into(),
            runner,
        }
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn create(&self, cwd: &Path, output: &Path, members: &[String]) -> ReposerveResult<()> {
        if members.is_empty() {
            debug!("Writing empty archive {}", output.display());
            return tokio::fs::write(output, EMPTY_ZIP)
                .await
                .map_err(|e| ReposerveError::io(format!("writing {}", output.display()), e));
        }

        let mut args: Vec<String> = vec!["-q".into(), "-X".into()];
        args.push(output.to_string_lossy().into_owned());
        // zip reads a bare "-" as stdin and "-x" as an option
        args.extend(members.iter().map(|m| {
            if m.starts_with('-') {
                format!("./{}", m)
            } else {
                m.clone()
            }
        }));

        let result = self.runner.run(&self.zip, &args, cwd).await?;
        if result.success {
            Ok(())
        } else {
            Err(ReposerveError::Archive(format!(
                "{} exited with {:?}: {}",
                self.zip,
                result.code,
                result.diagnostics()
            )))
        }
    }
}
