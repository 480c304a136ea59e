//! Package fetching.
//!
//! Skills are git repositories addressed as `owner/repo`. Installing clones
//! the repository into the skills root; installing again pulls the latest
//! commit instead.

use async_trait::async_trait;
use skill_core::NormalizedPackage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid package identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("git {action} failed: {message}")]
    CommandFailed {
        action: &'static str,
        message: String,
    },
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;

/// Fetches skill packages onto local disk.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Derive the process name and canonical path for an identifier.
    fn normalize(&self, identifier: &str) -> Result<NormalizedPackage>;

    /// Materialize the latest version of `identifier` under
    /// `destination_root`, returning the package directory.
    async fn install(&self, identifier: &str, destination_root: &Path) -> Result<PathBuf>;

    /// Bring an already installed package up to date.
    async fn update(&self, local_path: &Path) -> Result<()>;
}

/// Normalize a package identifier.
///
/// Accepts `owner/repo`, bare `repo`, `https://host/owner/repo(.git)` and
/// `git@host:owner/repo.git`. The name is the path segments joined with `-`,
/// lowercased, with anything outside `[a-z0-9._-]` replaced by `-`.
pub fn normalize_identifier(identifier: &str) -> Result<NormalizedPackage> {
    let invalid = || PackageError::InvalidIdentifier(identifier.to_string());
    let trimmed = identifier.trim();

    let path = if let Some(rest) = trimmed.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p).ok_or_else(invalid)?
    } else if let Some((_, rest)) = trimmed.split_once("://") {
        rest.split_once('/').map(|(_, p)| p).ok_or_else(invalid)?
    } else {
        trimmed
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty()
        || segments.len() > 2
        || segments.iter().any(|s| *s == "." || *s == "..")
    {
        return Err(invalid());
    }

    let name: String = segments
        .join("-")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    Ok(NormalizedPackage {
        name,
        canonical_path: segments.join("/"),
    })
}

/// Installs packages with the `git` command line.
#[derive(Debug, Clone)]
pub struct GitInstaller {
    git_bin: PathBuf,
    git_host: String,
}

impl GitInstaller {
    pub fn new(git_host: impl Into<String>) -> Self {
        Self {
            git_bin: PathBuf::from("git"),
            git_host: git_host.into(),
        }
    }

    /// Use a different git executable.
    pub fn with_git_bin(mut self, git_bin: impl Into<PathBuf>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    /// Remote URL for an identifier. Full URLs are used as given.
    pub fn remote_url(&self, identifier: &str, package: &NormalizedPackage) -> String {
        let trimmed = identifier.trim();
        if trimmed.contains("://") || trimmed.starts_with("git@") {
            trimmed.to_string()
        } else {
            format!("{}/{}.git", self.git_host, package.canonical_path)
        }
    }

    async fn run_git(&self, action: &'static str, args: &[&str], cwd: &Path) -> Result<()> {
        debug!(action, ?args, cwd = %cwd.display(), "running git");
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(PackageError::CommandFailed {
            action,
            message: if stderr.is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr
            },
        })
    }
}

#[async_trait]
impl PackageInstaller for GitInstaller {
    fn normalize(&self, identifier: &str) -> Result<NormalizedPackage> {
        normalize_identifier(identifier)
    }

    async fn install(&self, identifier: &str, destination_root: &Path) -> Result<PathBuf> {
        let package = self.normalize(identifier)?;
        tokio::fs::create_dir_all(destination_root).await?;
        let target = destination_root.join(&package.name);

        if target.exists() {
            info!(package = %identifier, path = %target.display(), "package present, updating");
            self.update(&target).await?;
            return Ok(target);
        }

        let url = self.remote_url(identifier, &package);
        info!(package = %identifier, %url, "cloning package");
        // git runs inside the root, so the clone target is relative to it.
        self.run_git(
            "clone",
            &["clone", "--depth", "1", &url, &package.name],
            destination_root,
        )
        .await?;

        Ok(target)
    }

    async fn update(&self, local_path: &Path) -> Result<()> {
        self.run_git("pull", &["pull", "--ff-only"], local_path).await
    }
}
