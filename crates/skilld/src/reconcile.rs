//! Skill directory reconciliation.
//!
//! Merges the bundled core skills directory with the user skills directory.
//! Each immediate subdirectory is one skill; a user skill replaces a core
//! skill with the same name.

use skill_core::{SkillDescriptor, SkillOrigin};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("skills directory unavailable: {path}: {reason}")]
    DirectoryUnavailable { path: PathBuf, reason: String },
}

/// Reconciled skills plus the roots that could not be listed.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub skills: Vec<SkillDescriptor>,
    pub errors: Vec<ReconcileError>,
}

/// List the skill directories directly under `root`.
///
/// Sorted by name. Non-directory entries and dot-entries are skipped. Symlinks to
/// directories count as skills.
pub async fn list_skills(
    root: &Path,
    origin: SkillOrigin,
) -> Result<Vec<SkillDescriptor>, ReconcileError> {
    let unavailable = |e: std::io::Error| ReconcileError::DirectoryUnavailable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };

    let mut entries = tokio::fs::read_dir(root).await.map_err(unavailable)?;
    let mut skills = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        let path = entry.path();

        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!(path = %path.display(), "not a directory, skipping");
            continue;
        }

        if let Some(skill) = SkillDescriptor::from_dir(&path, origin) {
            skills.push(skill);
        }
    }

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(skills)
}

/// Merge core and user skills, user winning on name collisions.
///
/// A root that cannot be listed is reported in `errors`; the other root is
/// still processed.
pub async fn reconcile(core_dir: &Path, user_dir: &Path) -> Reconciliation {
    let mut result = Reconciliation::default();

    let user = match list_skills(user_dir, SkillOrigin::User).await {
        Ok(skills) => skills,
        Err(e) => {
            result.errors.push(e);
            Vec::new()
        }
    };
    let user_names: HashSet<&str> = user.iter().map(|s| s.name.as_str()).collect();

    match list_skills(core_dir, SkillOrigin::Core).await {
        Ok(core) => {
            for skill in core {
                if user_names.contains(skill.name.as_str()) {
                    debug!(name = %skill.name, "user skill overrides core skill");
                    continue;
                }
                result.skills.push(skill);
            }
        }
        Err(e) => result.errors.push(e),
    }

    result.skills.extend(user);

    debug!(
        count = result.skills.len(),
        errors = result.errors.len(),
        "reconciled skills"
    );

    result
}
