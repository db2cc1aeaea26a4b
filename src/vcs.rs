//! VCS port and its git2-backed implementation. The checkpoint manager talks
//! only to `VcsOps`, so checkpoint and rollback logic can be exercised against
//! fakes without a real repository.

use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, ResetType, Signature, StatusOptions};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Mixed,
    Hard,
}

/// Core version-control operations the checkpoint manager needs.
pub trait VcsOps: Send {
    /// Whether the working tree is under version control at all.
    fn is_repository(&self) -> bool;

    /// Any uncommitted (staged, unstaged, or untracked) changes present.
    fn has_local_changes(&self) -> Result<bool>;

    /// Porcelain-style status lines, one per dirty path.
    fn status_porcelain(&self) -> Result<Vec<String>>;

    /// Stage everything and commit; returns the new commit id.
    fn commit_all(&self, message: &str) -> Result<String>;

    fn head_commit(&self) -> Result<String>;

    fn current_branch(&self) -> Result<String>;

    /// Create a lightweight tag pointing at `commit`.
    fn create_tag(&self, name: &str, commit: &str) -> Result<()>;

    fn delete_tag(&self, name: &str) -> Result<()>;

    /// Reset the working tree to `commit`.
    fn reset_to(&self, commit: &str, mode: ResetMode) -> Result<()>;
}

/// git2 implementation.
pub struct Git2Vcs {
    repo: Repository,
}

impl Git2Vcs {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path).context("failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Walk upward from `path` to find the enclosing repository.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path).context("no git repository found")?;
        Ok(Self { repo })
    }

    fn signature(&self) -> Result<Signature<'_>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Signature::now("pitcrew", "noreply@pitcrew.dev")
                .context("failed to create fallback signature"),
        }
    }

    fn dirty_statuses(&self) -> Result<git2::Statuses<'_>> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        self.repo
            .statuses(Some(&mut options))
            .context("failed to read repository status")
    }
}

impl VcsOps for Git2Vcs {
    fn is_repository(&self) -> bool {
        true
    }

    fn has_local_changes(&self) -> Result<bool> {
        Ok(!self.dirty_statuses()?.is_empty())
    }

    fn status_porcelain(&self) -> Result<Vec<String>> {
        let statuses = self.dirty_statuses()?;
        let mut lines = Vec::new();
        for entry in statuses.iter() {
            if let Some(path) = entry.path() {
                let status = entry.status();
                let marker = if status.contains(git2::Status::WT_NEW) {
                    "??"
                } else if status.contains(git2::Status::INDEX_NEW) {
                    "A "
                } else if status.contains(git2::Status::WT_DELETED)
                    || status.contains(git2::Status::INDEX_DELETED)
                {
                    " D"
                } else {
                    " M"
                };
                lines.push(format!("{marker} {path}"));
            }
        }
        Ok(lines)
    }

    fn commit_all(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index().context("failed to read index")?;
        index
            .add_all(["*"], IndexAddOption::DEFAULT, None)
            .context("failed to stage changes")?;
        index.write().context("failed to write index")?;

        let tree_id = index.write_tree().context("failed to write tree")?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .context("failed to commit staged changes")?;
        Ok(oid.to_string())
    }

    fn head_commit(&self) -> Result<String> {
        let commit = self
            .repo
            .head()
            .context("repository has no HEAD")?
            .peel_to_commit()
            .context("HEAD does not point at a commit")?;
        Ok(commit.id().to_string())
    }

    fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().context("repository has no HEAD")?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    fn create_tag(&self, name: &str, commit: &str) -> Result<()> {
        let object = self
            .repo
            .revparse_single(commit)
            .with_context(|| format!("commit '{commit}' not found"))?;
        self.repo
            .tag_lightweight(name, &object, false)
            .with_context(|| format!("failed to create tag '{name}'"))?;
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.repo
            .tag_delete(name)
            .with_context(|| format!("failed to delete tag '{name}'"))
    }

    fn reset_to(&self, commit: &str, mode: ResetMode) -> Result<()> {
        let object = self
            .repo
            .revparse_single(commit)
            .with_context(|| format!("commit '{commit}' not found"))?;
        let reset_type = match mode {
            ResetMode::Mixed => ResetType::Mixed,
            ResetMode::Hard => ResetType::Hard,
        };
        self.repo
            .reset(&object, reset_type, None)
            .with_context(|| format!("failed to reset to '{commit}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, Git2Vcs) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let signature = Signature::now("Test", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
            .unwrap();
        drop(tree);
        drop(repo);
        let vcs = Git2Vcs::open(dir.path()).unwrap();
        (dir, vcs)
    }

    #[test]
    fn clean_tree_has_no_local_changes() {
        let (_dir, vcs) = init_repo();
        assert!(!vcs.has_local_changes().unwrap());
        assert!(vcs.status_porcelain().unwrap().is_empty());
    }

    #[test]
    fn new_file_is_detected_and_committable() {
        let (dir, vcs) = init_repo();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        assert!(vcs.has_local_changes().unwrap());

        let commit = vcs.commit_all("add notes").unwrap();
        assert_eq!(commit, vcs.head_commit().unwrap());
        assert!(!vcs.has_local_changes().unwrap());
    }

    #[test]
    fn tag_and_hard_reset_round_trip() {
        let (dir, vcs) = init_repo();
        let before = vcs.head_commit().unwrap();
        vcs.create_tag("safe-point", &before).unwrap();

        fs::write(dir.path().join("scratch.txt"), "wip").unwrap();
        vcs.commit_all("wip").unwrap();
        assert_ne!(vcs.head_commit().unwrap(), before);

        vcs.reset_to("safe-point", ResetMode::Hard).unwrap();
        assert_eq!(vcs.head_commit().unwrap(), before);
    }
}
