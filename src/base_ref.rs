//! Best-effort detection of the branch a pushed commit came from.
//!
//! Branch containment is not a function in a DAG with merges, so this is an
//! approximation: a commit reachable from several branches is attributed to
//! the checked-out branch, then `master`, then whichever git lists first.

use tracing::debug;

use crate::error::Result;
use crate::git::GitRunner;

const CURRENT_MARKER: &str = "* ";
/// Checked out in another linked worktree.
const WORKTREE_MARKER: &str = "+ ";
const PREFERRED_BRANCH: &str = "master";

/// Picks a base branch name out of `git branch --contains` output.
pub fn pick_base_branch(listing: &str) -> Option<String> {
    let mut branches = Vec::new();
    let mut current = None;

    for line in listing.lines() {
        let (is_current, name) = match line.strip_prefix(CURRENT_MARKER) {
            Some(name) => (true, name.trim()),
            None => {
                let line = line.strip_prefix(WORKTREE_MARKER).unwrap_or(line);
                (false, line.trim())
            }
        };
        // "(HEAD detached at 1234abc)" is not a branch
        if name.is_empty() || name.starts_with('(') {
            continue;
        }
        if is_current {
            current = Some(name.to_string());
        }
        branches.push(name.to_string());
    }

    if branches.len() > 1 {
        if current.is_some() {
            return current;
        }
        if branches.iter().any(|b| b == PREFERRED_BRANCH) {
            return Some(PREFERRED_BRANCH.to_string());
        }
    }
    branches.into_iter().next()
}

/// Returns `refs/heads/<branch>` for the branch `commit` most likely came
/// from, or `None` when that is the ref being pushed or nothing contains it.
pub async fn resolve_base_ref<G: GitRunner>(
    git: &G,
    commit: &str,
    pushed_ref: &str,
) -> Result<Option<String>> {
    let listing = git.run(&["branch", "--contains", commit]).await?;
    let base_ref = pick_base_branch(&listing).map(|branch| format!("refs/heads/{}", branch));
    debug!("Base ref for {}: {:?}", commit, base_ref);
    Ok(base_ref.filter(|base| base != pushed_ref))
}
