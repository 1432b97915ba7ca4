//! Identity of the repository being pushed to.

use std::path::Path;
use tracing::{debug, warn};

use crate::config::MetaSettings;
use crate::error::Result;
use crate::git::GitRunner;

const UNKNOWN: &str = "unknown";

/// Resolved once per run and shared by every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    /// One `%s`, replaced by the commit id.
    pub commit_url: Option<String>,
    /// Two `%s`, replaced by the before and after ids.
    pub compare_url: Option<String>,
    pub owner_name: String,
    pub owner_email: String,
}

impl RepositoryMetadata {
    /// Assembles metadata, deriving URL templates from `url` where not
    /// configured explicitly.
    pub fn new(
        name: String,
        description: String,
        meta: &MetaSettings,
        owner_name: String,
        owner_email: String,
    ) -> Self {
        let url = meta.url.clone();
        let commit_url = meta
            .commit_url
            .clone()
            .or_else(|| url.as_ref().map(|u| format!("{}/commit/%s", u)));
        let compare_url = meta
            .compare_url
            .clone()
            .or_else(|| url.as_ref().map(|u| format!("{}/compare/%s..%s", u)));
        Self {
            name,
            description,
            url,
            commit_url,
            compare_url,
            owner_name,
            owner_email,
        }
    }

    pub fn commit_url_for(&self, id: &str) -> Option<String> {
        self.commit_url
            .as_deref()
            .map(|template| fill_template(template, &[id]))
    }

    pub fn compare_url_for(&self, before: &str, after: &str) -> Option<String> {
        self.compare_url
            .as_deref()
            .map(|template| fill_template(template, &[before, after]))
    }

    /// Looks up everything git config did not provide.
    ///
    /// Description: `meta.description`, `gitweb.description`, then the
    /// repository's `description` file. Owner: `meta.owner*`, `gitweb.owner`,
    /// then the author of the earliest commit.
    pub async fn resolve<G: GitRunner>(git: &G, meta: &MetaSettings) -> Result<Self> {
        let git_dir = git.run(&["rev-parse", "--absolute-git-dir"]).await?;
        let git_dir = Path::new(git_dir.trim());
        let bare = git.run(&["rev-parse", "--is-bare-repository"]).await?.trim() == "true";
        let name = repository_name(git_dir, bare);

        let description = match meta.description.clone().or_else(|| meta.gitweb_description.clone()) {
            Some(description) => description,
            None => tokio::fs::read_to_string(git_dir.join("description"))
                .await
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
        };

        let owner_name = meta.owner_name.clone().or_else(|| meta.gitweb_owner.clone());
        let (owner_name, owner_email) = match (owner_name, meta.owner_email.clone()) {
            (Some(name), Some(email)) => (name, email),
            (name, email) => {
                let (first_name, first_email) = earliest_author(git).await;
                (name.unwrap_or(first_name), email.unwrap_or(first_email))
            }
        };

        debug!("Repository '{}' owned by {} <{}>", name, owner_name, owner_email);
        Ok(Self::new(name, description, meta, owner_name, owner_email))
    }
}

/// Bare repositories are named after the git dir (minus `.git`), others
/// after the working tree that contains `.git`.
pub fn repository_name(git_dir: &Path, bare: bool) -> String {
    let dir = if bare { Some(git_dir) } else { git_dir.parent() };
    let name = dir
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".git") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

async fn earliest_author<G: GitRunner>(git: &G) -> (String, String) {
    match git.run(&["log", "--reverse", "--format=%an%x00%ae"]).await {
        Ok(log) => log
            .lines()
            .next()
            .and_then(|line| line.split_once('\0'))
            .map(|(name, email)| (name.to_string(), email.to_string()))
            .unwrap_or_else(|| (UNKNOWN.to_string(), UNKNOWN.to_string())),
        Err(e) => {
            warn!("Could not read the earliest commit author: {}", e);
            (UNKNOWN.to_string(), UNKNOWN.to_string())
        }
    }
}

/// Substitutes each `%s` in order; extra placeholders are left as-is.
fn fill_template(template: &str, values: &[&str]) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;
    for value in values {
        match rest.find("%s") {
            Some(at) => {
                filled.push_str(&rest[..at]);
                filled.push_str(value);
                rest = &rest[at + 2..];
            }
            None => break,
        }
    }
    filled.push_str(rest);
    filled
}
