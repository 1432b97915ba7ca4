//! The push event document sent to webhooks.
//!
//! Field names follow GitHub's push payload. Absent values are skipped at
//! serialization time, at every level, so receivers never see `null`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::repository::RepositoryMetadata;
use crate::revisions::Commit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub name: String,
    pub description: String,
    pub owner: Person,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub id: String,
    pub author: Person,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub message: String,
    pub timestamp: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// One pushed ref update, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub before: String,
    pub after: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<String>,
    pub repository: RepositoryPayload,
    pub commits: Vec<CommitPayload>,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<CommitPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
}

impl PushEvent {
    /// Compact JSON, the form every destination receives.
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Turns parsed commits into push events for one repository. No I/O.
pub struct PayloadBuilder<'a> {
    metadata: &'a RepositoryMetadata,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(metadata: &'a RepositoryMetadata) -> Self {
        Self { metadata }
    }

    pub fn build(
        &self,
        before: &str,
        after: &str,
        ref_name: &str,
        commits: &[Commit],
        head_commit: Option<&Commit>,
        base_ref: Option<String>,
    ) -> PushEvent {
        let metadata = self.metadata;
        PushEvent {
            before: before.to_string(),
            after: after.to_string(),
            ref_name: ref_name.to_string(),
            compare: metadata.compare_url_for(before, after),
            repository: RepositoryPayload {
                url: metadata.url.clone(),
                name: metadata.name.clone(),
                description: metadata.description.clone(),
                owner: Person {
                    name: metadata.owner_name.clone(),
                    email: metadata.owner_email.clone(),
                },
            },
            commits: commits.iter().map(|c| self.commit(c)).collect(),
            size: commits.len(),
            head_commit: head_commit.map(|c| self.commit(c)),
            base_ref,
        }
    }

    fn commit(&self, commit: &Commit) -> CommitPayload {
        CommitPayload {
            id: commit.id.clone(),
            author: Person {
                name: commit.author_name.clone(),
                email: commit.author_email.clone(),
            },
            url: self.metadata.commit_url_for(&commit.id),
            message: commit.message.clone(),
            timestamp: commit.timestamp.clone(),
            added: commit.changes.added.clone(),
            removed: commit.changes.removed.clone(),
            modified: commit.changes.modified.clone(),
        }
    }
}
