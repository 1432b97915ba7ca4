//! Commit extraction for a pushed revision range.
//!
//! Two git listings are parsed here:
//!
//! * `git rev-list --pretty=medium`: one block per commit, a `commit <id>`
//!   line, `Key: Value` headers, a blank line and the message indented by
//!   one level.
//! * `git diff-tree` raw records: `:<src_mode> <dst_mode> <src_hash>
//!   <dst_hash> <status>\t<path>[\t<path>]`, one per changed file.

use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{NotifyError, Result};
use crate::git::GitRunner;

const UNKNOWN: &str = "unknown";

static AUTHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"?(.*?)"? <(.*)>$"#).expect("invalid regex"));

static RAW_DIFF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^:(?P<src_mode>\d{6}) (?P<dst_mode>\d{6}) (?P<src_hash>[0-9a-f]+)\.* (?P<dst_hash>[0-9a-f]+)\.* (?P<status>[A-Z])(?P<score>\d*)\t(?P<path>[^\t]+)(?:\t(?P<new_path>[^\t]+))?$",
    )
    .expect("invalid regex")
});

/// True for git's all-zero object name, used for created and deleted refs.
pub fn is_null_revision(rev: &str) -> bool {
    !rev.is_empty() && rev.bytes().all(|b| b == b'0')
}

/// A commit as it appears in the push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    /// ISO-8601 with the original numeric offset, e.g. `2011-05-17T12:00:00-0700`.
    pub timestamp: String,
    pub message: String,
    /// Every header of the block, keys lower-cased (`author`, `date`, `merge`, ...).
    pub headers: BTreeMap<String, String>,
    pub changes: FileChanges,
}

/// Paths touched by a commit, each path in at most one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl FileChanges {
    fn contains(&self, path: &str) -> bool {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .any(|p| p == path)
    }

    fn insert(&mut self, bucket: Bucket, path: &str) {
        if self.contains(path) {
            return;
        }
        let list = match bucket {
            Bucket::Added => &mut self.added,
            Bucket::Removed => &mut self.removed,
            Bucket::Modified => &mut self.modified,
        };
        list.push(path.to_string());
    }

    /// Sorts one raw diff record into the buckets.
    ///
    /// Unmerged and unknown status codes are dropped: there is no safe way
    /// to say what happened to the file.
    pub fn apply(&mut self, record: &DiffRecord) {
        match (record.status, record.new_path.as_deref()) {
            (ChangeStatus::Added, _) => self.insert(Bucket::Added, &record.path),
            (ChangeStatus::Deleted, _) => self.insert(Bucket::Removed, &record.path),
            (ChangeStatus::Modified | ChangeStatus::TypeChanged, _) => {
                self.insert(Bucket::Modified, &record.path)
            }
            (ChangeStatus::Copied, Some(copy)) => self.insert(Bucket::Added, copy),
            (ChangeStatus::Renamed, Some(new_path)) => {
                self.insert(Bucket::Removed, &record.path);
                self.insert(Bucket::Added, new_path);
            }
            (ChangeStatus::Copied | ChangeStatus::Renamed, None) => {
                warn!("{:?} record for '{}' has no target path", record.status, record.path);
            }
            (ChangeStatus::Other(code), _) => {
                debug!("Ignoring status '{}' for '{}'", code, record.path);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Bucket {
    Added,
    Removed,
    Modified,
}

/// Status letter of a raw diff record; similarity scores are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Copied,
    Deleted,
    Modified,
    Renamed,
    TypeChanged,
    Other(char),
}

impl From<char> for ChangeStatus {
    fn from(code: char) -> Self {
        match code {
            'A' => ChangeStatus::Added,
            'C' => ChangeStatus::Copied,
            'D' => ChangeStatus::Deleted,
            'M' => ChangeStatus::Modified,
            'R' => ChangeStatus::Renamed,
            'T' => ChangeStatus::TypeChanged,
            other => ChangeStatus::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub src_mode: String,
    pub dst_mode: String,
    pub src_hash: String,
    pub dst_hash: String,
    pub status: ChangeStatus,
    pub path: String,
    pub new_path: Option<String>,
}

impl DiffRecord {
    /// Parses one raw diff line. Returns `None` for anything off-grammar.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = RAW_DIFF_RE.captures(line)?;
        let status = caps["status"].chars().next()?;
        Some(Self {
            src_mode: caps["src_mode"].to_string(),
            dst_mode: caps["dst_mode"].to_string(),
            src_hash: caps["src_hash"].to_string(),
            dst_hash: caps["dst_hash"].to_string(),
            status: ChangeStatus::from(status),
            path: caps["path"].to_string(),
            new_path: caps.name("new_path").map(|m| m.as_str().to_string()),
        })
    }
}

/// Classifies every raw diff record in a `git diff-tree` listing.
pub fn parse_raw_diff(output: &str) -> FileChanges {
    let mut changes = FileChanges::default();
    for line in output.lines().filter(|l| l.starts_with(':')) {
        match DiffRecord::parse(line) {
            Some(record) => changes.apply(&record),
            None => warn!("Skipping unrecognised diff record: {}", line),
        }
    }
    changes
}

/// Splits `Name <email>` (name optionally quoted) into its parts.
pub fn split_author(author: &str) -> (String, String) {
    match AUTHOR_RE.captures(author.trim()) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    }
}

/// Converts git's medium date (`Tue May 17 12:00:00 2011 -0700`) to
/// `2011-05-17T12:00:00-0700`. The offset is carried over verbatim.
pub fn iso_timestamp(date: &str) -> Result<String> {
    let date = date.trim();
    let invalid = || NotifyError::Parse(format!("unrecognised commit date '{}'", date));

    let split = date.len().checked_sub(6).ok_or_else(invalid)?;
    if !date.is_char_boundary(split) || !date.is_char_boundary(split + 1) {
        return Err(invalid());
    }
    let (base, offset) = (&date[..split], &date[split + 1..]);
    let parsed =
        NaiveDateTime::parse_from_str(base.trim(), "%a %b %d %H:%M:%S %Y").map_err(|_| invalid())?;
    Ok(format!("{}{}", parsed.format("%Y-%m-%dT%H:%M:%S"), offset))
}

/// Strips exactly one pretty-printer indentation level.
fn strip_indent(line: &str) -> &str {
    line.strip_prefix('\t')
        .or_else(|| line.strip_prefix("    "))
        .unwrap_or(line)
}

#[derive(Debug)]
struct Block {
    id: String,
    headers: BTreeMap<String, String>,
    message: Vec<String>,
    in_message: bool,
}

impl Block {
    fn finish(mut self) -> Result<Commit> {
        while self.message.last().is_some_and(|l| l.is_empty()) {
            self.message.pop();
        }

        let (author_name, author_email) = match self.headers.get("author") {
            Some(author) => split_author(author),
            None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        };
        let date = self.headers.get("date").ok_or_else(|| {
            NotifyError::Parse(format!("commit {} has no Date header", self.id))
        })?;
        let timestamp = iso_timestamp(date)?;

        Ok(Commit {
            id: self.id,
            author_name,
            author_email,
            timestamp,
            message: self.message.join("\n"),
            headers: self.headers,
            changes: FileChanges::default(),
        })
    }
}

/// Parses `git rev-list --pretty=medium` output into commits, in listing order.
///
/// File changes are left empty; see [`RevisionRangeParser`] for those.
pub fn parse_rev_list(output: &str) -> Result<Vec<Commit>> {
    let mut commits = Vec::new();
    let mut current: Option<Block> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("commit ") {
            if let Some(block) = current.take() {
                commits.push(block.finish()?);
            }
            let id = rest.split_whitespace().next().unwrap_or_default();
            if id.is_empty() {
                return Err(NotifyError::Parse("commit line without an id".to_string()));
            }
            current = Some(Block {
                id: id.to_string(),
                headers: BTreeMap::new(),
                message: Vec::new(),
                in_message: false,
            });
            continue;
        }

        let block = current.as_mut().ok_or_else(|| {
            NotifyError::Parse(format!("expected a commit line, found '{}'", line))
        })?;

        if block.in_message {
            if line.is_empty() || line.starts_with('\t') || line.starts_with("    ") {
                block.message.push(strip_indent(line).to_string());
            } else {
                return Err(NotifyError::Parse(format!(
                    "unindented line in message of commit {}: '{}'",
                    block.id, line
                )));
            }
        } else if line.is_empty() {
            block.in_message = true;
        } else {
            let (key, value) = line.split_once(": ").ok_or_else(|| {
                NotifyError::Parse(format!("malformed header in commit {}: '{}'", block.id, line))
            })?;
            block
                .headers
                .insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    if let Some(block) = current {
        commits.push(block.finish()?);
    }
    Ok(commits)
}

/// Turns an `old..new` push into structured commits.
pub struct RevisionRangeParser<'a, G> {
    git: &'a G,
}

impl<'a, G: GitRunner> RevisionRangeParser<'a, G> {
    pub fn new(git: &'a G) -> Self {
        Self { git }
    }

    /// Revision arguments selecting the pushed commits, or `None` when the
    /// ref was deleted and nothing was pushed.
    fn range(old: &str, new: &str) -> Option<String> {
        if is_null_revision(new) {
            None
        } else if is_null_revision(old) {
            // New ref: nothing reachable yet, so the whole history of `new`
            // counts, as if diffed against the empty tree.
            Some(new.to_string())
        } else {
            Some(format!("{}..{}", old, new))
        }
    }

    /// Commits in the range, oldest first.
    pub async fn extract(&self, old: &str, new: &str) -> Result<Vec<Commit>> {
        let Some(range) = Self::range(old, new) else {
            return Ok(Vec::new());
        };
        let listing = self
            .git
            .run(&["rev-list", "--pretty=medium", "--reverse", &range])
            .await?;
        self.with_changes(parse_rev_list(&listing)?).await
    }

    /// The most recent commit of the range, if any.
    pub async fn head_commit(&self, old: &str, new: &str) -> Result<Option<Commit>> {
        let Some(range) = Self::range(old, new) else {
            return Ok(None);
        };
        let listing = self
            .git
            .run(&["rev-list", "--pretty=medium", "--max-count=1", &range])
            .await?;
        let mut commits = self.with_changes(parse_rev_list(&listing)?).await?;
        Ok(commits.pop())
    }

    async fn with_changes(&self, mut commits: Vec<Commit>) -> Result<Vec<Commit>> {
        for commit in &mut commits {
            let raw = self
                .git
                .run(&[
                    "diff-tree",
                    "-r",
                    "-M",
                    "-C",
                    "--root",
                    "--no-commit-id",
                    "--no-abbrev",
                    &commit.id,
                ])
                .await?;
            commit.changes = parse_raw_diff(&raw);
        }
        debug!("Parsed {} commits", commits.len());
        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::ScriptedGit;

    const TWO_COMMITS: &str = "commit 1111111111111111111111111111111111111111
Author: Jane Doe <jane@example.com>
Date:   Tue May 17 12:00:00 2011 -0700

    Add the parser

    It reads rev-list output.

commit 2222222222222222222222222222222222222222
Merge: 1111111 3333333
Author: \"John Q\" <john@example.com>
Date:   Wed Jun 1 09:05:03 2011 +0200

    Merge branch 'topic'
";

    #[test]
    fn parses_blocks_in_listing_order() {
        let commits = parse_rev_list(TWO_COMMITS).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].id, "1111111111111111111111111111111111111111");
        assert_eq!(commits[1].id, "2222222222222222222222222222222222222222");
    }

    #[test]
    fn strips_one_indentation_level_from_message() {
        let commits = parse_rev_list(TWO_COMMITS).unwrap();
        assert_eq!(commits[0].message, "Add the parser\n\nIt reads rev-list output.");
        assert_eq!(commits[1].message, "Merge branch 'topic'");

        let nested = "commit abc\nAuthor: A <a@b>\nDate:   Tue May 17 12:00:00 2011 -0700\n\n        indented code\n";
        let commits = parse_rev_list(nested).unwrap();
        assert_eq!(commits[0].message, "    indented code");
    }

    #[test]
    fn keeps_unrecognised_headers_lowercased() {
        let commits = parse_rev_list(TWO_COMMITS).unwrap();
        assert_eq!(
            commits[1].headers.get("merge").map(String::as_str),
            Some("1111111 3333333")
        );
        assert!(commits[0].headers.contains_key("author"));
    }

    #[test]
    fn splits_quoted_and_plain_authors() {
        let commits = parse_rev_list(TWO_COMMITS).unwrap();
        assert_eq!(commits[0].author_name, "Jane Doe");
        assert_eq!(commits[0].author_email, "jane@example.com");
        assert_eq!(commits[1].author_name, "John Q");
        assert_eq!(commits[1].author_email, "john@example.com");
    }

    #[test]
    fn unparseable_author_becomes_unknown() {
        assert_eq!(
            split_author("no email here"),
            ("unknown".to_string(), "unknown".to_string())
        );
    }

    #[test]
    fn converts_medium_date_keeping_offset() {
        assert_eq!(
            iso_timestamp("Tue May 17 12:00:00 2011 -0700").unwrap(),
            "2011-05-17T12:00:00-0700"
        );
        assert_eq!(
            iso_timestamp("Wed Jun 1 09:05:03 2011 +0200").unwrap(),
            "2011-06-01T09:05:03+0200"
        );
        assert!(iso_timestamp("yesterday").is_err());
    }

    #[test]
    fn header_without_separator_is_fatal() {
        let bad = "commit abc\nAuthor Jane <jane@example.com>\n\n    msg\n";
        assert!(matches!(parse_rev_list(bad), Err(NotifyError::Parse(_))));
    }

    #[test]
    fn text_before_first_commit_is_fatal() {
        assert!(parse_rev_list("garbage\n").is_err());
    }

    #[test]
    fn empty_listing_has_no_commits() {
        assert!(parse_rev_list("").unwrap().is_empty());
    }

    #[test]
    fn rename_goes_to_removed_and_added() {
        let line = ":100644 100644 aaaaaaa bbbbbbb R50\told.txt\tnew.txt";
        let changes = parse_raw_diff(line);
        assert_eq!(changes.removed, vec!["old.txt"]);
        assert_eq!(changes.added, vec!["new.txt"]);
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn classifies_each_status() {
        let raw = "\
:000000 100644 0000000000000000000000000000000000000000 1234567890123456789012345678901234567890 A\tadded.rs
:100644 100644 1234567890123456789012345678901234567890 1234567890123456789012345678901234567891 C75\tsrc.rs\tcopy.rs
:100644 000000 1234567890123456789012345678901234567890 0000000000000000000000000000000000000000 D\tgone.rs
:100644 100644 1234567890123456789012345678901234567890 abcdefabcdefabcdefabcdefabcdefabcdefabcd M\tchanged.rs
:100644 120000 1234567890123456789012345678901234567890 abcdefabcdefabcdefabcdefabcdefabcdefabcd T\tlink
:100644 100644 1234567890123456789012345678901234567890 abcdefabcdefabcdefabcdefabcdefabcdefabcd U\tconflicted.rs
:100644 100644 1234567890123456789012345678901234567890 abcdefabcdefabcdefabcdefabcdefabcdefabcd X\tmystery.rs
";
        let changes = parse_raw_diff(raw);
        assert_eq!(changes.added, vec!["added.rs", "copy.rs"]);
        assert_eq!(changes.removed, vec!["gone.rs"]);
        assert_eq!(changes.modified, vec!["changed.rs", "link"]);
    }

    #[test]
    fn path_lands_in_one_bucket_only() {
        let raw = "\
:100644 100644 aaaaaaa bbbbbbb M\tshared.rs
:100644 100644 aaaaaaa bbbbbbb R90\tshared.rs\tmoved.rs
";
        let changes = parse_raw_diff(raw);
        assert_eq!(changes.modified, vec!["shared.rs"]);
        assert!(changes.removed.is_empty());
        assert_eq!(changes.added, vec!["moved.rs"]);
    }

    #[test]
    fn parses_abbreviated_hashes_and_spaces_in_paths() {
        let record = DiffRecord::parse(":100644 100644 abc1234... def5678... M\tdir/with space.txt").unwrap();
        assert_eq!(record.status, ChangeStatus::Modified);
        assert_eq!(record.path, "dir/with space.txt");
        assert_eq!(record.new_path, None);
    }

    #[test]
    fn detects_null_revisions() {
        assert!(is_null_revision("0000000000000000000000000000000000000000"));
        assert!(!is_null_revision("0000000000000000000000000000000000000001"));
        assert!(!is_null_revision(""));
    }

    const ROOT_COMMIT: &str = "commit cccccccccccccccccccccccccccccccccccccccc
Author: Root <root@example.com>
Date:   Mon Jan 3 00:00:00 2011 +0000

    Initial commit
";

    #[tokio::test]
    async fn root_push_lists_full_history() {
        let zero = "0000000000000000000000000000000000000000";
        let new = "cccccccccccccccccccccccccccccccccccccccc";
        let git = ScriptedGit::new()
            .with(&format!("rev-list --pretty=medium --reverse {}", new), ROOT_COMMIT)
            .with(
                &format!("diff-tree -r -M -C --root --no-commit-id --no-abbrev {}", new),
                ":000000 100644 0000000 1234567 A\tREADME\n",
            );

        let commits = RevisionRangeParser::new(&git).extract(zero, new).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].id, new);
        assert_eq!(commits[0].changes.added, vec!["README"]);
    }

    #[tokio::test]
    async fn extract_uses_two_dot_range_oldest_first() {
        let git = ScriptedGit::new()
            .with("rev-list --pretty=medium --reverse aaa..bbb", TWO_COMMITS)
            .with(
                "diff-tree -r -M -C --root --no-commit-id --no-abbrev 1111111111111111111111111111111111111111",
                ":100644 100644 aaa bbb M\tsrc/lib.rs\n",
            )
            .with(
                "diff-tree -r -M -C --root --no-commit-id --no-abbrev 2222222222222222222222222222222222222222",
                "",
            );

        let commits = RevisionRangeParser::new(&git).extract("aaa", "bbb").await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].changes.modified, vec!["src/lib.rs"]);
        assert_eq!(commits[0].timestamp, "2011-05-17T12:00:00-0700");
        assert_eq!(git.calls().len(), 3);
    }

    #[tokio::test]
    async fn head_commit_asks_for_newest_only() {
        let git = ScriptedGit::new()
            .with("rev-list --pretty=medium --max-count=1 aaa..bbb", ROOT_COMMIT)
            .with(
                "diff-tree -r -M -C --root --no-commit-id --no-abbrev cccccccccccccccccccccccccccccccccccccccc",
                "",
            );

        let head = RevisionRangeParser::new(&git)
            .head_commit("aaa", "bbb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.message, "Initial commit");
    }

    #[tokio::test]
    async fn deleted_ref_runs_no_git_queries() {
        let git = ScriptedGit::new();
        let parser = RevisionRangeParser::new(&git);
        let zero = "0000000000000000000000000000000000000000";

        assert!(parser.extract("abc", zero).await.unwrap().is_empty());
        assert!(parser.head_commit("abc", zero).await.unwrap().is_none());
        assert!(git.calls().is_empty());
    }
}
