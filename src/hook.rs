//! The post-receive loop: one ref update per input line, handled to the end
//! (parse, build, deliver) before the next line is read.

use std::io::Write;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::base_ref::resolve_base_ref;
use crate::config::Config;
use crate::delivery::{DeliveryReport, DeliveryTarget, Dispatcher};
use crate::error::{NotifyError, Result};
use crate::git::GitRunner;
use crate::payload::{PayloadBuilder, PushEvent};
use crate::repository::RepositoryMetadata;
use crate::revisions::{RevisionRangeParser, is_null_revision};

/// `<old> <new> <ref>` as git feeds it to post-receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: String,
    pub new: String,
    pub ref_name: String,
}

impl FromStr for RefUpdate {
    type Err = NotifyError;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [old, new, ref_name] => Ok(Self {
                old: old.to_string(),
                new: new.to_string(),
                ref_name: ref_name.to_string(),
            }),
            _ => Err(NotifyError::Input(format!(
                "expected '<old> <new> <ref>', got '{}'",
                line
            ))),
        }
    }
}

/// What happened to one ref update.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub event: PushEvent,
    /// `None` when no destination is configured and the document was printed.
    pub delivery: Option<DeliveryReport>,
}

/// Everything resolved once per run.
pub struct Notifier<'a, G> {
    git: &'a G,
    config: &'a Config,
    metadata: RepositoryMetadata,
    targets: Vec<DeliveryTarget>,
    dispatcher: Dispatcher,
}

impl<'a, G: GitRunner> Notifier<'a, G> {
    pub async fn new(git: &'a G, config: &'a Config) -> Result<Self> {
        let metadata = RepositoryMetadata::resolve(git, &config.meta).await?;
        Self::with_metadata(git, config, metadata)
    }

    pub fn with_metadata(
        git: &'a G,
        config: &'a Config,
        metadata: RepositoryMetadata,
    ) -> Result<Self> {
        Ok(Self {
            git,
            config,
            metadata,
            targets: config.delivery.targets(),
            dispatcher: Dispatcher::new()?,
        })
    }

    pub async fn build_event(&self, update: &RefUpdate) -> Result<PushEvent> {
        let parser = RevisionRangeParser::new(self.git);
        let commits = parser.extract(&update.old, &update.new).await?;
        let head_commit = parser.head_commit(&update.old, &update.new).await?;
        let base_ref = if is_null_revision(&update.new) {
            None
        } else {
            resolve_base_ref(self.git, &update.new, &update.ref_name).await?
        };

        Ok(PayloadBuilder::new(&self.metadata).build(
            &update.old,
            &update.new,
            &update.ref_name,
            &commits,
            head_commit.as_ref(),
            base_ref,
        ))
    }

    /// Builds and sends (or prints) the event for one update.
    pub async fn notify<W: Write>(
        &self,
        update: &RefUpdate,
        out: &mut W,
    ) -> Result<UpdateOutcome> {
        let event = self.build_event(update).await?;
        let document = event.to_document()?;
        info!(
            "{} {}..{}: {} commit(s)",
            update.ref_name, update.old, update.new, event.size
        );

        let has_destinations = self.config.delivery.has_destinations();
        if !has_destinations || self.config.delivery.debug {
            writeln!(out, "{}", document)?;
        }
        let delivery = if !has_destinations {
            debug!("No webhook configured, printed the payload instead");
            None
        } else {
            Some(self.dispatcher.dispatch(&self.targets, &document).await)
        };

        Ok(UpdateOutcome { event, delivery })
    }

    /// Processes every line of `input` in order. A parse failure stops the
    /// run; delivery failures do not.
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> Result<Vec<UpdateOutcome>>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut outcomes = Vec::new();
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let update: RefUpdate = line.parse()?;
            outcomes.push(self.notify(&update, out).await?);
        }
        Ok(outcomes)
    }
}
