//! Replays a dump script against a structured store.
//!
//! Replay is best-effort: a failing statement is recorded as a
//! [`ReplayError`] and the next statement runs anyway. Nothing is wrapped
//! in a transaction and nothing is rolled back.

use crate::error::{Error, Result};
use crate::progress::{percent_of, Checkpoint, NoCheckpoint};
use crate::rewrite::UrlRewriter;
use crate::store::StructuredStore;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Cursor};
use tracing::{debug, warn};

/// Default number of replay errors kept in a summary.
pub const DEFAULT_MAX_RECORDED_ERRORS: usize = 50;

/// Statements between progress checkpoints within one table.
pub const CHECKPOINT_EVERY: u64 = 500;

const PREVIEW_CHARS: usize = 120;

/// A statement that failed during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayError {
    /// 1-based position of the statement in the script
    pub index: u64,

    /// Start of the statement text
    pub statement: String,

    /// Driver message
    pub message: String,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub executed: u64,
    pub failed: u64,

    /// The first failures, capped at the loader's limit
    pub errors: Vec<ReplayError>,
}

/// Lines that begin a fresh statement in a dump script.
const STATEMENT_HEADS: &[&str] = &[
    "INSERT INTO ",
    "REPLACE INTO ",
    "DROP TABLE ",
    "DROP INDEX ",
    "DROP TRIGGER ",
    "DROP VIEW ",
    "CREATE TABLE ",
    "CREATE INDEX ",
    "CREATE UNIQUE INDEX ",
    "CREATE TRIGGER ",
    "CREATE VIEW ",
];

/// Splits a script into statements.
///
/// A statement ends at a line whose last non-blank character is `;`,
/// provided no single- or double-quoted region is open at that point.
/// Lines starting with `--` between statements are skipped. Quotes are
/// escaped by doubling, so `''` never changes the quoting state.
///
/// A quote left open by a malformed statement is closed off when a line
/// ending in `;` is followed by a line starting with one of the
/// [`STATEMENT_HEADS`]. The malformed statement is returned on its own
/// and splitting resumes at that line.
pub struct StatementReader<R> {
    reader: R,
    pending: Option<String>,
    consumed: u64,
}

impl<R: BufRead> StatementReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: None,
            consumed: 0,
        }
    }

    /// Bytes read from the underlying reader so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        self.consumed += n as u64;
        Ok(Some(line))
    }

    /// Next statement without its terminating `;`, or `None` at the end.
    ///
    /// An unterminated trailing statement is still returned.
    pub fn next_statement(&mut self) -> io::Result<Option<String>> {
        let mut statement = String::new();
        let mut in_single = false;
        let mut in_double = false;
        let mut after_terminator = false;

        while let Some(line) = self.next_line()? {
            if statement.is_empty() {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with("--") {
                    continue;
                }
            } else if after_terminator && starts_statement(&line) {
                // Runaway quote from the previous statement
                self.pending = Some(line);
                return Ok(Some(finish(statement)));
            }

            for c in line.chars() {
                match c {
                    '\'' if !in_double => in_single = !in_single,
                    '"' if !in_single => in_double = !in_double,
                    _ => {}
                }
            }
            statement.push_str(&line);

            after_terminator = line.trim_end().ends_with(';');
            if after_terminator && !in_single && !in_double {
                return Ok(Some(finish(statement)));
            }
        }

        let statement = finish(statement);
        Ok((!statement.is_empty()).then_some(statement))
    }
}

fn starts_statement(line: &str) -> bool {
    STATEMENT_HEADS.iter().any(|head| line.starts_with(head))
}

fn finish(statement: String) -> String {
    let trimmed = statement.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end().to_string()
}

impl<R: BufRead> Iterator for StatementReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_statement().transpose()
    }
}

/// Splits an in-memory script into statements.
pub fn split_statements(script: &str) -> Vec<String> {
    StatementReader::new(Cursor::new(script.as_bytes()))
        .filter_map(|s| s.ok())
        .collect()
}

/// Replays scripts statement by statement.
#[derive(Debug, Clone)]
pub struct Loader {
    rewriter: Option<UrlRewriter>,
    max_recorded_errors: usize,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            rewriter: None,
            max_recorded_errors: DEFAULT_MAX_RECORDED_ERRORS,
        }
    }

    /// Rewrites every statement before it is executed.
    pub fn with_rewriter(mut self, rewriter: UrlRewriter) -> Self {
        self.rewriter = (!rewriter.is_noop()).then_some(rewriter);
        self
    }

    pub fn with_max_recorded_errors(mut self, max: usize) -> Self {
        self.max_recorded_errors = max;
        self
    }

    /// Replays an in-memory script.
    pub fn replay(&self, store: &mut dyn StructuredStore, script: &str) -> Result<ReplaySummary> {
        self.replay_reader(
            store,
            Cursor::new(script.as_bytes()),
            script.len() as u64,
            &mut NoCheckpoint,
        )
    }

    /// Replays a script streamed from `reader` of `total_bytes` bytes.
    ///
    /// Checkpoints are reported at every table boundary (`DROP TABLE`) and
    /// every [`CHECKPOINT_EVERY`] statements.
    pub fn replay_reader<R: BufRead>(
        &self,
        store: &mut dyn StructuredStore,
        reader: R,
        total_bytes: u64,
        checkpoint: &mut dyn Checkpoint,
    ) -> Result<ReplaySummary> {
        let mut statements = StatementReader::new(reader);
        let mut summary = ReplaySummary::default();
        let mut index = 0u64;
        let mut since_checkpoint = 0u64;

        while let Some(statement) = statements
            .next_statement()
            .map_err(|e| Error::io("Failed to read dump script", e))?
        {
            index += 1;
            since_checkpoint += 1;

            if let Some(table) = dropped_table(&statement) {
                checkpoint.reached(
                    percent_of(statements.consumed(), total_bytes),
                    &format!("Restoring table {}", table),
                )?;
                since_checkpoint = 0;
            } else if since_checkpoint >= CHECKPOINT_EVERY {
                checkpoint.reached(
                    percent_of(statements.consumed(), total_bytes),
                    &format!("Replayed {} statements", index),
                )?;
                since_checkpoint = 0;
            }

            let statement = match &self.rewriter {
                Some(rewriter) => rewriter.rewrite(&statement).into_owned(),
                None => statement,
            };

            match store.execute(&statement) {
                Ok(()) => summary.executed += 1,
                Err(e) => {
                    summary.failed += 1;
                    let preview = preview(&statement);
                    warn!("Statement {} failed: {} ({})", index, e, preview);
                    if summary.errors.len() < self.max_recorded_errors {
                        summary.errors.push(ReplayError {
                            index,
                            statement: preview,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        checkpoint.reached(
            100,
            &format!(
                "Replayed {} statements ({} failed)",
                summary.executed, summary.failed
            ),
        )?;
        debug!(
            "Replay finished: {} executed, {} failed",
            summary.executed, summary.failed
        );
        Ok(summary)
    }
}

/// Replays `script` with a default loader.
pub fn replay(store: &mut dyn StructuredStore, script: &str) -> Result<ReplaySummary> {
    Loader::new().replay(store, script)
}

fn dropped_table(statement: &str) -> Option<&str> {
    let head = statement.get(..20)?;
    if !head.eq_ignore_ascii_case("DROP TABLE IF EXISTS") {
        return None;
    }
    Some(statement[20..].trim())
}

fn preview(statement: &str) -> String {
    let mut preview: String = statement.chars().take(PREVIEW_CHARS).collect();
    if preview.len() < statement.len() {
        preview.push_str("...");
    }
    preview
}
