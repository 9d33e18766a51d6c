//! `praxis ingest`: append raw events from a JSON-lines file to the queue.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::RawEvent;
use crate::domain::ports::EventQueue;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON-lines file of raw events; `-` reads stdin
    pub file: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct IngestOutput {
    pub enqueued: usize,
    pub first_seq: Option<i64>,
    pub last_seq: Option<i64>,
    /// Lines that could not be parsed, as `line: error`
    pub rejected: Vec<String>,
}

impl CommandOutput for IngestOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Enqueued {} event(s)", self.enqueued)];
        if let (Some(first), Some(last)) = (self.first_seq, self.last_seq) {
            lines.push(format!("Sequence range: {first}..={last}"));
        }
        if !self.rejected.is_empty() {
            lines.push(format!("\nSkipped {} malformed line(s):", self.rejected.len()));
            for r in &self.rejected {
                lines.push(format!("  {r}"));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: IngestArgs, json_mode: bool) -> Result<()> {
    let ctx = AppContext::load().await?;
    let result = if args.file.as_os_str() == "-" {
        ingest(ctx.queue.as_ref(), tokio::io::stdin()).await?
    } else {
        let file = tokio::fs::File::open(&args.file)
            .await
            .with_context(|| format!("Failed to open {}", args.file.display()))?;
        ingest(ctx.queue.as_ref(), file).await?
    };
    output(&result, json_mode);
    Ok(())
}

/// Enqueue every well-formed line. Malformed lines are reported, not fatal.
pub async fn ingest<R>(queue: &dyn EventQueue, reader: R) -> Result<IngestOutput>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut out = IngestOutput {
        enqueued: 0,
        first_seq: None,
        last_seq: None,
        rejected: Vec::new(),
    };
    let mut number = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RawEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                out.rejected.push(format!("{number}: {e}"));
                continue;
            }
        };
        let seq = queue
            .enqueue(&event)
            .await
            .with_context(|| format!("Failed to enqueue line {number}"))?;
        out.first_seq.get_or_insert(seq);
        out.last_seq = Some(seq);
        out.enqueued += 1;
    }
    tracing::info!(enqueued = out.enqueued, rejected = out.rejected.len(), "events ingested");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteEventQueue};

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let pool = create_migrated_test_pool().await.unwrap();
        let queue = SqliteEventQueue::new(pool);
        let input = concat!(
            r#"{"event_id":"e1","session_id":"s","timestamp":"2026-01-01T00:00:00Z","kind":"note","payload":{"text":"hi"}}"#,
            "\n",
            "not json\n",
            "\n",
        );
        let out = ingest(&queue, input.as_bytes()).await.unwrap();
        assert_eq!(out.enqueued, 1);
        assert_eq!(out.rejected.len(), 1);
        assert!(out.rejected[0].starts_with("2:"));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
