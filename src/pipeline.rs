//! Parallel Ingestion Pipeline
//!
//! Fans the scanner's file list out over a bounded rayon pool. Each worker
//! streams one file through the parser and, once the file has been read to
//! the end, filters its events through the shared [`DedupSet`] before they
//! are merged. Merge order across
//! workers is unspecified; callers sort before segmenting.

use crate::dedup::DedupSet;
use crate::error::IngestError;
use crate::models::UsageEvent;
use crate::parser::{CollectorProcessor, ParseStats, UsageParser};
use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between the caller and the workers
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one pipeline run
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Admitted events, unsorted
    pub events: Vec<UsageEvent>,
    pub stats: ParseStats,
    pub files_processed: usize,
    pub failed_files: Vec<PathBuf>,
    /// Events rejected because their key was already admitted
    pub duplicates: usize,
}

/// Admit a fully read file's events through the shared set.
///
/// Runs only after the whole file was read so a file that fails part way
/// never leaves keys behind for events nobody received.
fn admit_events(dedup: &DedupSet, parsed: Vec<UsageEvent>) -> (Vec<UsageEvent>, usize) {
    let mut duplicates = 0;
    let events = parsed
        .into_iter()
        .filter(|event| {
            let admitted = dedup.admit_event(event);
            if !admitted {
                duplicates += 1;
                debug!(
                    message_id = ?event.message_id,
                    request_id = ?event.request_id,
                    "Skipping duplicate entry"
                );
            }
            admitted
        })
        .collect();
    (events, duplicates)
}

enum FileResult {
    Parsed {
        events: Vec<UsageEvent>,
        stats: ParseStats,
        duplicates: usize,
    },
    Failed(PathBuf),
    Cancelled,
}

pub struct IngestPipeline {
    parser: UsageParser,
    dedup: Arc<DedupSet>,
    workers: usize,
}

impl IngestPipeline {
    pub fn new(parser: UsageParser, dedup: Arc<DedupSet>, workers: usize) -> Self {
        Self {
            parser,
            dedup,
            workers: workers.max(1),
        }
    }

    pub fn dedup(&self) -> &Arc<DedupSet> {
        &self.dedup
    }

    /// Parse and deduplicate every file.
    ///
    /// Fails only when every file failed, or when cancelled; a cancelled run
    /// discards whatever was gathered.
    pub fn ingest(&self, files: &[PathBuf], cancel: &CancelFlag) -> Result<IngestOutcome, IngestError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("ingest-{i}"))
            .build()?;

        // One file per task so a large file never holds back a batch
        let results: Vec<FileResult> = pool.install(|| {
            files
                .par_iter()
                .with_max_len(1)
                .map(|path| self.ingest_file(path, cancel))
                .collect()
        });

        if cancel.is_cancelled() {
            info!("Ingestion cancelled; discarding partial results");
            return Err(IngestError::Cancelled);
        }

        let mut outcome = IngestOutcome::default();
        for result in results {
            match result {
                FileResult::Parsed {
                    events,
                    stats,
                    duplicates,
                } => {
                    outcome.files_processed += 1;
                    outcome.stats += stats;
                    outcome.duplicates += duplicates;
                    outcome.events.extend(events);
                }
                FileResult::Failed(path) => outcome.failed_files.push(path),
                FileResult::Cancelled => return Err(IngestError::Cancelled),
            }
        }

        if !files.is_empty() && outcome.files_processed == 0 {
            return Err(IngestError::AllFilesFailed {
                failed: outcome.failed_files.len(),
            });
        }

        info!(
            files = outcome.files_processed,
            failed = outcome.failed_files.len(),
            events = outcome.events.len(),
            duplicates = outcome.duplicates,
            parse_errors = outcome.stats.parse_errors,
            workers = self.workers,
            "Ingestion complete"
        );

        Ok(outcome)
    }

    fn ingest_file(&self, path: &Path, cancel: &CancelFlag) -> FileResult {
        if cancel.is_cancelled() {
            return FileResult::Cancelled;
        }

        match File::open(path) {
            Ok(file) => self.ingest_reader(file, path),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "File skipped");
                FileResult::Failed(path.to_path_buf())
            }
        }
    }

    fn ingest_reader<R: Read>(&self, source: R, path: &Path) -> FileResult {
        match self
            .parser
            .process_reader(source, path, CollectorProcessor::new())
        {
            Ok((parsed, stats)) => {
                let (events, duplicates) = admit_events(&self.dedup, parsed);
                FileResult::Parsed {
                    events,
                    stats,
                    duplicates,
                }
            }
            Err(e) => {
                warn!(error = %e, "File skipped");
                FileResult::Failed(path.to_path_buf())
            }
        }
    }
}
