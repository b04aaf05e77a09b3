//! Streaming JSONL parser and validator
//!
//! Reads one log file line by line through a bounded buffer and turns each
//! line into a [`UsageEvent`] via [`UsageEvent::from_record`]. Rejected lines
//! are classified by [`EntryError::disposition`] and tallied in
//! [`ParseStats`]; nothing below the file level is ever returned as an error.

use crate::error::{Disposition, EntryError, IngestError};
use crate::file_discovery::project_name;
use crate::models::{RawRecord, TokenCounts, UsageEvent};
use crate::timestamp_parser::TimestampParser;
use chrono::Datelike;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::ops::AddAssign;
use std::path::Path;
use tracing::{debug, warn};

/// Model name the producer writes for locally generated placeholder messages
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

/// Timestamps before this year are corrupt sentinels
pub const MIN_VALID_YEAR: i32 = 2020;

/// Record kinds that share the log stream but never carry usage
const NON_USAGE_KINDS: &[&str] = &["user", "summary", "system", "file-history-snapshot"];

/// Trait for custom JSONL processing
pub trait JsonlProcessor {
    type Output;

    fn process_event(&mut self, event: UsageEvent, line_number: usize);
    fn finalize(self) -> Self::Output;
}

/// Default processor that collects all events into a Vec
#[derive(Default)]
pub struct CollectorProcessor {
    events: Vec<UsageEvent>,
}

impl CollectorProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JsonlProcessor for CollectorProcessor {
    type Output = Vec<UsageEvent>;

    fn process_event(&mut self, event: UsageEvent, _line_number: usize) {
        self.events.push(event);
    }

    fn finalize(self) -> Self::Output {
        self.events
    }
}

/// Per-file (or aggregated) line accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub events: usize,
    /// Malformed JSON, schema failures, oversized or non-UTF-8 lines
    pub parse_errors: usize,
    /// Synthetic models and invalid or pre-2020 timestamps
    pub dropped: usize,
    /// Recognised non-usage records
    pub ignored: usize,
}

impl ParseStats {
    fn record(&mut self, error: &EntryError) {
        match error.disposition() {
            Disposition::Diagnostic => self.parse_errors += 1,
            Disposition::Dropped => self.dropped += 1,
            Disposition::Ignored => self.ignored += 1,
        }
    }
}

impl AddAssign for ParseStats {
    fn add_assign(&mut self, other: Self) {
        self.lines += other.lines;
        self.events += other.events;
        self.parse_errors += other.parse_errors;
        self.dropped += other.dropped;
        self.ignored += other.ignored;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    pub max_line_bytes: usize,
    pub buffer_bytes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: 10 * 1024 * 1024,
            buffer_bytes: 64 * 1024,
        }
    }
}

impl From<&crate::config::ProcessingConfig> for ParserOptions {
    fn from(config: &crate::config::ProcessingConfig) -> Self {
        Self {
            max_line_bytes: config.max_line_kb * 1024,
            buffer_bytes: config.buffer_size_kb * 1024,
        }
    }
}

impl UsageEvent {
    /// Validate a raw record into a typed event.
    ///
    /// Schema checks run first; model and timestamp checks only apply to
    /// records that already carry usage.
    pub fn from_record(record: RawRecord, project: &str) -> Result<Self, EntryError> {
        let cost_usd = record.cost_usd();
        let request_id = record.request_id().map(str::to_string);
        let session_id = record.session_id().map(str::to_string);
        let RawRecord {
            kind,
            timestamp,
            message,
            ..
        } = record;

        let message = message.unwrap_or_default();
        let Some(usage) = message.usage else {
            return Err(match kind {
                Some(kind) if NON_USAGE_KINDS.contains(&kind.as_str()) => {
                    EntryError::NonUsageRecord { kind }
                }
                _ => EntryError::MissingUsage,
            });
        };
        let (Some(input_tokens), Some(output_tokens)) = (usage.input_tokens, usage.output_tokens)
        else {
            return Err(EntryError::MissingUsage);
        };

        let model = message.model.unwrap_or_else(|| "unknown".to_string());
        if model == SYNTHETIC_MODEL {
            return Err(EntryError::SyntheticModel(model));
        }

        let raw_timestamp =
            timestamp.ok_or_else(|| EntryError::InvalidTimestamp("missing".to_string()))?;
        let timestamp = TimestampParser::parse_value(&raw_timestamp)
            .map_err(|e| EntryError::InvalidTimestamp(e.to_string()))?;
        if timestamp.year() < MIN_VALID_YEAR {
            return Err(EntryError::StaleEntry {
                timestamp: timestamp.to_rfc3339(),
                min_year: MIN_VALID_YEAR,
            });
        }

        Ok(UsageEvent {
            timestamp,
            model,
            tokens: TokenCounts {
                input_tokens,
                output_tokens,
                cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
                cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            },
            cost_usd,
            session_id,
            message_id: message.id.filter(|s| !s.is_empty()),
            request_id,
            project: project.to_string(),
        })
    }
}

/// Decode and validate a single line
pub fn parse_line(line: &str, project: &str) -> Result<UsageEvent, EntryError> {
    let record: RawRecord = serde_json::from_str(line)?;
    UsageEvent::from_record(record, project)
}

pub struct UsageParser {
    options: ParserOptions,
}

impl Default for UsageParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

impl UsageParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parse every valid event in a file
    pub fn parse_file(&self, file_path: &Path) -> Result<(Vec<UsageEvent>, ParseStats), IngestError> {
        self.process_file(file_path, CollectorProcessor::new())
    }

    /// Generic method that streams valid events into any processor
    pub fn process_file<P: JsonlProcessor>(
        &self,
        file_path: &Path,
        processor: P,
    ) -> Result<(P::Output, ParseStats), IngestError> {
        let file = File::open(file_path).map_err(|source| IngestError::FileIo {
            path: file_path.to_path_buf(),
            source,
        })?;
        self.process_reader(file, file_path, processor)
    }

    /// Stream an already opened source. `file_path` is used for project
    /// attribution and diagnostics only.
    pub fn process_reader<R: Read, P: JsonlProcessor>(
        &self,
        source: R,
        file_path: &Path,
        mut processor: P,
    ) -> Result<(P::Output, ParseStats), IngestError> {
        let io_err = |source| IngestError::FileIo {
            path: file_path.to_path_buf(),
            source,
        };

        let reader = BufReader::with_capacity(self.options.buffer_bytes, source);
        let mut lines = BoundedLines::new(reader, self.options.max_line_bytes);
        let project = project_name(file_path);
        let mut stats = ParseStats::default();

        while let Some(line) = lines.next_line().map_err(io_err)? {
            stats.lines += 1;
            let text = match line {
                NextLine::Text(text) => text.trim(),
                NextLine::Oversized | NextLine::InvalidUtf8 => {
                    let oversized = matches!(line, NextLine::Oversized);
                    debug!(
                        file = %file_path.display(),
                        line = lines.line_number(),
                        oversized,
                        "Skipping unreadable line"
                    );
                    stats.parse_errors += 1;
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            match parse_line(text, &project) {
                Ok(event) => {
                    stats.events += 1;
                    processor.process_event(event, lines.line_number());
                }
                Err(e) => stats.record(&e),
            }
        }

        if stats.parse_errors > 0 {
            warn!(
                file = %file_path.display(),
                total_lines = stats.lines,
                parse_errors = stats.parse_errors,
                dropped = stats.dropped,
                events = stats.events,
                "Completed parsing with errors"
            );
        } else {
            debug!(
                file = %file_path.display(),
                total_lines = stats.lines,
                dropped = stats.dropped,
                ignored = stats.ignored,
                events = stats.events,
                "Parsed JSONL file"
            );
        }

        Ok((processor.finalize(), stats))
    }
}

/// One line from [`BoundedLines`]
pub(crate) enum NextLine<'a> {
    Text(&'a str),
    Oversized,
    InvalidUtf8,
}

/// Line reader that never holds more than `max_line_bytes` of a single line.
///
/// Lines over the cap are consumed and reported as [`NextLine::Oversized`]
/// so the reader stays aligned on the following line.
pub(crate) struct BoundedLines<R> {
    reader: R,
    buf: Vec<u8>,
    max_line_bytes: usize,
    line_number: usize,
}

impl<R: BufRead> BoundedLines<R> {
    pub(crate) fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_line_bytes,
            line_number: 0,
        }
    }

    pub(crate) fn line_number(&self) -> usize {
        self.line_number
    }

    pub(crate) fn next_line(&mut self) -> io::Result<Option<NextLine<'_>>> {
        self.buf.clear();
        let mut read_any = false;
        let mut oversized = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                break;
            }
            read_any = true;

            let newline = available.iter().position(|&b| b == b'\n');
            let content_len = newline.unwrap_or(available.len());
            if !oversized {
                if self.buf.len() + content_len > self.max_line_bytes {
                    oversized = true;
                    self.buf = Vec::new();
                } else {
                    self.buf.extend_from_slice(&available[..content_len]);
                }
            }

            let consumed = newline.map_or(available.len(), |pos| pos + 1);
            self.reader.consume(consumed);
            if newline.is_some() {
                break;
            }
        }

        if !read_any {
            return Ok(None);
        }
        self.line_number += 1;

        if oversized {
            return Ok(Some(NextLine::Oversized));
        }
        Ok(Some(match std::str::from_utf8(&self.buf) {
            Ok(text) => NextLine::Text(text),
            Err(_) => NextLine::InvalidUtf8,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"{"type":"assistant","timestamp":"2024-01-15T10:30:00Z","sessionId":"s1","requestId":"req_1","costUSD":0.5,"message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":10,"cache_read_input_tokens":5}}}"#;

    #[test]
    fn test_parse_valid_line() {
        let event = parse_line(VALID, "proj").unwrap();
        assert_eq!(event.tokens.total(), 165);
        assert_eq!(event.cost_usd, 0.5);
        assert_eq!(event.session_id.as_deref(), Some("s1"));
        assert_eq!(event.project, "proj");
        assert!(event.dedup_key().is_some());
    }

    #[test]
    fn test_zero_tokens_are_valid() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","message":{"model":"m","usage":{"input_tokens":0,"output_tokens":0}}}"#;
        let event = parse_line(line, "p").unwrap();
        assert_eq!(event.total_tokens(), 0);
        assert!(event.dedup_key().is_none());
    }

    #[test]
    fn test_alternate_field_names() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","session_id":"s2","request_id":"r","cost":0.25,"message":{"id":"m","model":"x","usage":{"input_tokens":1,"output_tokens":2}}}"#;
        let event = parse_line(line, "p").unwrap();
        assert_eq!(event.session_id.as_deref(), Some("s2"));
        assert_eq!(event.request_id.as_deref(), Some("r"));
        assert_eq!(event.cost_usd, 0.25);
    }

    #[test]
    fn test_rejections_are_classified() {
        let cases = [
            ("{broken json}", Disposition::Diagnostic),
            (
                r#"{"type":"assistant","timestamp":"2024-01-15T10:30:00Z","message":{"model":"m"}}"#,
                Disposition::Diagnostic,
            ),
            (
                r#"{"timestamp":"2024-01-15T10:30:00Z","message":{"model":"m","usage":{"input_tokens":5}}}"#,
                Disposition::Diagnostic,
            ),
            (
                r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":{"role":"user","content":"hi"}}"#,
                Disposition::Ignored,
            ),
            (r#"{"type":"summary","summary":"x","leafUuid":"u"}"#, Disposition::Ignored),
            (
                r#"{"timestamp":"2024-01-15T10:30:00Z","message":{"model":"<synthetic>","usage":{"input_tokens":0,"output_tokens":0}}}"#,
                Disposition::Dropped,
            ),
            (
                r#"{"timestamp":"2019-12-31T23:59:59Z","message":{"model":"m","usage":{"input_tokens":1,"output_tokens":1}}}"#,
                Disposition::Dropped,
            ),
            (
                r#"{"timestamp":"yesterday","message":{"model":"m","usage":{"input_tokens":1,"output_tokens":1}}}"#,
                Disposition::Dropped,
            ),
        ];

        for (line, expected) in cases {
            let err = parse_line(line, "p").unwrap_err();
            assert_eq!(err.disposition(), expected, "line: {line}");
        }
    }

    #[test]
    fn test_both_spellings_present() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","sessionId":"camel","session_id":"snake","requestId":"r1","request_id":"r2","costUSD":0.5,"cost":0.7,"message":{"id":"m","model":"x","usage":{"input_tokens":1,"output_tokens":2}}}"#;
        let event = parse_line(line, "p").unwrap();
        assert_eq!(event.session_id.as_deref(), Some("camel"));
        assert_eq!(event.request_id.as_deref(), Some("r1"));
        assert_eq!(event.cost_usd, 0.5);
    }

    #[test]
    fn test_empty_camel_id_falls_back_to_snake() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","requestId":"","request_id":"r2","message":{"id":"m","model":"x","usage":{"input_tokens":1,"output_tokens":2}}}"#;
        let event = parse_line(line, "p").unwrap();
        assert_eq!(event.request_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_lenient_cost_values() {
        let with_cost = |cost: &str| {
            format!(
                r#"{{"timestamp":"2024-01-15T10:30:00Z","costUSD":{cost},"message":{{"model":"x","usage":{{"input_tokens":1,"output_tokens":2}}}}}}"#
            )
        };
        assert_eq!(parse_line(&with_cost(r#""0.5""#), "p").unwrap().cost_usd, 0.5);
        assert_eq!(parse_line(&with_cost(r#""n/a""#), "p").unwrap().cost_usd, 0.0);
        assert_eq!(parse_line(&with_cost("null"), "p").unwrap().cost_usd, 0.0);
        assert_eq!(parse_line(&with_cost("{}"), "p").unwrap().cost_usd, 0.0);
        assert_eq!(parse_line(&with_cost("1.25"), "p").unwrap().total_tokens(), 3);
    }

    #[test]
    fn test_non_object_message_on_known_kind_is_ignored() {
        for line in [
            r#"{"type":"user","timestamp":"2024-01-15T10:30:00Z","message":"plain text"}"#,
            r#"{"type":"system","message":["a","b"]}"#,
        ] {
            let err = parse_line(line, "p").unwrap_err();
            assert_eq!(err.disposition(), Disposition::Ignored, "line: {line}");
        }

        let unknown = r#"{"type":"assistant","timestamp":"2024-01-15T10:30:00Z","message":"plain text"}"#;
        assert!(matches!(parse_line(unknown, "p"), Err(EntryError::MissingUsage)));
    }

    #[test]
    fn test_reader_error_mid_file_is_io_error() {
        struct FailAfter(io::Cursor<Vec<u8>>);

        impl Read for FailAfter {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.read(buf)? {
                    0 => Err(io::Error::new(io::ErrorKind::Other, "device gone")),
                    n => Ok(n),
                }
            }
        }

        let source = FailAfter(io::Cursor::new(format!("{VALID}
").into_bytes()));
        let result = UsageParser::default().process_reader(
            source,
            Path::new("/data/projects/app/s.jsonl"),
            CollectorProcessor::new(),
        );
        assert!(matches!(result, Err(IngestError::FileIo { .. })));
    }

    #[test]
    fn test_negative_tokens_rejected() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","message":{"model":"m","usage":{"input_tokens":-1,"output_tokens":2}}}"#;
        assert!(matches!(parse_line(line, "p"), Err(EntryError::MalformedJson(_))));
    }

    #[test]
    fn test_parse_file_with_mixed_lines() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", VALID).unwrap();
        writeln!(temp_file, "{{broken json}}").unwrap();
        writeln!(temp_file).unwrap();
        writeln!(temp_file, r#"{{"type":"user","message":{{"role":"user"}}}}"#).unwrap();
        write!(temp_file, "{}", VALID.replace("msg_1", "msg_2")).unwrap();
        temp_file.flush().unwrap();

        let parser = UsageParser::default();
        let (events, stats) = parser.parse_file(temp_file.path()).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(stats.lines, 5);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.ignored, 1);
    }

    #[test]
    fn test_oversized_line_is_skipped_and_reader_realigns() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", "x".repeat(4096)).unwrap();
        writeln!(temp_file, "{}", VALID).unwrap();
        temp_file.flush().unwrap();

        let parser = UsageParser::new(ParserOptions {
            max_line_bytes: 1024,
            buffer_bytes: 256,
        });
        let (events, stats) = parser.parse_file(temp_file.path()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.lines, 2);
    }

    #[test]
    fn test_line_longer_than_read_buffer() {
        let padding = "p".repeat(2000);
        let line = VALID.replacen('{', &format!(r#"{{"pad":"{padding}","#), 1);
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", line).unwrap();
        temp_file.flush().unwrap();

        let parser = UsageParser::new(ParserOptions {
            max_line_bytes: 1 << 20,
            buffer_bytes: 64,
        });
        let (events, _) = parser.parse_file(temp_file.path()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let parser = UsageParser::default();
        let result = parser.parse_file(Path::new("/nonexistent/file.jsonl"));
        assert!(matches!(result, Err(IngestError::FileIo { .. })));
    }
}
