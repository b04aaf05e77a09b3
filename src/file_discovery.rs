use crate::error::IngestError;
use crate::parser::{BoundedLines, NextLine};
use crate::timestamp_parser::TimestampParser;
use chrono::{DateTime, Utc};
use glob::glob;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Scanner knobs. The live dashboard sets both limits; bulk reports leave them unset.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Skip projects whose newest file was not modified within this window
    pub modified_within: Option<Duration>,
    /// Keep only the N most recently modified files
    pub max_files: Option<usize>,
    /// Lines sampled per file to find its earliest timestamp
    pub sample_lines: usize,
    /// Longest line read while sampling
    pub max_line_bytes: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            modified_within: None,
            max_files: None,
            sample_lines: 100,
            max_line_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
}

/// Handles file system traversal and discovery of usage log files
pub struct FileDiscovery {
    options: ScanOptions,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new(ScanOptions::default())
    }
}

impl FileDiscovery {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Enumerate log files under the given roots, ordered by earliest embedded timestamp.
    ///
    /// A root that cannot be read is fatal. Individual files that disappear or
    /// cannot be opened are skipped.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>, IngestError> {
        let cutoff = self
            .options
            .modified_within
            .and_then(|window| SystemTime::now().checked_sub(window));

        let mut candidates = Vec::new();
        for root in roots {
            fs::read_dir(root).map_err(|source| IngestError::RootUnreadable {
                path: root.clone(),
                source,
            })?;

            let projects_dir = root.join("projects");
            if !projects_dir.is_dir() {
                warn!(root = %root.display(), "Data root has no projects directory");
                continue;
            }

            for project_dir in self.project_dirs(&projects_dir)? {
                let files = self.project_files(&project_dir);
                candidates.extend(self.apply_freshness(&project_dir, files, cutoff));
            }
        }

        let candidates = self.apply_file_cap(candidates);
        let files = self.sort_by_earliest_timestamp(candidates);

        debug!(files = files.len(), roots = roots.len(), "Scan complete");
        Ok(files)
    }

    /// Phase one: project subdirectories of `<root>/projects`
    fn project_dirs(&self, projects_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let entries = fs::read_dir(projects_dir).map_err(|source| IngestError::RootUnreadable {
            path: projects_dir.to_path_buf(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// All `*.jsonl` files of one project: flat files plus the legacy `YYYY/MM/DD` layout
    fn project_files(&self, project_dir: &Path) -> Vec<Candidate> {
        let pattern = project_dir.join("**").join("*.jsonl");
        let Ok(paths) = glob(&pattern.to_string_lossy()) else {
            warn!(project = %project_dir.display(), "Invalid glob pattern for project");
            return Vec::new();
        };

        paths
            .flatten()
            .filter(|path| is_supported_layout(project_dir, path))
            .filter_map(|path| match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => Some(Candidate { path, modified }),
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "Skipping unreadable file");
                    None
                }
            })
            .collect()
    }

    /// Phase two: drop the whole project when its newest file predates the cutoff
    fn apply_freshness(
        &self,
        project_dir: &Path,
        files: Vec<Candidate>,
        cutoff: Option<SystemTime>,
    ) -> Vec<Candidate> {
        let Some(cutoff) = cutoff else {
            return files;
        };

        // Older files of a fresh project stay: they can anchor the active block
        let newest = files.iter().map(|c| c.modified).max();
        match newest {
            Some(newest) if newest >= cutoff => files,
            _ => {
                debug!(project = %project_dir.display(), "Skipping stale project");
                Vec::new()
            }
        }
    }

    fn apply_file_cap(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let Some(max_files) = self.options.max_files else {
            return candidates;
        };
        if candidates.len() <= max_files {
            return candidates;
        }

        candidates.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        debug!(
            kept = max_files,
            skipped = candidates.len() - max_files,
            "Capping file count to most recently modified"
        );
        candidates.truncate(max_files);
        candidates
    }

    /// Order files by earliest sampled timestamp; undetermined files go last
    fn sort_by_earliest_timestamp(&self, candidates: Vec<Candidate>) -> Vec<PathBuf> {
        let mut keyed: Vec<(Option<DateTime<Utc>>, PathBuf)> = candidates
            .into_iter()
            .map(|c| (self.earliest_timestamp(&c.path), c.path))
            .collect();

        keyed.sort_by(|(a_ts, a_path), (b_ts, b_path)| {
            let by_time = match (a_ts, b_ts) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_time.then_with(|| a_path.cmp(b_path))
        });

        keyed.into_iter().map(|(_, path)| path).collect()
    }

    /// Earliest timestamp among the first `sample_lines` lines of a file
    pub fn earliest_timestamp(&self, file_path: &Path) -> Option<DateTime<Utc>> {
        #[derive(Deserialize)]
        struct TimestampOnly {
            timestamp: Option<serde_json::Value>,
        }

        let file = match File::open(file_path) {
            Ok(file) => file,
            Err(e) => {
                debug!(file = %file_path.display(), error = %e, "Cannot sample timestamp");
                return None;
            }
        };
        let mut lines = BoundedLines::new(BufReader::new(file), self.options.max_line_bytes);
        let mut earliest: Option<DateTime<Utc>> = None;

        for _ in 0..self.options.sample_lines {
            let line = match lines.next_line() {
                Ok(Some(NextLine::Text(text))) => text,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            };
            let Ok(record) = serde_json::from_str::<TimestampOnly>(line) else {
                continue;
            };
            if let Some(ts) = record
                .timestamp
                .and_then(|v| TimestampParser::parse_value(&v).ok())
            {
                earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
            }
        }

        earliest
    }
}

/// Flat `<project>/*.jsonl`, or legacy `<project>/YYYY/MM/DD/*.jsonl`
fn is_supported_layout(project_dir: &Path, file: &Path) -> bool {
    let Ok(relative) = file.strip_prefix(project_dir) else {
        return false;
    };
    let dirs: Vec<&str> = relative
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    match dirs.as_slice() {
        [] => true,
        [year, month, day] => {
            is_digits(year, 4) && is_digits(month, 2) && is_digits(day, 2)
        }
        _ => false,
    }
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

/// Project a log file belongs to: the directory right below `projects/`,
/// without the leading `-` of path-encoded names.
pub fn project_name(file_path: &Path) -> String {
    let components: Vec<&str> = file_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let project = components
        .iter()
        .rposition(|c| *c == "projects")
        .and_then(|i| components.get(i + 1))
        .filter(|_| components.len() > 2)
        .copied()
        .or_else(|| {
            file_path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
        })
        .unwrap_or("unknown");

    project.strip_prefix('-').unwrap_or(project).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name() {
        assert_eq!(
            project_name(Path::new("/home/u/.claude/projects/-home-u-app/abc.jsonl")),
            "home-u-app"
        );
        assert_eq!(
            project_name(Path::new("/data/projects/web/2024/01/15/log.jsonl")),
            "web"
        );
        assert_eq!(project_name(Path::new("/tmp/other/log.jsonl")), "other");
    }

    #[test]
    fn test_supported_layouts() {
        let project = Path::new("/r/projects/p");
        assert!(is_supported_layout(project, Path::new("/r/projects/p/a.jsonl")));
        assert!(is_supported_layout(
            project,
            Path::new("/r/projects/p/2024/01/15/a.jsonl")
        ));
        assert!(!is_supported_layout(project, Path::new("/r/projects/p/tmp/a.jsonl")));
        assert!(!is_supported_layout(
            project,
            Path::new("/r/projects/p/24/1/15/a.jsonl")
        ));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let discovery = FileDiscovery::default();
        let result = discovery.scan(&[PathBuf::from("/definitely/not/here")]);
        assert!(matches!(result, Err(IngestError::RootUnreadable { .. })));
    }

    #[test]
    fn test_earliest_timestamp_samples_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        fs::write(
            &path,
            concat!(
                "{\"type\":\"summary\"}\n",
                "{\"timestamp\":\"2024-03-01T12:00:00Z\"}\n",
                "not json\n",
                "{\"timestamp\":\"2024-03-01T09:00:00Z\"}\n",
            ),
        )
        .unwrap();

        let ts = FileDiscovery::default().earliest_timestamp(&path).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T09:00:00+00:00");
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut content = "{}\n".repeat(5);
        content.push_str("{\"timestamp\":\"2024-03-01T09:00:00Z\"}\n");
        fs::write(&path, content).unwrap();

        let discovery = FileDiscovery::new(ScanOptions {
            sample_lines: 5,
            ..ScanOptions::default()
        });
        assert!(discovery.earliest_timestamp(&path).is_none());
    }
}
