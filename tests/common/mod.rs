#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

/// A temporary data root laid out as `<root>/projects/<project>/*.jsonl`
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("projects")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        let path = self.root().join("projects").join(project);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn write_log(&self, project: &str, file: &str, lines: &[String]) -> PathBuf {
        let path = self.project_dir(project).join(file);
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&path, content).unwrap();
        path
    }

    pub fn append_log(&self, path: &Path, lines: &[String]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }
}

/// One assistant usage line
pub fn usage_line(
    ts: DateTime<Utc>,
    message_id: Option<&str>,
    request_id: Option<&str>,
    input: u64,
    output: u64,
) -> String {
    let mut record = serde_json::json!({
        "type": "assistant",
        "timestamp": ts.to_rfc3339(),
        "sessionId": "session-1",
        "message": {
            "model": "claude-sonnet-4-20250514",
            "usage": {
                "input_tokens": input,
                "output_tokens": output,
                "cache_creation_input_tokens": 0,
                "cache_read_input_tokens": 0
            }
        }
    });
    if let Some(id) = message_id {
        record["message"]["id"] = id.into();
    }
    if let Some(id) = request_id {
        record["requestId"] = id.into();
    }
    record.to_string()
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}
