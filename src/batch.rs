//! Selecting the sequencing files of one experiment upload.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use uuid::Uuid;

pub const FASTQ_SUFFIX: &str = ".fastq.gz";

/// Files of one experiment, in directory listing order.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchFile<'a> {
    /// 1-based position in the batch.
    pub index: usize,
    pub path: &'a Path,
    pub is_last_file: bool,
}

impl BatchPlan {
    /// Lists `dir` once and keeps the regular files ending in `.fastq.gz`.
    pub fn scan(dir: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if is_fastq(&path) && path.is_file() {
                files.push(path);
            }
        }
        Ok(Self { files })
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = BatchFile<'_>> {
        let total = self.files.len();
        self.files.iter().enumerate().map(move |(i, path)| BatchFile {
            index: i + 1,
            path,
            is_last_file: i + 1 == total,
        })
    }
}

impl BatchFile<'_> {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn is_fastq(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(FASTQ_SUFFIX))
}

/// Count of files that finished, out of the files in the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub total: usize,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

/// `YYYY-MM-DD-HH-MM-SS-<uuid>`, used when no experiment name is given.
///
/// The timestamp is written in the zone of `now`; the CLI passes local time.
pub fn default_experiment_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!("{}-{}", now.format("%Y-%m-%d-%H-%M-%S"), Uuid::new_v4())
}
