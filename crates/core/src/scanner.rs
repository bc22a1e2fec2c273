//! Walks the upload tree: exclusion rules, media detection, pre-flight report.

use crate::admission::{self, AdmissionVerdict};
use crate::ordering::natural_cmp;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const STREAMING_EXTENSION: &str = "mp4";

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("mpeg", "video/mpeg"),
    ("mpg", "video/mpeg"),
    ("m4v", "video/x-m4v"),
    ("3gp", "video/3gpp"),
    ("3g2", "video/3gpp2"),
    ("ts", "video/mp2t"),
    ("mts", "video/mp2t"),
    ("m2ts", "video/mp2t"),
    ("vob", "video/dvd"),
    ("ogv", "video/ogg"),
    ("flv", "video/x-flv"),
    ("f4v", "video/x-f4v"),
    ("asf", "video/x-ms-asf"),
    ("wmv", "video/x-ms-wmv"),
];

const OTHER_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("srt", "application/x-subrip"),
    ("mp3", "audio/mpeg"),
    ("zip", "application/zip"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Video,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub category: MediaCategory,
    pub streamable: bool,
}

impl FileEntry {
    pub fn inspect(path: &Path, size: u64) -> Self {
        let category = if is_video(path) {
            MediaCategory::Video
        } else {
            MediaCategory::Other
        };
        let streamable = category == MediaCategory::Video
            && extension(path).as_deref() == Some(STREAMING_EXTENSION);
        Self {
            path: path.to_path_buf(),
            size,
            category,
            streamable,
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn sniff(path: &Path) -> Option<&'static str> {
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|kind| kind.mime_type())
}

pub fn is_video(path: &Path) -> bool {
    if let Some(ext) = extension(path) {
        if VIDEO_TYPES.iter().any(|(e, _)| *e == ext) {
            return true;
        }
    }
    sniff(path)
        .map(|mime| mime.starts_with("video/"))
        .unwrap_or(false)
}

pub fn mime_type(path: &Path) -> String {
    if let Some(mime) = sniff(path) {
        return mime.to_string();
    }
    extension(path)
        .and_then(|ext| {
            VIDEO_TYPES
                .iter()
                .chain(OTHER_TYPES.iter())
                .find(|(e, _)| *e == ext)
                .map(|(_, mime)| mime.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

#[derive(Debug, Clone)]
pub struct TreeFilter {
    exclude: GlobSet,
    skip_hidden: bool,
    reserved_name: String,
}

impl Default for TreeFilter {
    fn default() -> Self {
        Self {
            exclude: GlobSet::empty(),
            skip_hidden: false,
            reserved_name: "thumb.jpg".to_string(),
        }
    }
}

impl TreeFilter {
    pub fn new(excludes: &[String], skip_hidden: bool, reserved_name: &str) -> anyhow::Result<Self> {
        Ok(Self {
            exclude: build_globset(excludes)?,
            skip_hidden,
            reserved_name: reserved_name.to_string(),
        })
    }

    pub fn reserved_name(&self) -> &str {
        &self.reserved_name
    }

    /// Applies to directories and files alike.
    pub fn allows(&self, path: &Path) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }
        !(self.skip_hidden && is_hidden(path))
    }

    pub fn allows_file(&self, path: &Path) -> bool {
        let reserved = path
            .file_name()
            .map(|n| n == self.reserved_name.as_str())
            .unwrap_or(false);
        !reserved && self.allows(path)
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Directories already entered, by resolved path. Symlinks that lead back
/// into the tree are entered once, the first time they are met in pre-order.
#[derive(Debug, Default)]
pub struct VisitedDirs(HashSet<PathBuf>);

impl VisitedDirs {
    pub fn first_visit(&mut self, dir: &Path) -> bool {
        let key = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        self.0.insert(key)
    }
}

fn walk<'a>(root: &Path, filter: &'a TreeFilter) -> impl Iterator<Item = walkdir::DirEntry> + 'a {
    let mut visited = VisitedDirs::default();
    WalkDir::new(root)
        .follow_links(true)
        .sort_by(|a, b| {
            natural_cmp(
                &a.file_name().to_string_lossy(),
                &b.file_name().to_string_lossy(),
            )
        })
        .into_iter()
        .filter_entry(move |e| {
            if e.depth() > 0 && !filter.allows(e.path()) {
                return false;
            }
            !e.file_type().is_dir() || visited.first_visit(e.path())
        })
        .filter_map(Result::ok)
        .filter(move |e| e.file_type().is_file() && filter.allows_file(e.path()))
}

pub fn scan_tree(root: &Path, filter: &TreeFilter) -> Vec<FileEntry> {
    walk(root, filter)
        .filter_map(|e| {
            let meta = fs::metadata(e.path()).ok()?;
            Some(FileEntry::inspect(e.path(), meta.len()))
        })
        .collect()
}

pub fn count_files(root: &Path, filter: &TreeFilter) -> u64 {
    walk(root, filter).count() as u64
}

#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub entries: Vec<FileEntry>,
    pub needs_conversion: Vec<FileEntry>,
    pub warnings: Vec<(FileEntry, String)>,
    pub rejected: Vec<(FileEntry, String)>,
}

impl PreflightReport {
    pub fn needs_attention(&self) -> bool {
        !self.needs_conversion.is_empty() || !self.rejected.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

pub fn preflight(root: &Path, filter: &TreeFilter) -> PreflightReport {
    let entries = scan_tree(root, filter);
    let mut report = PreflightReport::default();
    for entry in &entries {
        if admission::needs_conversion(entry) {
            report.needs_conversion.push(entry.clone());
        }
        match admission::classify(entry.size) {
            AdmissionVerdict::Eligible => {}
            AdmissionVerdict::EligibleWithWarning(reason) => {
                report.warnings.push((entry.clone(), reason))
            }
            AdmissionVerdict::Rejected(reason) => report.rejected.push((entry.clone(), reason)),
        }
    }
    report.entries = entries;
    report
}
