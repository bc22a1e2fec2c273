use crate::scanner::{FileEntry, MediaCategory};

pub const GIB: u64 = 1024 * 1024 * 1024;
/// Files strictly larger than this upload with a caution.
pub const WARN_THRESHOLD: u64 = 2 * GIB;
/// Files strictly larger than this are never uploaded.
pub const REJECT_THRESHOLD: u64 = 4 * GIB;

const _: () = assert!(REJECT_THRESHOLD > WARN_THRESHOLD);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Eligible,
    EligibleWithWarning(String),
    Rejected(String),
}

impl AdmissionVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AdmissionVerdict::Rejected(_))
    }
}

pub fn classify(size: u64) -> AdmissionVerdict {
    if size > REJECT_THRESHOLD {
        AdmissionVerdict::Rejected(format!(
            "{} exceeds the {} upload limit",
            human_size(size),
            human_size(REJECT_THRESHOLD)
        ))
    } else if size > WARN_THRESHOLD {
        AdmissionVerdict::EligibleWithWarning(format!(
            "{} is above {}; the upload may be slow or refused",
            human_size(size),
            human_size(WARN_THRESHOLD)
        ))
    } else {
        AdmissionVerdict::Eligible
    }
}

pub fn needs_conversion(entry: &FileEntry) -> bool {
    entry.category == MediaCategory::Video && !entry.streamable
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
