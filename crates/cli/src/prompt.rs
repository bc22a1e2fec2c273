use dialoguer::{Confirm, Password, Select};
use std::io::{self, BufRead, BufReader, IsTerminal, Stdin, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use uploader_core::admission::human_size;
use uploader_core::decisions::DecisionProvider;
use uploader_core::deletion::DeletionChoice;
use uploader_core::media::SubtitleStream;
use uploader_core::scanner::{FileEntry, PreflightReport};
use uploader_core::transcode::{ConflictPolicy, QualityTier};

const TIERS: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::Original];
const POLICIES: [ConflictPolicy; 3] =
    [ConflictPolicy::Overwrite, ConflictPolicy::Backup, ConflictPolicy::Skip];
const DELETION_ITEMS: [&str; 4] = [
    "keep this one",
    "remove this one",
    "keep all remaining",
    "remove all remaining",
];

enum Source<R> {
    Terminal,
    Lines(Mutex<R>),
}

/// Answers decision points from the operator. Prompts are drawn on stderr so
/// stdout stays clean for `--json`.
pub struct TerminalDecisions<R = BufReader<Stdin>> {
    source: Source<R>,
    assume_yes: bool,
    convert: bool,
}

impl TerminalDecisions<BufReader<Stdin>> {
    pub fn stdin(assume_yes: bool, convert: bool) -> Self {
        let source = if io::stdin().is_terminal() && io::stderr().is_terminal() {
            Source::Terminal
        } else {
            Source::Lines(Mutex::new(BufReader::new(io::stdin())))
        };
        Self {
            source,
            assume_yes,
            convert,
        }
    }
}

impl<R: BufRead + Send> TerminalDecisions<R> {
    /// Line-by-line answers from `input`, for pipes and tests.
    pub fn new(input: R, assume_yes: bool, convert: bool) -> Self {
        Self {
            source: Source::Lines(Mutex::new(input)),
            assume_yes,
            convert,
        }
    }

    /// `None` on end of input.
    fn read_line(input: &Mutex<R>, prompt: &str) -> Option<String> {
        eprint!("{prompt} ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        let mut input = input.lock().ok()?;
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn confirm(&self, prompt: &str, default: bool) -> bool {
        match &self.source {
            Source::Terminal => Confirm::new()
                .with_prompt(prompt)
                .default(default)
                .interact_opt()
                .unwrap_or_else(|e| {
                    warn!("prompt failed: {e}");
                    None
                })
                .unwrap_or(default),
            Source::Lines(input) => {
                let hint = if default { "[Y/n]" } else { "[y/N]" };
                match Self::read_line(input, &format!("{prompt} {hint}")) {
                    Some(answer) => match answer.to_lowercase().as_str() {
                        "y" | "yes" => true,
                        "n" | "no" => false,
                        _ => default,
                    },
                    None => default,
                }
            }
        }
    }

    fn select(&self, prompt: &str, items: &[String], default: usize) -> Option<usize> {
        match &self.source {
            Source::Terminal => Select::new()
                .with_prompt(prompt)
                .items(items)
                .default(default)
                .interact_opt()
                .unwrap_or_else(|e| {
                    warn!("prompt failed: {e}");
                    None
                }),
            Source::Lines(input) => {
                for (i, item) in items.iter().enumerate() {
                    eprintln!("  {i}: {item}");
                }
                let question = format!("{prompt} ({}):", items.get(default)?);
                loop {
                    let answer = Self::read_line(input, &question)?;
                    if answer.is_empty() {
                        return Some(default);
                    }
                    match pick(items, &answer) {
                        Some(i) => return Some(i),
                        None => eprintln!("{answer:?} is not one of the choices"),
                    }
                }
            }
        }
    }

    fn secret(&self, prompt: &str) -> Option<String> {
        let answer = match &self.source {
            Source::Terminal => Password::new()
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map_err(|e| warn!("prompt failed: {e}"))
                .ok()?,
            Source::Lines(input) => Self::read_line(input, &format!("{prompt}:"))?,
        };
        let answer = answer.trim();
        (!answer.is_empty()).then(|| answer.to_string())
    }
}

/// An index, or a case-insensitive prefix naming exactly one item.
fn pick(items: &[String], answer: &str) -> Option<usize> {
    if let Ok(i) = answer.parse::<usize>() {
        return (i < items.len()).then_some(i);
    }
    let answer = answer.to_lowercase();
    let mut matches = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.to_lowercase().starts_with(&answer));
    match (matches.next(), matches.next()) {
        (Some((i, _)), None) => Some(i),
        _ => None,
    }
}

impl<R: BufRead + Send> DecisionProvider for TerminalDecisions<R> {
    fn credential(&self, prompt: &str) -> Option<String> {
        self.secret(prompt)
    }

    fn confirm_conversion(&self, candidates: &[FileEntry]) -> bool {
        if self.convert {
            return true;
        }
        if self.assume_yes {
            return false;
        }
        self.confirm(
            &format!("Convert {} video(s) to mp4 before uploading?", candidates.len()),
            false,
        )
    }

    fn quality_tier(&self) -> QualityTier {
        let fallback = QualityTier::default();
        if self.assume_yes {
            return fallback;
        }
        let items: Vec<String> = TIERS.iter().map(ToString::to_string).collect();
        let default = TIERS.iter().position(|t| *t == fallback).unwrap_or(0);
        self.select("Quality", &items, default)
            .map(|i| TIERS[i])
            .unwrap_or(fallback)
    }

    fn subtitle_track(&self, source: &Path, streams: &[SubtitleStream]) -> Option<u32> {
        if self.assume_yes {
            return None;
        }
        let mut items = vec!["none".to_string()];
        items.extend(streams.iter().map(SubtitleStream::describe));
        let chosen = self.select(
            &format!("Burn subtitles into {}?", source.display()),
            &items,
            0,
        )?;
        chosen.checked_sub(1).map(|i| streams[i].ordinal)
    }

    fn conflict_policy(&self, target: &Path, default: ConflictPolicy) -> ConflictPolicy {
        if self.assume_yes {
            return default;
        }
        let items: Vec<String> = POLICIES.iter().map(ToString::to_string).collect();
        let preselected = POLICIES.iter().position(|p| *p == default).unwrap_or(0);
        self.select(&format!("{} exists", target.display()), &items, preselected)
            .map(|i| POLICIES[i])
            .unwrap_or(default)
    }

    fn deletion_choice(&self, source: &Path) -> DeletionChoice {
        if self.assume_yes {
            return DeletionChoice::KeepAll;
        }
        let items: Vec<String> = DELETION_ITEMS.iter().map(|s| s.to_string()).collect();
        match self.select(
            &format!("Delete {} once converted?", source.display()),
            &items,
            0,
        ) {
            Some(0) => DeletionChoice::KeepThis,
            Some(1) => DeletionChoice::RemoveThis,
            Some(3) => DeletionChoice::RemoveAll,
            _ => DeletionChoice::KeepAll,
        }
    }

    fn confirm_upload(&self, report: &PreflightReport) -> bool {
        if self.assume_yes {
            return true;
        }
        let count = report.entries.len() - report.rejected.len();
        let bytes = report.total_bytes()
            - report.rejected.iter().map(|(e, _)| e.size).sum::<u64>();
        self.confirm(
            &format!("Upload {} file(s), {}?", count, human_size(bytes)),
            false,
        )
    }
}
