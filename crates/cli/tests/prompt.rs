use cli::prompt::TerminalDecisions;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use uploader_core::decisions::DecisionProvider;
use uploader_core::deletion::DeletionChoice;
use uploader_core::media::SubtitleStream;
use uploader_core::scanner::{FileEntry, PreflightReport};
use uploader_core::transcode::{ConflictPolicy, QualityTier};

fn answers(text: &str) -> TerminalDecisions<Cursor<Vec<u8>>> {
    TerminalDecisions::new(Cursor::new(text.as_bytes().to_vec()), false, false)
}

fn report() -> PreflightReport {
    PreflightReport {
        entries: vec![FileEntry::inspect(Path::new("a.mp4"), 10)],
        ..PreflightReport::default()
    }
}

#[test]
fn deletion_answers_map_to_choices() {
    let d = answers("1\n0\nremove all\n2\n\n");
    let src = Path::new("clip.avi");
    assert_eq!(d.deletion_choice(src), DeletionChoice::RemoveThis);
    assert_eq!(d.deletion_choice(src), DeletionChoice::KeepThis);
    assert_eq!(d.deletion_choice(src), DeletionChoice::RemoveAll);
    assert_eq!(d.deletion_choice(src), DeletionChoice::KeepAll);
    assert_eq!(d.deletion_choice(src), DeletionChoice::KeepThis);
    // Input exhausted.
    assert_eq!(d.deletion_choice(src), DeletionChoice::KeepAll);
}

#[test]
fn quality_reprompts_on_garbage() {
    let d = answers("ultra\nLow\n");
    assert_eq!(d.quality_tier(), QualityTier::Low);
    assert_eq!(answers("2\n").quality_tier(), QualityTier::Original);
    assert_eq!(answers("\n").quality_tier(), QualityTier::Medium);
    assert_eq!(answers("ultra\n").quality_tier(), QualityTier::Medium);
}

#[test]
fn subtitle_choice_must_exist() {
    let streams = vec![SubtitleStream {
        index: 3,
        ordinal: 0,
        codec: Some("subrip".into()),
        language: Some("eng".into()),
        title: None,
    }];
    let src = Path::new("show.mkv");
    assert_eq!(answers("1\n").subtitle_track(src, &streams), Some(0));
    assert_eq!(answers("#0\n").subtitle_track(src, &streams), Some(0));
    assert_eq!(answers("0\n").subtitle_track(src, &streams), None);
    assert_eq!(answers("4\n").subtitle_track(src, &streams), None);
    assert_eq!(answers("\n").subtitle_track(src, &streams), None);
}

#[test]
fn conflict_defaults_on_blank() {
    let target = PathBuf::from("clip.mp4");
    assert_eq!(
        answers("s\n").conflict_policy(&target, ConflictPolicy::Backup),
        ConflictPolicy::Skip
    );
    assert_eq!(
        answers("0\n").conflict_policy(&target, ConflictPolicy::Backup),
        ConflictPolicy::Overwrite
    );
    assert_eq!(
        answers("\n").conflict_policy(&target, ConflictPolicy::Skip),
        ConflictPolicy::Skip
    );
}

#[test]
fn upload_needs_explicit_yes() {
    assert!(answers("y\n").confirm_upload(&report()));
    assert!(!answers("\n").confirm_upload(&report()));
    assert!(!answers("").confirm_upload(&report()));
}

#[test]
fn assume_yes_never_reads_input() {
    let d = TerminalDecisions::new(Cursor::new(Vec::new()), true, false);
    assert!(d.confirm_upload(&report()));
    assert!(!d.confirm_conversion(&[]));
    assert_eq!(d.deletion_choice(Path::new("x.avi")), DeletionChoice::KeepAll);
    assert_eq!(d.quality_tier(), QualityTier::Medium);

    let forced = TerminalDecisions::new(Cursor::new(Vec::new()), true, true);
    assert!(forced.confirm_conversion(&[]));
}

#[test]
fn credential_is_trimmed_line() {
    assert_eq!(
        answers("  123:abc  \n").credential("Bot token").as_deref(),
        Some("123:abc")
    );
    assert_eq!(answers("\n").credential("Bot token"), None);
}
