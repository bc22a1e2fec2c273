//! Core library: ordering, admission, pre-flight scan, transcoding, upload orchestration.

pub mod admission;
pub mod config;
pub mod decisions;
pub mod deletion;
pub mod error;
pub mod ledger;
pub mod media;
pub mod orchestrator;
pub mod ordering;
pub mod scanner;
pub mod session;
pub mod transcode;
