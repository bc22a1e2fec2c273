//! Terminal front end for the uploader.
pub mod prompt;
