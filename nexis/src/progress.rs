//! Global progress bar management
//!
//! A single `MultiProgress` shared by the batch progress bar and model
//! downloads, so neither has to thread it through function parameters.

use indicatif::MultiProgress;
use once_cell::sync::Lazy;
use std::sync::Arc;

static MULTI: Lazy<Arc<MultiProgress>> = Lazy::new(|| Arc::new(MultiProgress::new()));

/// Cheap clone of the global `MultiProgress` handle.
pub fn global_mp() -> Arc<MultiProgress> {
    MULTI.clone()
}

pub fn add_progress_bar(pb: indicatif::ProgressBar) {
    global_mp().add(pb);
}

pub fn remove_progress_bar(pb: &indicatif::ProgressBar) {
    global_mp().remove(pb);
}
