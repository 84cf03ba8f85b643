// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Progress bar over the households of a pass.
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use log::{log_enabled, Level};

/// The bar is refreshed each UPDATE households.
const UPDATE: u64 = 500;

/// A progress bar shared by the workers.
///
/// The bar is hidden when Info-level logging is disabled.
#[derive(Debug, Clone)]
pub struct RunProgressBar {
    bp: ProgressBar,
    current: Arc<AtomicU64>,
}

impl RunProgressBar {
    /// Returns a [RunProgressBar] of given length.
    pub fn new(length: usize) -> Self {
        let bp = if log_enabled!(Level::Info) {
            ProgressBar::new(length as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template("{bar:40} {msg} ({eta})") {
            bp.set_style(style);
        }
        RunProgressBar {
            bp,
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sets a message to the [RunProgressBar].
    pub fn set_message(&self, msg: impl Into<Cow<'static, str>>) {
        self.bp.set_message(msg);
    }

    /// Increments the progress bar by one.
    ///
    /// The bar is refreshed only periodically.
    pub fn inc(&self) {
        let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        if current % UPDATE == 0 {
            self.bp.inc(UPDATE);
        }
    }

    /// Sets the progress bar to finished.
    pub fn finish(&self) {
        self.bp.finish_and_clear();
    }
}
