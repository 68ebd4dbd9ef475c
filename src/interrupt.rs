//! Ctrl-C handling.
//!
//! While an answer is streaming, SIGINT only stops that stream. Anywhere else
//! it ends the process with the conventional status 130.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit status for termination by SIGINT
pub const EXIT_INTERRUPTED: i32 = 130;

static STREAMING: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide SIGINT handler.
pub fn install() -> Result<()> {
    ctrlc::set_handler(on_interrupt).context("Failed to install Ctrl-C handler")
}

fn on_interrupt() {
    if STREAMING.load(Ordering::SeqCst) {
        INTERRUPTED.store(true, Ordering::SeqCst);
        return;
    }
    eprintln!();
    std::process::exit(EXIT_INTERRUPTED);
}

/// Marks a stream as active until dropped.
#[derive(Debug)]
pub struct StreamGuard {
    _private: (),
}

/// Enter streaming mode; a Ctrl-C now sets the interrupted flag instead of exiting.
pub fn begin_stream() -> StreamGuard {
    INTERRUPTED.store(false, Ordering::SeqCst);
    STREAMING.store(true, Ordering::SeqCst);
    StreamGuard { _private: () }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        STREAMING.store(false, Ordering::SeqCst);
    }
}

/// Whether Ctrl-C arrived during the current stream
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
