//! Console progress output.
//!
//! stdout carries only this text; logs go to stderr.

use std::io::Write;

use kube_roll_replacer::{CycleState, ReplaceObserver};
use parking_lot::Mutex;

/// Prints rolling progress in the classic `kube-roll` format.
///
/// ```text
/// --> Listing pods with label app=web in namespace "default"
///     web-1, web-2
/// ====> Delete web-1....
/// ====> Delete web-2...
/// ```
pub struct ConsolePrinter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> ConsolePrinter<W> {
    /// Create a printer writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Announce the listing that starts a run.
    pub fn header(&self, label: &str, namespace: &str) {
        self.emit(format_args!(
            "--> Listing pods with label {label} in namespace {namespace:?}\n"
        ));
    }

    /// Write free-form text followed by a newline.
    pub fn line(&self, text: &str) {
        self.emit(format_args!("{text}\n"));
    }

    /// Consume the printer and return the writer.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn emit(&self, args: std::fmt::Arguments<'_>) {
        let mut out = self.out.lock();
        // A closed stdout must not abort the run.
        let _ = out.write_fmt(args).and_then(|()| out.flush());
    }
}

impl<W: Write + Send> ReplaceObserver for ConsolePrinter<W> {
    fn on_snapshot(&self, pods: &[String]) {
        self.emit(format_args!("    {}\n", pods.join(", ")));
    }

    fn on_delete(&self, pod: &str) {
        self.emit(format_args!("====> Delete {pod}."));
    }

    fn on_poll_tick(&self, _pod: &str, state: CycleState) {
        if state == CycleState::WaitingForTermination {
            self.emit(format_args!("."));
        }
    }

    fn on_state(&self, _pod: &str, state: CycleState) {
        if state == CycleState::WaitingForReadyReplacement {
            self.emit(format_args!("\n"));
        }
    }
}
