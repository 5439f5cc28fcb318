use log::{log_enabled, Level};
use std::time::Instant;

/// Simple scoped timer for profiling pipeline phases at trace level.
pub struct ScopedTimer<'a> {
    label: &'a str,
    start: Option<Instant>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(label: &'a str) -> Self {
        let start = if log_enabled!(Level::Trace) {
            log::trace!("start {label}");
            Some(Instant::now())
        } else {
            None
        };
        Self { label, start }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            log::trace!("end {} ({} µs)", self.label, start.elapsed().as_micros());
        }
    }
}
