//! Progress reporting sink.

/// Fire-and-forget progress callback.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, current: usize, total: usize);
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _current: usize, _total: usize) {}
}

/// Logs progress at `info` every `every` steps and on completion.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
    every: usize,
}

impl LogProgress {
    pub fn new(label: impl Into<String>, every: usize) -> Self {
        Self {
            label: label.into(),
            every: every.max(1),
        }
    }
}

impl ProgressReporter for LogProgress {
    fn report(&self, current: usize, total: usize) {
        if current == total || current % self.every == 0 {
            log::info!("{}: {}/{}", self.label, current, total);
        }
    }
}
