//! Store configuration.

/// Options passed to `Store::open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Emit per-key diagnostics for batch operations and scans.
    pub verbose: bool,
}

impl StoreOptions {
    /// Default options: quiet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
