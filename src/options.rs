//! Knobs for a pass, supplied by the driver.

/// Available processors, never less than one.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of commands running at once.
    pub parallelism: usize,
    /// Report why each node was found dirty, through Progress::node_dirty.
    pub explain: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: default_parallelism(),
            explain: false,
        }
    }
}

impl Options {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}
