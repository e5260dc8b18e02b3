//! Configuration for nests and for the local kernels of the block kinds

/// What to do with a block row or column that holds no block at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyLinePolicy {
    /// Fail construction: the extent cannot be inferred, which usually means
    /// the caller forgot a block
    #[default]
    Reject,
    /// Accept the line as a field with zero unknowns (extent 0 everywhere)
    AllowEmpty,
}

impl EmptyLinePolicy {
    pub fn allows_empty(&self) -> bool {
        matches!(self, EmptyLinePolicy::AllowEmpty)
    }
}

/// Configuration for a nested matrix
#[derive(Debug, Clone, Default)]
pub struct NestConfig {
    /// Handling of block rows/columns without any present block
    pub empty_lines: EmptyLinePolicy,

    /// Drop the staging vectors after every multiply instead of keeping them
    /// for the next call
    pub release_scratch: bool,
}

impl NestConfig {
    /// Config accepting empty block rows and columns
    pub fn allow_empty_lines() -> Self {
        Self {
            empty_lines: EmptyLinePolicy::AllowEmpty,
            ..Self::default()
        }
    }

    pub fn with_release_scratch(mut self, release: bool) -> Self {
        self.release_scratch = release;
        self
    }
}

/// Tuning for the local kernels of the concrete block kinds
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Locally owned rows above which dense kernels split rows over rayon
    pub parallel_row_threshold: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            parallel_row_threshold: 512,
        }
    }
}

impl KernelConfig {
    /// Kernels that never go parallel
    pub fn sequential() -> Self {
        Self {
            parallel_row_threshold: usize::MAX,
        }
    }
}
