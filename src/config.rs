use std::env;

use crate::{error::HeapError, freelist::FitPolicy};

/// Address space reserved by default for a heap backed by the operating system.
pub const DEFAULT_CAPACITY: usize = 1 << 30;

/// How a [`crate::Heap`] is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Block selection rule, fixed for the life of the heap.
    pub policy: FitPolicy,
    /// Upper bound on how far a [`crate::kernel::Reserved`] region can grow.
    pub capacity: usize,
    /// Print the statistics report when the heap is dropped.
    pub report_at_exit: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            policy: FitPolicy::default(),
            capacity: DEFAULT_CAPACITY,
            report_at_exit: true,
        }
    }
}

impl HeapConfig {
    pub const POLICY_VAR: &'static str = "HEAPFIT_POLICY";
    pub const CAPACITY_VAR: &'static str = "HEAPFIT_CAPACITY";
    pub const REPORT_VAR: &'static str = "HEAPFIT_REPORT";

    pub fn with_policy(mut self, policy: FitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_report(mut self, report_at_exit: bool) -> Self {
        self.report_at_exit = report_at_exit;
        self
    }

    /// Defaults overridden by `HEAPFIT_POLICY`, `HEAPFIT_CAPACITY` (bytes)
    /// and `HEAPFIT_REPORT` (`0`/`1`/`true`/`false`).
    pub fn from_env() -> Result<Self, HeapError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, HeapError> {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::POLICY_VAR) {
            config.policy = value.parse()?;
        }

        if let Some(value) = lookup(Self::CAPACITY_VAR) {
            config.capacity = value
                .trim()
                .parse()
                .ok()
                .filter(|&capacity| capacity > 0)
                .ok_or(HeapError::InvalidConfig { var: Self::CAPACITY_VAR, value })?;
        }

        if let Some(value) = lookup(Self::REPORT_VAR) {
            config.report_at_exit = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(HeapError::InvalidConfig { var: Self::REPORT_VAR, value }),
            };
        }

        Ok(config)
    }
}
