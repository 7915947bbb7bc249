//! Memory budget shared by the caches of one registry
//!
//! The registry syncs the summed usage of its first-class caches into a
//! [`MemoryBudget`] before every cleanup pass. The budget classifies that
//! usage against configurable watermarks and computes how much the cleanup
//! pass has to reclaim.

use std::sync::atomic::{AtomicUsize, Ordering};

const MB: usize = 1024 * 1024;

/// How close cache usage is to the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Low,
    Moderate,
    High,
    Critical,
}

impl MemoryPressure {
    /// Classify a utilization ratio against the default watermarks.
    pub fn from_utilization(utilization: f64) -> Self {
        MemoryBudgetConfig::default().pressure_at(utilization)
    }

    /// High and critical pressure call for a cleanup pass.
    pub fn needs_eviction(&self) -> bool {
        *self >= MemoryPressure::High
    }
}

/// Budget size and utilization watermarks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudgetConfig {
    /// Bytes available to all first-class caches together
    pub total_budget: usize,

    /// Utilization at which pressure becomes moderate
    pub moderate_watermark: f64,

    /// Utilization at which pressure becomes high and cleanup starts
    pub high_watermark: f64,

    /// Utilization at which pressure becomes critical
    pub critical_watermark: f64,

    /// Utilization a cleanup pass reclaims down to
    pub target_utilization: f64,
}

impl Default for MemoryBudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 256 * MB,
            moderate_watermark: 0.50,
            high_watermark: 0.75,
            critical_watermark: 0.90,
            target_utilization: 0.70,
        }
    }
}

impl MemoryBudgetConfig {
    /// Default watermarks over a budget of `total_budget_mb` megabytes.
    pub fn new(total_budget_mb: usize) -> Self {
        Self {
            total_budget: total_budget_mb * MB,
            ..Default::default()
        }
    }

    /// Clamped to [0, 1].
    pub fn with_target_utilization(mut self, target: f64) -> Self {
        self.target_utilization = target.clamp(0.0, 1.0);
        self
    }

    /// Set the high and critical watermarks. Both are clamped to [0, 1] and
    /// the critical watermark is never below the high one.
    pub fn with_watermarks(mut self, high: f64, critical: f64) -> Self {
        self.high_watermark = high.clamp(0.0, 1.0);
        self.critical_watermark = critical.clamp(self.high_watermark, 1.0);
        self
    }

    /// Usage in bytes a cleanup pass aims for
    pub fn target_bytes(&self) -> usize {
        (self.total_budget as f64 * self.target_utilization) as usize
    }

    pub fn pressure_at(&self, utilization: f64) -> MemoryPressure {
        if utilization >= self.critical_watermark {
            MemoryPressure::Critical
        } else if utilization >= self.high_watermark {
            MemoryPressure::High
        } else if utilization >= self.moderate_watermark {
            MemoryPressure::Moderate
        } else {
            MemoryPressure::Low
        }
    }
}

/// Usage tracker for one budget
///
/// # Example
///
/// ```
/// use tilescene_cache::memory_budget::{MemoryBudget, MemoryBudgetConfig, MemoryPressure};
///
/// let budget = MemoryBudget::new(MemoryBudgetConfig::new(100).with_target_utilization(0.5));
///
/// budget.set_usage(80 * 1024 * 1024);
/// assert_eq!(budget.pressure(), MemoryPressure::High);
/// assert_eq!(budget.bytes_to_evict(), 30 * 1024 * 1024);
/// ```
#[derive(Debug)]
pub struct MemoryBudget {
    config: MemoryBudgetConfig,
    usage: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            config,
            usage: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_limit_mb(total_mb: usize) -> Self {
        Self::new(MemoryBudgetConfig::new(total_mb))
    }

    pub fn config(&self) -> &MemoryBudgetConfig {
        &self.config
    }

    /// Bytes in use as of the last sync
    pub fn current_usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    /// Highest usage ever synced
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn total_budget(&self) -> usize {
        self.config.total_budget
    }

    /// Usage relative to the budget; zero for an empty budget.
    pub fn utilization(&self) -> f64 {
        match self.config.total_budget {
            0 => 0.0,
            total => self.current_usage() as f64 / total as f64,
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        self.config.pressure_at(self.utilization())
    }

    pub fn needs_eviction(&self) -> bool {
        self.pressure().needs_eviction()
    }

    /// Overwrite usage with the total measured on the cache graph.
    pub fn set_usage(&self, bytes: usize) {
        self.usage.store(bytes, Ordering::Relaxed);
        self.peak.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Subtract bytes a cache released, saturating at zero.
    pub fn record_deallocation(&self, bytes: usize) {
        let _ = self
            .usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |usage| {
                Some(usage.saturating_sub(bytes))
            });
    }

    /// Bytes above the cleanup target, or zero.
    pub fn bytes_to_evict(&self) -> usize {
        self.current_usage().saturating_sub(self.config.target_bytes())
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(MemoryBudgetConfig::default())
    }
}
