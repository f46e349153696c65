//! Memory pressure levels and the cache share each one retains
//!
//! The host reports pressure either as a utilization ratio of its own budget
//! or as a discrete trim level; both map onto `MemoryPressure`, which in turn
//! decides which fraction of the bitmap cache budget survives a trim.

/// Memory pressure level indicating cache health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (> 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization.is_nan() || utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Map a host trim level (0 = none, 1 = moderate, 2 = low memory,
    /// 3 and above = critical)
    pub fn from_trim_level(level: u8) -> Self {
        match level {
            0 => MemoryPressure::Low,
            1 => MemoryPressure::Moderate,
            2 => MemoryPressure::High,
            _ => MemoryPressure::Critical,
        }
    }

    /// Fraction of the cache budget to keep when trimming at this level
    pub fn retain_fraction(&self) -> f64 {
        match self {
            MemoryPressure::Low => 1.0,
            MemoryPressure::Moderate => 0.75,
            MemoryPressure::High => 0.5,
            MemoryPressure::Critical => 0.0,
        }
    }

    /// Returns true if memory pressure requires action (High or Critical)
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}
