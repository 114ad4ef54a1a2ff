//! Analysis configuration

use serde::{Deserialize, Serialize};

/// Knobs for one analysis session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Seed parameters from their declared types; otherwise AnyType
    pub use_declared_types: bool,
    /// Visits of a single block before its variables widen to AnyType
    pub max_block_visits: u32,
    /// Worklist pops in one routine run before the routine degrades
    pub max_iterations: usize,
    /// Cross-routine feedback rounds before remaining routines degrade
    pub max_rounds: usize,
    /// Whether [`AnalysisSession::run`](crate::session::AnalysisSession::run)
    /// uses the parallel driver
    pub parallel: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            use_declared_types: true,
            max_block_visits: 64,
            max_iterations: 10_000,
            max_rounds: 64,
            parallel: false,
        }
    }
}

impl AnalysisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable declaration seeding (useful for testing pure inference)
    pub fn ignore_declared_types(mut self) -> Self {
        self.use_declared_types = false;
        self
    }

    pub fn with_max_block_visits(mut self, visits: u32) -> Self {
        self.max_block_visits = visits.max(1);
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let options = AnalysisOptions::new()
            .ignore_declared_types()
            .with_max_block_visits(0)
            .with_max_rounds(3)
            .parallel();
        assert!(!options.use_declared_types);
        assert_eq!(options.max_block_visits, 1);
        assert_eq!(options.max_rounds, 3);
        assert!(options.parallel);
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let options: AnalysisOptions = serde_json::from_str(r#"{"max_rounds": 5}"#).unwrap();
        assert_eq!(options.max_rounds, 5);
        assert!(options.use_declared_types);
        assert_eq!(options.max_iterations, AnalysisOptions::default().max_iterations);
    }
}
