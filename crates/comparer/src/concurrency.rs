//! Thread planning for the scorer

use crate::config::Config;

/// Threads handed to the scorer: the configured count, or one per logical
/// core when the configuration says 0
pub fn resolve_scorer_threads(configured: u32) -> u32 {
    if configured > 0 {
        configured
    } else {
        (num_cpus::get() as u32).max(1)
    }
}

/// Scorer threads derived from a loaded configuration
pub fn scorer_threads(cfg: &Config) -> u32 {
    resolve_scorer_threads(cfg.scorer.threads)
}
