//! Episode batcher — pure decision, no I/O.

use serde::{Deserialize, Serialize};

use crate::config::BatchingConfig;
use crate::domain::SeasonStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchCommand {
    SeasonSearch,
    EpisodeSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDecision {
    pub command: SearchCommand,
    pub reason: &'static str,
}

/// Rules are evaluated in order; the first match wins.
pub fn decide_batch(stats: &SeasonStatistics, config: &BatchingConfig) -> BatchDecision {
    let missing_count = stats.missing_count();
    let missing_percent = stats.missing_percent();

    if missing_count == 0 {
        return BatchDecision {
            command: SearchCommand::EpisodeSearch,
            reason: "no_missing_episodes",
        };
    }

    if stats.next_airing.is_some() {
        return BatchDecision {
            command: SearchCommand::EpisodeSearch,
            reason: "season_currently_airing",
        };
    }

    if missing_count < config.min_missing_count as i64 || missing_percent < config.min_missing_percent {
        return BatchDecision {
            command: SearchCommand::EpisodeSearch,
            reason: "below_missing_threshold",
        };
    }

    BatchDecision {
        command: SearchCommand::SeasonSearch,
        reason: "season_fully_aired_high_missing",
    }
}
