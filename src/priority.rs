//! Priority calculator — pure scoring from a `PriorityInput` to an
//! integer score plus a breakdown for observability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{PriorityConstants, PriorityWeights};
use crate::domain::{PriorityInput, SearchType};

/// Per-factor contributions summed into the integer score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityBreakdown {
    pub base: i64,
    pub age_component: i64,
    pub duration_component: i64,
    pub user_priority_component: i64,
    pub failure_penalty: i64,
    pub gap_bonus: i64,
    pub specials_penalty: i64,
    pub file_lost_bonus: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityResult {
    pub score: i64,
    pub breakdown: PriorityBreakdown,
}

/// `ageScore = 100 · (1 − min(ageDays/3650, 1))`, with `0.5·100` when
/// `contentDate=null`. A future `contentDate` is clamped to age 0 rather
/// than going negative.
fn age_score(content_date: Option<DateTime<Utc>>, now: DateTime<Utc>, constants: &PriorityConstants) -> f64 {
    match content_date {
        None => 50.0,
        Some(date) => {
            let age_days = (now - date).num_seconds() as f64 / 86400.0;
            let age_days = age_days.max(0.0);
            let ratio = (age_days / constants.max_content_age_days as f64).min(1.0);
            100.0 * (1.0 - ratio)
        }
    }
}

/// `durationScore = 100 · min(durationDays/365, 1)`.
fn duration_score(discovered_at: DateTime<Utc>, now: DateTime<Utc>, constants: &PriorityConstants) -> f64 {
    let duration_days = ((now - discovered_at).num_seconds() as f64 / 86400.0).max(0.0);
    let ratio = (duration_days / constants.max_missing_duration_days as f64).min(1.0);
    100.0 * ratio
}

/// Decays linearly to zero over `FILE_LOST_DECAY_DAYS`.
fn file_lost_bonus(
    was_downloaded: bool,
    file_lost_at: Option<DateTime<Utc>>,
    weight: i64,
    now: DateTime<Utc>,
    constants: &PriorityConstants,
) -> f64 {
    if !was_downloaded {
        return 0.0;
    }
    let Some(lost_at) = file_lost_at else {
        return 0.0;
    };
    let elapsed_days = ((now - lost_at).num_seconds() as f64 / 86400.0).max(0.0);
    let decay_days = constants.file_lost_decay_days.max(1) as f64;
    let remaining = (1.0 - (elapsed_days / decay_days)).clamp(0.0, 1.0);
    weight as f64 * remaining
}

/// `calculatePriority(input, weights, now) -> {score, breakdown}`.
pub fn calculate_priority(
    input: &PriorityInput,
    weights: &PriorityWeights,
    constants: &PriorityConstants,
    now: DateTime<Utc>,
) -> PriorityResult {
    let age_component =
        (weights.content_age as f64 / 100.0 * age_score(input.content_date, now, constants)).round() as i64;
    let duration_component =
        (weights.missing_duration as f64 / 100.0 * duration_score(input.discovered_at, now, constants))
            .round() as i64;
    let user_priority_component =
        (weights.user_priority as f64 / 100.0 * input.user_priority_override as f64).round() as i64;
    let failure_penalty = weights.failure_penalty * input.attempt_count as i64;
    let gap_bonus = if input.search_type == SearchType::Gap {
        weights.gap_bonus
    } else {
        0
    };
    let specials_penalty = if input.season_number == Some(0) {
        weights.specials_penalty
    } else {
        0
    };
    let file_lost = file_lost_bonus(
        input.was_downloaded,
        input.file_lost_at,
        weights.file_lost_bonus,
        now,
        constants,
    )
    .round() as i64;

    let breakdown = PriorityBreakdown {
        base: constants.base_score,
        age_component,
        duration_component,
        user_priority_component,
        failure_penalty,
        gap_bonus,
        specials_penalty,
        file_lost_bonus: file_lost,
    };

    let score = breakdown.base + breakdown.age_component + breakdown.duration_component
        + breakdown.user_priority_component
        - breakdown.failure_penalty
        + breakdown.gap_bonus
        - breakdown.specials_penalty
        + breakdown.file_lost_bonus;

    PriorityResult { score, breakdown }
}

/// `comparePriority(a,b) = b.score − a.score` (descending).
pub fn compare_priority(a: &PriorityResult, b: &PriorityResult) -> std::cmp::Ordering {
    b.score.cmp(&a.score)
}
