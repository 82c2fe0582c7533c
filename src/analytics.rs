//! Practice analytics: per-tag statistics, weak/strong tags and a training
//! plan. Everything is recomputed from stored rows on every call.

use crate::error::Result;
use crate::model::{Platform, RatingChange, SubmissionRecord, before};
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Tags checked for "never tried" when picking weak areas.
pub const COMMON_TAGS: &[&str] = &[
    "dp",
    "greedy",
    "math",
    "graphs",
    "binary search",
    "sorting",
    "trees",
    "strings",
    "number theory",
    "geometry",
    "data structures",
    "implementation",
    "brute force",
    "constructive algorithms",
    "two pointers",
    "dfs and similar",
    "bitmasks",
    "combinatorics",
    "dsu",
    "shortest paths",
    "hashing",
    "divide and conquer",
];

const STRONG_LIMIT: usize = 5;
const WEAK_LIMIT: usize = 5;
const NEVER_TRIED_LIMIT: usize = 3;
const SUGGESTED_PER_TAG: u32 = 2;
const RECENT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagStats {
    /// Distinct problems solved with this tag.
    pub solved_count: u32,
    /// Submissions carrying this tag.
    pub attempts: u32,
    /// Accepted submissions carrying this tag.
    pub accepted: u32,
    /// `accepted / attempts`, 0.0 when there are no attempts.
    pub accuracy: f64,
    /// Mean rating of solved problems that have one.
    pub avg_rating: Option<f64>,
}

/// Per-tag statistics over `submissions`. Tags are lower-cased and trimmed.
#[must_use]
pub fn tag_stats(submissions: &[SubmissionRecord]) -> BTreeMap<String, TagStats> {
    #[derive(Default)]
    struct Acc {
        attempts: u32,
        accepted: u32,
        solved: BTreeMap<(Platform, String), Option<u32>>,
    }

    let mut acc: BTreeMap<String, Acc> = BTreeMap::new();
    for sub in submissions {
        for tag in normalized_tags(&sub.tags) {
            let entry = acc.entry(tag).or_default();
            entry.attempts += 1;
            if sub.verdict.is_accepted() {
                entry.accepted += 1;
                entry
                    .solved
                    .insert((sub.platform, sub.problem_id.clone()), sub.rating);
            }
        }
    }

    acc.into_iter()
        .map(|(tag, a)| {
            let rated: Vec<u32> = a.solved.values().filter_map(|r| *r).collect();
            let avg_rating = (!rated.is_empty())
                .then(|| rated.iter().map(|r| f64::from(*r)).sum::<f64>() / rated.len() as f64);
            let stats = TagStats {
                solved_count: a.solved.len() as u32,
                attempts: a.attempts,
                accepted: a.accepted,
                accuracy: if a.attempts == 0 {
                    0.0
                } else {
                    f64::from(a.accepted) / f64::from(a.attempts)
                },
                avg_rating,
            };
            (tag, stats)
        })
        .collect()
}

fn normalized_tags(tags: &BTreeSet<String>) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Tag statistics over the last `window_days` days.
pub fn weak_strong_tags(
    store: &StateStore,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, TagStats>> {
    let since = before(now, TimeDelta::days(i64::from(window_days)));
    Ok(tag_stats(&store.submissions_since(since)?))
}

/// Strongest and weakest areas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagProfile {
    pub strong: Vec<String>,
    pub weak: Vec<String>,
}

/// Rank tags into strong and weak lists.
///
/// Strong: most problems solved, ties broken by higher average rating.
/// Weak: up to three common tags never attempted, then the least
/// practised attempted tags that are not strong.
#[must_use]
pub fn tag_profile(stats: &BTreeMap<String, TagStats>) -> TagProfile {
    if stats.is_empty() {
        return TagProfile::default();
    }

    let mut by_strength: Vec<(&String, &TagStats)> =
        stats.iter().filter(|(_, s)| s.solved_count > 0).collect();
    by_strength.sort_by(|(ta, a), (tb, b)| {
        b.solved_count
            .cmp(&a.solved_count)
            .then_with(|| rating_key(b).total_cmp(&rating_key(a)))
            .then_with(|| ta.cmp(tb))
    });
    let strong: Vec<String> = by_strength
        .iter()
        .take(STRONG_LIMIT)
        .map(|(t, _)| (*t).clone())
        .collect();

    let mut weak: Vec<String> = COMMON_TAGS
        .iter()
        .filter(|t| !stats.contains_key(**t))
        .take(NEVER_TRIED_LIMIT)
        .map(|t| (*t).to_owned())
        .collect();

    let mut by_weakness: Vec<(&String, &TagStats)> = stats
        .iter()
        .filter(|(t, _)| !strong.contains(t))
        .collect();
    by_weakness.sort_by(|(ta, a), (tb, b)| {
        a.solved_count
            .cmp(&b.solved_count)
            .then_with(|| rating_key(a).total_cmp(&rating_key(b)))
            .then_with(|| ta.cmp(tb))
    });
    weak.extend(by_weakness.into_iter().map(|(t, _)| t.clone()));
    weak.truncate(WEAK_LIMIT);

    TagProfile { strong, weak }
}

fn rating_key(stats: &TagStats) -> f64 {
    stats.avg_rating.unwrap_or(0.0)
}

/// A block of practice for one weak tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeTarget {
    pub tag: String,
    pub problems: u32,
    pub min_rating: u32,
    pub max_rating: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingPlan {
    pub weak_tags: Vec<String>,
    pub strong_tags: Vec<String>,
    /// Inclusive problem-rating range to practise in.
    pub difficulty_range: (u32, u32),
    pub targets: Vec<PracticeTarget>,
    /// Today's checklist.
    pub checklist: Vec<String>,
}

/// Problem-rating range from the best recent contest rating.
///
/// Ceiling is `max + 200` clamped to 1200..=1800 (1400 without history);
/// floor is 300 below, never under 800.
#[must_use]
pub fn difficulty_range(recent: &[RatingChange]) -> (u32, u32) {
    let best = recent.iter().map(|r| r.new_rating).max().filter(|r| *r > 0);
    let ceiling = match best {
        Some(best) => (best + 200).clamp(1200, 1800),
        None => 1400,
    };
    let floor = (ceiling - 300).max(800);
    // Both bounds are within 800..=1800.
    (floor.unsigned_abs(), ceiling.unsigned_abs())
}

/// Build a plan from a tag profile and recent rating changes.
#[must_use]
pub fn build_plan(profile: &TagProfile, recent: &[RatingChange]) -> TrainingPlan {
    let (low, high) = difficulty_range(recent);
    let targets = profile
        .weak
        .iter()
        .map(|tag| PracticeTarget {
            tag: tag.clone(),
            problems: SUGGESTED_PER_TAG,
            min_rating: low,
            max_rating: high,
        })
        .collect();

    let mut checklist = vec![format!("2 problems in {low}-{high} range")];
    checklist.extend(profile.weak.iter().take(2).map(|t| format!("1 {t} problem")));
    checklist.push("Focus on solving within 25 minutes".to_owned());

    TrainingPlan {
        weak_tags: profile.weak.clone(),
        strong_tags: profile.strong.clone(),
        difficulty_range: (low, high),
        targets,
        checklist,
    }
}

/// Training plan from stored history: tags over `window_days`, difficulty
/// from the five most recent rating changes.
pub fn training_plan(
    store: &StateStore,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<TrainingPlan> {
    let profile = tag_profile(&weak_strong_tags(store, window_days, now)?);
    let mut history = store.rating_history(None)?;
    let recent = history.split_off(history.len().saturating_sub(5));
    Ok(build_plan(&profile, &recent))
}

/// Accepted solves over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeSummary {
    pub window_days: u32,
    pub total_solved: usize,
    pub by_platform: BTreeMap<Platform, usize>,
    /// Most recent accepted submissions, newest first.
    pub recent: Vec<SubmissionRecord>,
}

pub fn practice_summary(
    store: &StateStore,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<PracticeSummary> {
    let since = before(now, TimeDelta::days(i64::from(window_days)));
    let accepted: Vec<SubmissionRecord> = store
        .submissions_since(since)?
        .into_iter()
        .filter(|s| s.verdict.is_accepted())
        .collect();

    let mut by_platform = BTreeMap::new();
    for sub in &accepted {
        *by_platform.entry(sub.platform).or_insert(0) += 1;
    }

    Ok(PracticeSummary {
        window_days,
        total_solved: accepted.len(),
        by_platform,
        recent: accepted.into_iter().take(RECENT_LIMIT).collect(),
    })
}
