//! Anomaly verdict aggregation
//!
//! Merges the per-category scorer output into the final malicious/benign
//! decision. Pure; no I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::categories::Category;
use super::collab::StageFailure;

/// How many categories the verdict keeps as evidence
const TOP_CATEGORIES: usize = 3;

/// One category's scorer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,

    /// Mean reconstruction error over the traced units
    pub avg_error: f64,

    /// Standard deviation of the per-unit error distribution
    pub sigma: f64,

    /// mean + 3*sigma of the per-unit error distribution
    pub threshold: f64,

    /// Up to 10 syscall names ranked by mean absolute reconstruction
    /// contribution, descending
    pub top_syscalls: Vec<String>,
}

/// The final decision plus its supporting per-category evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub malicious: bool,

    /// Highest-error categories, descending; at most three
    pub top_categories: Vec<Category>,

    /// avg_error per selected category
    pub scores: BTreeMap<Category, f64>,

    /// threshold per selected category
    pub thresholds: BTreeMap<Category, f64>,

    /// Salient syscalls per selected category, carried through from the
    /// scorer unchanged
    pub top_syscalls: BTreeMap<Category, Vec<String>>,
}

/// Merge the available category scores into a verdict.
///
/// `scores` must be in category declaration order; the ranking is stable, so
/// avg_error ties keep that order. A category contributes to a malicious
/// verdict when its avg_error is at or below its own threshold.
pub fn aggregate(mut scores: Vec<CategoryScore>) -> Result<Verdict, StageFailure> {
    if scores.is_empty() {
        return Err(StageFailure::NoCategories);
    }

    scores.sort_by(|a, b| {
        b.avg_error
            .partial_cmp(&a.avg_error)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scores.truncate(TOP_CATEGORIES);

    let malicious = scores.iter().any(|s| s.avg_error <= s.threshold);

    let mut verdict = Verdict {
        malicious,
        top_categories: Vec::with_capacity(scores.len()),
        scores: BTreeMap::new(),
        thresholds: BTreeMap::new(),
        top_syscalls: BTreeMap::new(),
    };

    for score in scores {
        verdict.top_categories.push(score.category);
        verdict.scores.insert(score.category, score.avg_error);
        verdict.thresholds.insert(score.category, score.threshold);
        verdict.top_syscalls.insert(score.category, score.top_syscalls);
    }

    Ok(verdict)
}
