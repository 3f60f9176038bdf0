//! Classification rating engine.
//!
//! Replays dated, scored events through a bounded rolling window and derives
//! a trimmed-mean rating, its history, and the score a competitor needs on
//! their next event to reach a target rating.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;
use tracing::{debug, trace};

/// Class label reported for ratings below every configured band.
pub const UNCLASSIFIED: &str = "U";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RatingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// One scored competition result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub occurred_on: Date,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_rate: Option<f64>,
}

impl EventRecord {
    #[must_use]
    pub fn new(occurred_on: Date, score: f64) -> Self {
        Self {
            occurred_on,
            event_key: None,
            score,
            origin: None,
            status_flag: None,
            raw_rate: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, event_key: impl Into<String>) -> Self {
        self.event_key = Some(event_key.into());
        self
    }

    #[must_use]
    pub fn with_status_flag(mut self, status_flag: impl Into<String>) -> Self {
        self.status_flag = Some(status_flag.into());
        self
    }

    /// Checks structural well-formedness of a record loaded from an
    /// untyped source.
    ///
    /// # Errors
    /// Returns [`RatingError::Validation`] when the score or raw rate is not
    /// finite, or when an optional text field is present but blank.
    pub fn validate(&self) -> Result<(), RatingError> {
        if !self.score.is_finite() {
            return Err(RatingError::Validation(
                "score MUST be a finite number".to_string(),
            ));
        }

        for (name, value) in [
            ("event_key", self.event_key.as_deref()),
            ("status_flag", self.status_flag.as_deref()),
        ] {
            if value.is_some_and(|raw| raw.trim().is_empty()) {
                return Err(RatingError::Validation(format!(
                    "{name} MUST NOT be blank when present"
                )));
            }
        }

        if self.raw_rate.is_some_and(|rate| !rate.is_finite()) {
            return Err(RatingError::Validation(
                "raw_rate MUST be a finite number when present".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClassBand {
    pub label: String,
    pub threshold: f64,
}

impl ClassBand {
    fn new(label: &str, threshold: f64) -> Self {
        Self {
            label: label.to_string(),
            threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassStanding {
    pub current_class: String,
    pub next_class: Option<String>,
    pub next_threshold: Option<f64>,
}

/// Capacity and trim parameters carried by every [`RollingWindow`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct WindowRules {
    pub capacity: usize,
    pub min_scored: usize,
    pub max_dropped: usize,
}

impl WindowRules {
    /// Number of scores averaged once the window is full.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.capacity.saturating_sub(self.max_dropped)
    }
}

impl Default for WindowRules {
    fn default() -> Self {
        Self {
            capacity: 8,
            min_scored: 4,
            max_dropped: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RatingScheme {
    pub scheme_version: u32,
    pub window_capacity: usize,
    pub min_scored: usize,
    pub max_dropped: usize,
    pub excluded_flags: Vec<String>,
    pub single_event_cap: f64,
    pub class_bands: Vec<ClassBand>,
}

impl Default for RatingScheme {
    fn default() -> Self {
        Self::uspsa()
    }
}

impl RatingScheme {
    /// Best 6 of the last 8, scorable from 4 results.
    #[must_use]
    pub fn uspsa() -> Self {
        let rules = WindowRules::default();
        Self {
            scheme_version: 1,
            window_capacity: rules.capacity,
            min_scored: rules.min_scored,
            max_dropped: rules.max_dropped,
            // administratively voided, disqualified, did not fire
            excluded_flags: vec!["A".to_string(), "D".to_string(), "N".to_string()],
            single_event_cap: 100.0,
            class_bands: vec![
                ClassBand::new("GM", 95.0),
                ClassBand::new("M", 85.0),
                ClassBand::new("A", 75.0),
                ClassBand::new("B", 60.0),
                ClassBand::new("C", 40.0),
                ClassBand::new("D", 2.0),
            ],
        }
    }

    /// Validates window bounds, flag codes and class bands.
    ///
    /// # Errors
    /// Returns [`RatingError::Configuration`] when one or more scheme
    /// fields are outside allowed bounds.
    pub fn validate(&self) -> Result<(), RatingError> {
        if self.scheme_version == 0 {
            return Err(RatingError::Configuration(
                "scheme_version MUST be >= 1".to_string(),
            ));
        }

        if self.window_capacity == 0 {
            return Err(RatingError::Configuration(
                "window_capacity MUST be >= 1".to_string(),
            ));
        }

        if self.min_scored == 0 || self.min_scored > self.window_capacity {
            return Err(RatingError::Configuration(
                "min_scored MUST be in [1, window_capacity]".to_string(),
            ));
        }

        if self.max_dropped >= self.window_capacity {
            return Err(RatingError::Configuration(
                "max_dropped MUST be < window_capacity".to_string(),
            ));
        }

        if !self.single_event_cap.is_finite() || self.single_event_cap <= 0.0 {
            return Err(RatingError::Configuration(
                "single_event_cap MUST be a positive finite number".to_string(),
            ));
        }

        if self.excluded_flags.iter().any(|flag| flag.trim().is_empty()) {
            return Err(RatingError::Configuration(
                "excluded_flags MUST NOT contain blank codes".to_string(),
            ));
        }

        let mut labels = BTreeSet::new();
        for band in &self.class_bands {
            if band.label.trim().is_empty() || band.label == UNCLASSIFIED {
                return Err(RatingError::Configuration(format!(
                    "class band label {:?} is blank or reserved",
                    band.label
                )));
            }
            if !band.threshold.is_finite() {
                return Err(RatingError::Configuration(format!(
                    "class band {} threshold MUST be finite",
                    band.label
                )));
            }
            if !labels.insert(band.label.as_str()) {
                return Err(RatingError::Configuration(format!(
                    "duplicate class band label {}",
                    band.label
                )));
            }
        }

        Ok(())
    }

    /// Decodes and validates a scheme from JSON. Omitted fields keep their
    /// [`RatingScheme::uspsa`] values.
    ///
    /// # Errors
    /// Returns [`RatingError::Configuration`] when JSON decoding fails
    /// or decoded values violate scheme constraints.
    pub fn from_json(value: &Value) -> Result<Self, RatingError> {
        let scheme: Self = serde_json::from_value(value.clone()).map_err(|err| {
            RatingError::Configuration(format!("invalid rating scheme JSON payload: {err}"))
        })?;
        scheme.validate()?;
        Ok(scheme)
    }

    #[must_use]
    pub fn window_rules(&self) -> WindowRules {
        WindowRules {
            capacity: self.window_capacity,
            min_scored: self.min_scored,
            max_dropped: self.max_dropped,
        }
    }

    /// Number of scores averaged once the window is full.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.window_rules().accepted_count()
    }

    /// A record without a status flag always counts.
    #[must_use]
    pub fn is_eligible(&self, record: &EventRecord) -> bool {
        match record.status_flag.as_deref() {
            Some(flag) => !self.excluded_flags.iter().any(|excluded| excluded == flag),
            None => true,
        }
    }

    #[must_use]
    pub fn class_for(&self, rating: f64) -> &str {
        self.bands_descending()
            .into_iter()
            .find(|band| rating >= band.threshold)
            .map_or(UNCLASSIFIED, |band| band.label.as_str())
    }

    #[must_use]
    pub fn standing(&self, rating: f64) -> ClassStanding {
        let mut next: Option<&ClassBand> = None;
        for band in self.bands_descending() {
            if rating >= band.threshold {
                return standing_with(&band.label, next);
            }
            next = Some(band);
        }
        standing_with(UNCLASSIFIED, next)
    }

    fn bands_descending(&self) -> Vec<&ClassBand> {
        let mut bands: Vec<&ClassBand> = self.class_bands.iter().collect();
        bands.sort_by(|lhs, rhs| rhs.threshold.total_cmp(&lhs.threshold));
        bands
    }
}

fn standing_with(current_class: &str, next: Option<&ClassBand>) -> ClassStanding {
    ClassStanding {
        current_class: current_class.to_string(),
        next_class: next.map(|band| band.label.clone()),
        next_threshold: next.map(|band| band.threshold),
    }
}

/// Canonical order: date ascending, then score ascending.
#[must_use]
pub fn compare_records(lhs: &EventRecord, rhs: &EventRecord) -> Ordering {
    lhs.occurred_on
        .cmp(&rhs.occurred_on)
        .then_with(|| lhs.score.total_cmp(&rhs.score))
}

/// Stable sort by [`compare_records`]; full ties keep their input order.
#[must_use]
pub fn sort_records(records: &[EventRecord]) -> Vec<EventRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(compare_records);
    sorted
}

/// Bounded window over the most recent eligible records.
///
/// Windows are values: [`RollingWindow::append`] returns a new window and
/// leaves the receiver untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollingWindow {
    rules: WindowRules,
    entries: Vec<EventRecord>,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(WindowRules::default())
    }
}

impl RollingWindow {
    #[must_use]
    pub fn new(rules: WindowRules) -> Self {
        Self {
            rules,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn rules(&self) -> WindowRules {
        self.rules
    }

    #[must_use]
    pub fn entries(&self) -> &[EventRecord] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&EventRecord> {
        self.entries.last()
    }

    #[must_use]
    pub fn can_score(&self) -> bool {
        self.entries.len() >= self.rules.min_scored
    }

    /// Returns the window that results from absorbing `record`.
    ///
    /// A keyed record first removes any entry with the same key. If the
    /// window is still full, the entry in the first slot is evicted. The
    /// record is then placed last.
    #[must_use]
    pub fn append(&self, record: EventRecord) -> Self {
        let mut entries: Vec<EventRecord> = match record.event_key.as_deref() {
            Some(key) => self
                .entries
                .iter()
                .filter(|entry| entry.event_key.as_deref() != Some(key))
                .cloned()
                .collect(),
            None => self.entries.clone(),
        };

        if entries.len() < self.entries.len() {
            trace!(event_key = ?record.event_key, "replaced prior result for key");
        }

        let overflow = (entries.len() + 1)
            .saturating_sub(self.rules.capacity)
            .min(entries.len());
        if overflow > 0 {
            trace!(evicted = overflow, "window full, evicting oldest slot");
            entries.drain(..overflow);
        }

        entries.push(record);
        Self {
            rules: self.rules,
            entries,
        }
    }

    /// How many of the lowest scores the trimmed mean discards.
    #[must_use]
    pub fn drop_count(&self) -> usize {
        self.rules
            .max_dropped
            .min(self.entries.len().saturating_sub(self.rules.min_scored))
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rating_percentage(&self) -> Option<f64> {
        if !self.can_score() {
            return None;
        }

        let mut scores: Vec<f64> = self.entries.iter().map(|entry| entry.score).collect();
        scores.sort_by(f64::total_cmp);
        let kept = &scores[self.drop_count()..];
        if kept.is_empty() {
            return None;
        }

        Some(kept.iter().sum::<f64>() / kept.len() as f64)
    }
}

/// Rating captured when a record entered a scorable window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationSnapshot {
    pub date: Date,
    pub percentage: f64,
}

/// Replays every eligible record and collects a snapshot after each append
/// that leaves the window scorable.
#[must_use]
pub fn classification_history(
    records: &[EventRecord],
    scheme: &RatingScheme,
) -> Vec<ClassificationSnapshot> {
    let mut snapshots = Vec::new();
    replay(records, scheme, |window| {
        if let (Some(latest), Some(percentage)) = (window.latest(), window.rating_percentage()) {
            snapshots.push(ClassificationSnapshot {
                date: latest.occurred_on,
                percentage,
            });
        }
    });
    snapshots
}

#[must_use]
pub fn current_window(records: &[EventRecord], scheme: &RatingScheme) -> RollingWindow {
    replay(records, scheme, |_| {})
}

#[must_use]
pub fn current_rating(records: &[EventRecord], scheme: &RatingScheme) -> Option<f64> {
    current_window(records, scheme).rating_percentage()
}

fn replay<F>(records: &[EventRecord], scheme: &RatingScheme, mut on_append: F) -> RollingWindow
where
    F: FnMut(&RollingWindow),
{
    let mut skipped = 0_usize;
    let window = sort_records(records).into_iter().fold(
        RollingWindow::new(scheme.window_rules()),
        |window, record| {
            if !scheme.is_eligible(&record) {
                trace!(
                    occurred_on = %record.occurred_on,
                    status_flag = ?record.status_flag,
                    "skipping ineligible record"
                );
                skipped += 1;
                return window;
            }

            let next = window.append(record);
            on_append(&next);
            next
        },
    );

    debug!(
        records = records.len(),
        skipped,
        window_len = window.len(),
        "replayed classification history"
    );
    window
}

/// Minimum score on the next event that lifts the rating to `target_rating`.
///
/// Returns `None` when the history cannot produce a rating yet or the
/// target is not finite, and `0.0` when the target is already met. Values
/// above the scheme's `single_event_cap` are returned as is.
#[must_use]
pub fn score_needed(
    records: &[EventRecord],
    target_rating: f64,
    replacing_key: Option<&str>,
    scheme: &RatingScheme,
) -> Option<f64> {
    score_needed_for_window(
        &current_window(records, scheme),
        target_rating,
        replacing_key,
    )
}

/// Same as [`score_needed`] for an already reconstructed window. Capacity
/// and accepted count come from the window's own rules.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_needed_for_window(
    window: &RollingWindow,
    target_rating: f64,
    replacing_key: Option<&str>,
) -> Option<f64> {
    if !target_rating.is_finite() {
        return None;
    }
    let current = window.rating_percentage()?;
    if current >= target_rating {
        return Some(0.0);
    }

    let mut remaining: Vec<&EventRecord> = window
        .entries()
        .iter()
        .filter(|entry| replacing_key.is_none() || entry.event_key.as_deref() != replacing_key)
        .collect();

    if remaining.len() == window.rules().capacity {
        let oldest = remaining
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.occurred_on)
            .map(|(index, _)| index);
        if let Some(index) = oldest {
            remaining.remove(index);
        }
    }

    let accepted = window.rules().accepted_count();
    let mut scores: Vec<f64> = remaining.iter().map(|entry| entry.score).collect();
    scores.sort_by(f64::total_cmp);
    let counted = &scores[scores.len().saturating_sub(accepted.saturating_sub(1))..];
    let needed = target_rating * accepted as f64 - counted.iter().sum::<f64>();

    debug!(
        current,
        target_rating,
        replacing_key = ?replacing_key,
        needed,
        "projected score needed on next event"
    );

    if needed <= 0.0 {
        return Some(0.0);
    }
    Some(needed)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NextClassProjection {
    pub current_rating: f64,
    pub standing: ClassStanding,
    pub score_needed: Option<f64>,
    pub achievable: Option<bool>,
}

/// Projects what the next event must score to reach the next class band.
///
/// Returns `None` when the history cannot produce a rating yet. At the top
/// band the projection carries no needed score.
#[must_use]
pub fn project_next_class(
    records: &[EventRecord],
    replacing_key: Option<&str>,
    scheme: &RatingScheme,
) -> Option<NextClassProjection> {
    let window = current_window(records, scheme);
    let current_rating = window.rating_percentage()?;
    let standing = scheme.standing(current_rating);

    let score_needed = standing
        .next_threshold
        .and_then(|threshold| score_needed_for_window(&window, threshold, replacing_key));

    Some(NextClassProjection {
        current_rating,
        standing,
        score_needed,
        achievable: score_needed.map(|needed| needed <= scheme.single_event_cap),
    })
}
