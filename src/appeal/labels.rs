//! Appeal label derivation from weighted, time-decayed interaction events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::types::{Event, Item, ItemId, Polarity, TrainingExample};

/// Events lose half their weight every 30 days.
pub const HALF_LIFE_DAYS: f64 = 30.0;

/// `exp(-age_days / 30 * ln 2)`.
#[must_use]
pub fn decay_weight(age_days: f64) -> f64 {
    (-age_days / HALF_LIFE_DAYS * std::f64::consts::LN_2).exp()
}

/// Whole days elapsed between `created_at` and `now`, truncated.
#[must_use]
pub fn event_age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_days()
}

/// Decayed positive and negative event mass for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventMass {
    pub positive: f64,
    pub negative: f64,
}

impl EventMass {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.positive + self.negative
    }

    /// `positive / total`, or `None` when the item has no mass at all.
    #[must_use]
    pub fn appeal_score(&self) -> Option<f64> {
        let total = self.total();
        (total > 0.0).then(|| self.positive / total)
    }

    fn add(&mut self, polarity: Polarity, weight: f64) {
        match polarity {
            Polarity::Positive => self.positive += weight,
            Polarity::Negative => self.negative += weight,
        }
    }
}

/// Folds events into per-item decayed masses. Event types without a polarity are ignored.
#[must_use]
pub fn aggregate_events<'a, I>(events: I, now: DateTime<Utc>) -> HashMap<ItemId, EventMass>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut masses: HashMap<ItemId, EventMass> = HashMap::new();
    for event in events {
        let Some(polarity) = event.event_type.polarity() else {
            continue;
        };
        #[allow(clippy::cast_precision_loss)]
        let decay = decay_weight(event_age_days(event.created_at, now) as f64);
        // magnitude only: polarity comes from the event type
        let weight = event.strength.abs() * decay;
        masses
            .entry(event.item_id.clone())
            .or_default()
            .add(polarity, weight);
    }
    masses
}

/// One example per item that has text and non-zero event mass, in item order.
#[must_use]
pub fn build_examples(items: &[Item], masses: &HashMap<ItemId, EventMass>) -> Vec<TrainingExample> {
    items
        .iter()
        .filter_map(|item| {
            let text = item.text();
            if text.is_empty() {
                return None;
            }
            let mass = masses.get(&item.id)?;
            let appeal_score = mass.appeal_score()?;
            Some(TrainingExample {
                item_id: item.id.clone(),
                text,
                appeal_score,
                total_events: mass.total(),
            })
        })
        .collect()
}
