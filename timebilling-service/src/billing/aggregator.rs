//! Folding unbilled entries into preview line items.

use std::collections::HashMap;
use std::hash::Hash;

use rust_decimal::Decimal;
use uuid::Uuid;

use super::{minutes_to_hours, rates::ResolvedRates, round_money};
use crate::models::{Contributor, GroupBy, PreviewLineItem, TimeEntry, WorkItem};

pub const NO_TASK_DESCRIPTION: &str = "General Services (No Task)";

/// Directory data the aggregator labels groups with.
pub struct AggregationInput<'a> {
    pub entries: &'a [TimeEntry],
    pub rates: &'a ResolvedRates,
    pub contributors: &'a [Contributor],
    pub work_items: &'a [WorkItem],
    pub include_descriptions: bool,
}

/// Running sums for one group, built in entry order.
struct Bucket<K> {
    key: K,
    minutes: i64,
    /// Σ(entry hours × contributor rate)
    weighted: Decimal,
    notes: Vec<String>,
}

impl<K> Bucket<K> {
    fn new(key: K) -> Self {
        Self {
            key,
            minutes: 0,
            weighted: Decimal::ZERO,
            notes: Vec::new(),
        }
    }

    fn add(&mut self, entry: &TimeEntry, rate: Decimal, include_descriptions: bool) {
        self.minutes += entry.minutes();
        self.weighted += Decimal::from(entry.hours) * rate;

        if !include_descriptions {
            return;
        }
        if let Some(note) = entry.notes.as_deref().map(str::trim) {
            if !note.is_empty() && !self.notes.iter().any(|n| n == note) {
                self.notes.push(note.to_string());
            }
        }
    }

    fn joined_notes(&self) -> Option<String> {
        (!self.notes.is_empty()).then(|| self.notes.join("; "))
    }
}

/// Group entries in first-seen order. Entries are visited by (date, id) so
/// the result does not depend on storage order.
fn bucket_by<K, F>(input: &AggregationInput<'_>, key_of: F) -> Vec<Bucket<K>>
where
    K: Copy + Eq + Hash,
    F: Fn(&TimeEntry) -> K,
{
    let mut ordered: Vec<&TimeEntry> = input.entries.iter().collect();
    ordered.sort_by(|a, b| {
        a.work_date
            .cmp(&b.work_date)
            .then(a.time_entry_id.cmp(&b.time_entry_id))
    });

    let mut index: HashMap<K, usize> = HashMap::new();
    let mut buckets: Vec<Bucket<K>> = Vec::new();
    for entry in ordered {
        let key = key_of(entry);
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(Bucket::new(key));
            buckets.len() - 1
        });
        buckets[slot].add(
            entry,
            input.rates.rate_for(&entry.user_id),
            input.include_descriptions,
        );
    }
    buckets
}

/// Build line items for `mode`.
pub fn aggregate(input: &AggregationInput<'_>, mode: GroupBy) -> Vec<PreviewLineItem> {
    match mode {
        GroupBy::ByContributor => by_contributor(input),
        GroupBy::ByWorkItem => by_work_item(input),
    }
}

fn by_contributor(input: &AggregationInput<'_>) -> Vec<PreviewLineItem> {
    let names: HashMap<Uuid, &str> = input
        .contributors
        .iter()
        .map(|c| (c.user_id, c.name.as_str()))
        .collect();

    let mut items: Vec<(String, PreviewLineItem)> = bucket_by(input, |e| e.user_id)
        .into_iter()
        .map(|bucket| {
            let name = names
                .get(&bucket.key)
                .copied()
                .unwrap_or("Unknown contributor")
                .to_string();
            let hours = minutes_to_hours(bucket.minutes);
            let unit_price = round_money(input.rates.rate_for(&bucket.key));
            let item = PreviewLineItem {
                description: format!("Services – {}", name),
                minutes: bucket.minutes,
                hours,
                unit_price,
                amount: round_money(hours * unit_price),
                user_id: Some(bucket.key),
                work_item_id: None,
                notes: bucket.joined_notes(),
            };
            (name, item)
        })
        .collect();

    items.sort_by(|(a_name, a), (b_name, b)| {
        a_name.cmp(b_name).then(a.user_id.cmp(&b.user_id))
    });
    items.into_iter().map(|(_, item)| item).collect()
}

fn by_work_item(input: &AggregationInput<'_>) -> Vec<PreviewLineItem> {
    let titles: HashMap<Uuid, &str> = input
        .work_items
        .iter()
        .map(|w| (w.work_item_id, w.title.as_str()))
        .collect();

    let mut items: Vec<PreviewLineItem> = bucket_by(input, |e| e.work_item_id)
        .into_iter()
        .map(|bucket| {
            let description = match bucket.key {
                Some(id) => titles
                    .get(&id)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| format!("Work item {}", id)),
                None => NO_TASK_DESCRIPTION.to_string(),
            };
            let hours = minutes_to_hours(bucket.minutes);
            let raw_hours = Decimal::from(bucket.minutes) / Decimal::from(60);
            let blended = if raw_hours.is_zero() {
                Decimal::ZERO
            } else {
                bucket.weighted / raw_hours
            };
            let unit_price = round_money(blended);
            PreviewLineItem {
                description,
                minutes: bucket.minutes,
                hours,
                unit_price,
                amount: round_money(hours * unit_price),
                user_id: None,
                work_item_id: bucket.key,
                notes: bucket.joined_notes(),
            }
        })
        .collect();

    // The no-task bucket always goes last.
    items.sort_by(|a, b| {
        a.work_item_id
            .is_none()
            .cmp(&b.work_item_id.is_none())
            .then_with(|| a.description.cmp(&b.description))
            .then(a.work_item_id.cmp(&b.work_item_id))
    });
    items
}
