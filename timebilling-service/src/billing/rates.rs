//! Contributor rate lookup.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Contributor, MissingRateUser};

pub const MISSING_RATE_MESSAGE: &str = "Hourly rate not configured";

#[derive(Debug, Clone, Default)]
pub struct ResolvedRates {
    pub rates: HashMap<Uuid, Decimal>,
    /// Sorted by name, then id.
    pub missing: Vec<MissingRateUser>,
}

impl ResolvedRates {
    pub fn rate_for(&self, user_id: &Uuid) -> Decimal {
        self.rates.get(user_id).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Map each requested contributor to a positive rate, collecting the ones
/// that have none. Ids absent from `contributors` count as missing.
pub fn resolve_rates(user_ids: &[Uuid], contributors: &[Contributor]) -> ResolvedRates {
    let directory: HashMap<Uuid, &Contributor> =
        contributors.iter().map(|c| (c.user_id, c)).collect();

    let mut resolved = ResolvedRates::default();
    for user_id in user_ids {
        if resolved.rates.contains_key(user_id)
            || resolved.missing.iter().any(|m| &m.user_id == user_id)
        {
            continue;
        }

        let contributor = directory.get(user_id);
        match contributor.and_then(|c| c.hourly_rate) {
            Some(rate) if rate > Decimal::ZERO => {
                resolved.rates.insert(*user_id, rate);
            }
            _ => resolved.missing.push(MissingRateUser {
                user_id: *user_id,
                name: contributor
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "Unknown contributor".to_string()),
                email: contributor.map(|c| c.email.clone()).unwrap_or_default(),
                message: MISSING_RATE_MESSAGE.to_string(),
            }),
        }
    }

    resolved
        .missing
        .sort_by(|a, b| a.name.cmp(&b.name).then(a.user_id.cmp(&b.user_id)));
    resolved
}
