//! Time tracking records and the directory data billing reads from them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A billable customer of the tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub name: String,
}

/// Task inside a project that time can be logged against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkItem {
    pub work_item_id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub title: String,
}

/// A person who logs time. `hourly_rate` of `None` or zero means unbillable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contributor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub hourly_rate: Option<Decimal>,
}

/// Logged time. `hours` is integer-valued; `billed_invoice_id` is the billing claim.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeEntry {
    pub time_entry_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub work_item_id: Option<Uuid>,
    pub work_date: NaiveDate,
    pub hours: i32,
    pub billable: bool,
    pub notes: Option<String>,
    pub billed_invoice_id: Option<Uuid>,
    pub billed_at: Option<DateTime<Utc>>,
}

impl TimeEntry {
    pub fn minutes(&self) -> i64 {
        i64::from(self.hours) * 60
    }

    pub fn is_billed(&self) -> bool {
        self.billed_invoice_id.is_some()
    }
}

/// Filter for the unbilled-entry query. The date range is inclusive on both ends.
#[derive(Debug, Clone)]
pub struct UnbilledEntryQuery {
    pub project_ids: Vec<Uuid>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub billable_only: bool,
}

impl UnbilledEntryQuery {
    /// In-process equivalent of the SQL predicate.
    pub fn matches(&self, entry: &TimeEntry) -> bool {
        !entry.is_billed()
            && self.project_ids.contains(&entry.project_id)
            && entry.work_date >= self.from_date
            && entry.work_date <= self.to_date
            && (!self.billable_only || entry.billable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(project_id: Uuid, date: &str, billable: bool) -> TimeEntry {
        TimeEntry {
            time_entry_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id,
            work_item_id: None,
            work_date: date.parse().unwrap(),
            hours: 2,
            billable,
            notes: None,
            billed_invoice_id: None,
            billed_at: None,
        }
    }

    #[test]
    fn query_range_is_inclusive() {
        let project = Uuid::new_v4();
        let query = UnbilledEntryQuery {
            project_ids: vec![project],
            from_date: "2026-03-01".parse().unwrap(),
            to_date: "2026-03-31".parse().unwrap(),
            billable_only: true,
        };

        assert!(query.matches(&entry(project, "2026-03-01", true)));
        assert!(query.matches(&entry(project, "2026-03-31", true)));
        assert!(!query.matches(&entry(project, "2026-04-01", true)));
        assert!(!query.matches(&entry(project, "2026-03-10", false)));
        assert!(!query.matches(&entry(Uuid::new_v4(), "2026-03-10", true)));
    }

    #[test]
    fn billed_entries_never_match() {
        let project = Uuid::new_v4();
        let mut billed = entry(project, "2026-03-05", true);
        billed.billed_invoice_id = Some(Uuid::new_v4());
        let query = UnbilledEntryQuery {
            project_ids: vec![project],
            from_date: "2026-03-01".parse().unwrap(),
            to_date: "2026-03-31".parse().unwrap(),
            billable_only: false,
        };

        assert!(!query.matches(&billed));
        assert_eq!(entry(project, "2026-03-05", true).minutes(), 120);
    }
}
