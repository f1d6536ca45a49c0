use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tse_common::Money;

use crate::db_types::OrderStatus;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub user_id: Option<i64>,
    pub status: Option<Vec<OrderStatus>>,
    /// Free-text term matched against order number, buyer email and ticket-type name.
    pub search_term: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl OrderQueryFilter {
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn with_search_term<S: Into<String>>(mut self, term: S) -> Self {
        self.search_term = Some(term.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn is_empty(&self) -> bool {
        // An empty status list filters nothing and must not count as a criterion.
        self.user_id.is_none() &&
            self.status.as_deref().map_or(true, |s| s.is_empty()) &&
            self.search_term.is_none() &&
            self.since.is_none() &&
            self.until.is_none()
    }
}

impl Display for OrderQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "No filters.")?;
            return Ok(());
        }
        if let Some(user_id) = &self.user_id {
            write!(f, "user_id: {user_id}. ")?;
        }
        if let Some(term) = &self.search_term {
            write!(f, "term: {term}. ")?;
        }
        if let Some(since) = &self.since {
            write!(f, "since {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until {until}. ")?;
        }
        if let Some(statuses) = &self.status {
            let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(",");
            write!(f, "statuses: [{statuses}]. ")?;
        }
        Ok(())
    }
}

//--------------------------------------    OrderUpdate      ---------------------------------------------------------
/// Patch object for [`crate::traits::SalesDatabase::update_order`]. Only status and notes are caller-mutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub new_status: Option<OrderStatus>,
    pub new_notes: Option<String>,
}

impl OrderUpdate {
    pub fn with_new_status(mut self, status: OrderStatus) -> Self {
        self.new_status = Some(status);
        self
    }

    pub fn with_new_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.new_notes = Some(notes.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_status.is_none() && self.new_notes.is_none()
    }
}

//--------------------------------------  OrderStatistics    ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderStatistics {
    pub total: i64,
    pub pending: i64,
    pub paid: i64,
    pub cancelled: i64,
    pub refunded: i64,
    /// Sum of order totals for orders currently in `Paid` status.
    pub revenue: Money,
    /// Orders created on the current date.
    pub today: i64,
}
