//! Monthly renewal cycle arithmetic.
//!
//! A membership's cycle is anchored at `last_membership_payment`, falling back to
//! `join_date`. The next charge is due one calendar month after the anchor; when
//! the anchor's day does not exist in the target month the last day of that
//! month is used (Jan 31 -> Feb 29 in a leap year).

use chrono::{Months, NaiveDate};
use thiserror::Error;

use super::Membership;

pub const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("malformed {field} {value:?}")]
    MalformedDate { field: &'static str, value: String },

    #[error("due date after {anchor} is out of range")]
    OutOfRange { anchor: NaiveDate },
}

/// Where a membership stands relative to `today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    NotDue { next_due: NaiveDate },
    Due { anchor: NaiveDate, next_due: NaiveDate },
}

impl DueStatus {
    pub fn evaluate(membership: &Membership, today: NaiveDate) -> Result<Self, CycleError> {
        let anchor = cycle_anchor(membership)?;
        let next_due = next_due_date(anchor)?;
        if today < next_due {
            Ok(DueStatus::NotDue { next_due })
        } else {
            Ok(DueStatus::Due { anchor, next_due })
        }
    }

    pub fn next_due(&self) -> NaiveDate {
        match *self {
            DueStatus::NotDue { next_due } | DueStatus::Due { next_due, .. } => next_due,
        }
    }
}

/// Parse a stored `YYYY-MM-DD` date. Anything else, including timestamps, is
/// rejected.
pub fn parse_stored_date(field: &'static str, raw: &str) -> Result<NaiveDate, CycleError> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return Err(CycleError::MalformedDate {
            field,
            value: raw.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, STORED_DATE_FORMAT).map_err(|_| CycleError::MalformedDate {
        field,
        value: raw.to_string(),
    })
}

pub fn cycle_anchor(membership: &Membership) -> Result<NaiveDate, CycleError> {
    match membership.last_membership_payment.as_deref() {
        Some(last) if !last.trim().is_empty() => parse_stored_date("last_membership_payment", last),
        _ => parse_stored_date("join_date", &membership.join_date),
    }
}

pub fn next_due_date(anchor: NaiveDate) -> Result<NaiveDate, CycleError> {
    anchor
        .checked_add_months(Months::new(1))
        .ok_or(CycleError::OutOfRange { anchor })
}
