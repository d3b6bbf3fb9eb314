//! Access-control log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub check_in_id: Uuid,
    pub membership_id: Uuid,
    pub membership_name: String,
    pub checked_in_utc: DateTime<Utc>,
    pub checked_out_utc: Option<DateTime<Utc>>,
}
