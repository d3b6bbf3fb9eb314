//! Services module for membership-service.

pub mod accounts;
pub mod billing;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod store;

pub use accounts::{AccountService, Enrolment, PaymentReceipt};
pub use billing::{
    assess, Assessment, BillingEngine, Clock, ManualClock, RenewalOutcome, SystemClock,
};
pub use database::Database;
pub use memory::MemoryStore;
pub use metrics::{
    get_metrics, http_metrics_middleware, init_metrics, record_billing_run, record_error,
    record_renewal_amount, record_renewal_outcome,
};
pub use store::{
    CheckInStore, GymStore, LedgerSnapshot, LedgerStore, MembershipSnapshot, MembershipStore,
    RenewalStore, SettingsStore, StoreError,
};
