//! # Everkeep Core Library
//!
//! Core business logic for Everkeep's well-being monitoring and
//! escalation engine. A recurring sweep tracks each user's check-in
//! cadence, counts fully missed periods, and escalates prolonged
//! silence to a human administrator; an approved review fans
//! notifications out to the user's verified nominees with independent
//! per-nominee retry. The CLI binary is a thin layer over this crate,
//! as would be any HTTP front end.
//!
//! ## Key Components
//!
//! - [`CheckinLedger`]: per-user cadence, counter and version-stamped writes
//! - [`LivenessScanner`]: the recurring overdue sweep
//! - [`EscalationGate`] / [`ReviewQueue`]: threshold crossing and admin review
//! - [`NotificationDispatcher`]: per-nominee fan-out with retry
//! - [`WellbeingEngine`]: facade consumed by API/CLI layers
//! - [`Database`]: SQLite persistence for all engine state
//!
//! Time is always read through the injected [`Clock`], so every piece
//! of cadence arithmetic is testable without wall-clock waits.

pub mod alert;
pub mod audit;
pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod nominee;
pub mod notify;
pub mod review;
pub mod scanner;
pub mod storage;

pub use alert::{Alert, AlertStatus};
pub use audit::{Actor, AuditEntry, AuditFilter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{AttemptStatus, DispatchReport, NotificationAttempt, NotificationDispatcher};
pub use engine::{DecisionOutcome, ProfileSnapshot, WellbeingEngine};
pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use ledger::{Cadence, CheckinLedger, LivenessProfile, ProfileSettings};
pub use nominee::{Nominee, NomineeDirectory};
pub use notify::{DeliveryError, NotificationChannel, NotificationMessage};
pub use review::{AdminReview, AdminRoster, Decision, EscalationGate, ReviewQueue, ReviewStatus};
pub use scanner::{LivenessScanner, SweepReport};
pub use storage::{Database, DeliveryConfig, EngineConfig, SweepConfig};
