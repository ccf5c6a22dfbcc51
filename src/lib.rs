//! Attendance reconciliation and payroll computation engine.
//!
//! Turns per-minute activity records, session starts, approved time-off
//! requests, and effective-dated compensation configs into monthly
//! attendance facts, cascading bonus candidates, and semi-monthly payroll
//! periods. The HTTP surface, auth, raw event ingestion, and schema
//! migrations live in collaborating services; this crate owns the
//! computation contract and its invariants.
//!
//! # Modules
//!
//! - `calendar` - month keys, semi-monthly period keys, pay-date resolution
//! - `config` - environment-driven settings, incl. the organization time zone
//! - `errors` - the engine error taxonomy
//! - `models` - domain rows and status enums
//! - `services` - the pipeline: config resolution, attendance facts, bonus
//!   cascade, payroll computation
//! - `store` - persistence contracts with Postgres and in-memory backends
//!
//! # Pipeline
//!
//! A recalculation trigger (config edit, holiday edit, time-request
//! approval) calls [`recalc_attendance_for_month`] for each affected month;
//! that rebuilds every user's [`models::AttendanceMonthFact`] and re-syncs
//! bonus candidates. [`recalc_payroll_for_pay_date`] then folds configs and
//! eligible candidates into a [`models::PayrollPeriod`] with one line per
//! user. Once a period is paid via [`mark_period_paid`], its month is locked
//! and attendance recalculation skips it.

pub mod calendar;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod store;

pub use calendar::{MonthKey, PeriodHalf, PeriodKey, resolve_period_for_pay_date};
pub use config::Settings;
pub use errors::{EngineError, EngineResult};
pub use services::attendance::{RecalcOutcome, is_month_locked, recalc_attendance_for_month};
pub use services::bonuses::sync_bonuses_for_month;
pub use services::payroll::{
    approve_period, export_period_csv, mark_period_paid, recalc_payroll_for_pay_date,
};
pub use store::{MemoryStore, PgStore, Store};
