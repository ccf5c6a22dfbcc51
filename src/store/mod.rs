// src/store/mod.rs

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::models::{
    AttendanceMonthFact, AuditEntry, BonusCandidate, BonusType, CompensationConfig, PayrollLine,
    PayrollPeriod, PayrollPeriodStatus, TimeRequest, User,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Employee directory, read-only from this crate's point of view.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn active_users(&self) -> EngineResult<Vec<User>>;

    async fn users_by_ids(&self, ids: &[Uuid]) -> EngineResult<Vec<User>>;
}

/// Effective-dated compensation configs.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Config in force on `date`: greatest `effective_on <= date`, if any.
    async fn effective_config(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Option<CompensationConfig>>;

    /// All configs with `effective_on <= date`, ascending by `effective_on`.
    async fn configs_through(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<CompensationConfig>>;
}

/// Work-session and per-minute activity data recorded by the clock-in client.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Earliest session start per business day in `[from, to]`. The key is
    /// the day the session was filed under; the timestamp can land on the
    /// next calendar day when a session crosses midnight.
    async fn first_session_starts(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, DateTime<Utc>>>;

    /// Minutes flagged active or idle per day in `[from, to]`.
    async fn active_minutes_by_day(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, i64>>;
}

/// Approved PTO / UTO / make-up requests from the request workflow.
#[async_trait]
pub trait TimeOffStore: Send + Sync {
    /// Requests whose `[start_date, end_date]` intersects `[from, to]`.
    async fn approved_requests_overlapping(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<TimeRequest>>;
}

/// Organization holiday calendar.
#[async_trait]
pub trait HolidayStore: Send + Sync {
    async fn holidays_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<NaiveDate>>;
}

/// Derived monthly attendance facts, keyed on `(user_id, month_key)`.
#[async_trait]
pub trait FactStore: Send + Sync {
    async fn fact(
        &self,
        user_id: Uuid,
        month_key: &str,
    ) -> EngineResult<Option<AttendanceMonthFact>>;

    async fn facts_for_month(&self, month_key: &str) -> EngineResult<Vec<AttendanceMonthFact>>;

    /// Full overwrite on conflict; the existing row id survives. Returns the
    /// stored row.
    async fn upsert_fact(&self, fact: &AttendanceMonthFact)
        -> EngineResult<AttendanceMonthFact>;
}

/// Bonus candidates, keyed on `(user_id, bonus_type, period_key)`.
#[async_trait]
pub trait BonusStore: Send + Sync {
    async fn candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<Option<BonusCandidate>>;

    /// Full overwrite on conflict; the existing row id survives.
    async fn upsert_candidate(&self, candidate: &BonusCandidate) -> EngineResult<()>;

    /// No-op when the candidate does not exist.
    async fn delete_candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<()>;

    async fn candidates_for_pay_date(
        &self,
        pay_date: NaiveDate,
    ) -> EngineResult<Vec<BonusCandidate>>;
}

/// Payroll periods and their lines.
#[async_trait]
pub trait PayrollStore: Send + Sync {
    async fn period(&self, period_key: &str) -> EngineResult<Option<PayrollPeriod>>;

    async fn lines_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollLine>>;

    /// Upserts the period and replaces all of its lines atomically; a partial
    /// write is never observable.
    async fn replace_period(
        &self,
        period: &PayrollPeriod,
        lines: &[PayrollLine],
    ) -> EngineResult<()>;

    /// Sets the status and stamps `approved_by/_at` or `paid_by/_at` to match.
    async fn set_period_status(
        &self,
        period_id: Uuid,
        status: PayrollPeriodStatus,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> EngineResult<()>;
}

/// Actor-attributed audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_audit(&self, entry: &AuditEntry) -> EngineResult<()>;
}

/// Everything the pipeline needs from persistence, as one bound. Blanket
/// implemented, so any type implementing the nine contracts qualifies.
pub trait Store:
    UserStore
    + ConfigStore
    + ActivityStore
    + TimeOffStore
    + HolidayStore
    + FactStore
    + BonusStore
    + PayrollStore
    + AuditStore
{
}

impl<T> Store for T where
    T: UserStore
        + ConfigStore
        + ActivityStore
        + TimeOffStore
        + HolidayStore
        + FactStore
        + BonusStore
        + PayrollStore
        + AuditStore
{
}
