// src/models/mod.rs

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// Statuses are stored as TEXT; each enum gets a hand-rolled sqlx codec so the
// runtime query API can bind and decode it without a Postgres enum type.
macro_rules! pg_text_enum {
    ($name:ident) => {
        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                raw.parse::<$name>().map_err(Into::into)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ─── User ─────────────────────────────────────────────────────────────────────

/// Directory row for an employee. Owned by the user-management collaborator;
/// this pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ─── Compensation Config ──────────────────────────────────────────────────────

/// One day of the weekly schedule template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub break_minutes: i32,
    /// Hours that accrue into `assigned_hours` when this day is worked.
    pub expected_hours: Decimal,
}

impl DaySchedule {
    /// A disabled day (weekend / unscheduled).
    pub fn off() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            break_minutes: 0,
            expected_hours: Decimal::ZERO,
        }
    }
}

/// Weekly schedule template, indexed 0–6 with 0 = Sunday (the clock-in
/// client's weekday keying).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekSchedule(pub [DaySchedule; 7]);

impl WeekSchedule {
    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        &self.0[weekday.num_days_from_sunday() as usize]
    }

    /// Monday–Friday template with identical hours every workday.
    pub fn standard_week(
        start: NaiveTime,
        end: NaiveTime,
        break_minutes: i32,
        expected_hours: Decimal,
    ) -> Self {
        let workday = DaySchedule {
            enabled: true,
            start,
            end,
            break_minutes,
            expected_hours,
        };
        Self([
            DaySchedule::off(),
            workday.clone(),
            workday.clone(),
            workday.clone(),
            workday.clone(),
            workday,
            DaySchedule::off(),
        ])
    }
}

/// Effective-dated compensation and schedule row. The config in force on a
/// date D is the one with the greatest `effective_on <= D`; at most one row
/// exists per `(user_id, effective_on)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CompensationConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub effective_on: NaiveDate,
    pub base_semi_monthly_salary: Decimal,
    pub monthly_attendance_bonus: Decimal,
    pub quarterly_attendance_bonus: Decimal,
    pub kpi_eligible: bool,
    pub kpi_default_bonus: Decimal,
    #[sqlx(json)]
    pub schedule: WeekSchedule,
    /// PTO hours granted per month by the accrual job (not consumed here).
    pub pto_accrual_hours_per_month: Decimal,
    pub uto_accrual_hours_per_month: Decimal,
    pub pto_opening_balance_hours: Decimal,
    pub uto_opening_balance_hours: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Time Requests ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRequestType {
    Pto,
    Uto,
    MakeUp,
}

impl TimeRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRequestType::Pto => "pto",
            TimeRequestType::Uto => "uto",
            TimeRequestType::MakeUp => "make_up",
        }
    }
}

impl std::str::FromStr for TimeRequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pto" => Ok(TimeRequestType::Pto),
            "uto" => Ok(TimeRequestType::Uto),
            "make_up" => Ok(TimeRequestType::MakeUp),
            _ => Err(format!("Invalid TimeRequestType: {s}")),
        }
    }
}

pg_text_enum!(TimeRequestType);

/// An approved time-off / make-up request as handed over by the request
/// workflow. Requests overlapping a month are split evenly across the
/// calendar days they span before entering the per-day pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TimeRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request_type: TimeRequestType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub hours: Decimal,
}

impl TimeRequest {
    /// Calendar days the request spans, inclusive.
    pub fn day_count(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

// ─── Attendance Month Fact ────────────────────────────────────────────────────

/// One day of the month snapshot carried on the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    pub expected_hours: Decimal,
    pub worked_hours: Decimal,
    pub pto_hours: Decimal,
    pub uto_hours: Decimal,
    pub make_up_hours: Decimal,
    pub tardy_minutes: i64,
    pub holiday: bool,
    pub notes: Vec<String>,
}

/// Derived monthly attendance summary, one row per `(user_id, month_key)`.
///
/// This is a cache, not a ledger: it is fully recomputable from sessions,
/// minute stats, approved time requests, and holidays, and every
/// recalculation overwrites it wholesale. Once a payroll period covering the
/// month is paid, the row is locked and recalculation skips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AttendanceMonthFact {
    pub id: Uuid,
    pub user_id: Uuid,
    /// `"YYYY-MM"` in the organization time zone.
    pub month_key: String,
    pub assigned_hours: Decimal,
    pub worked_hours: Decimal,
    pub pto_hours: Decimal,
    /// Unexcused absence left over after make-up matching.
    pub uto_absence_hours: Decimal,
    pub tardy_minutes: i64,
    pub matched_make_up_hours: Decimal,
    pub is_perfect: bool,
    /// `"YYYY-MM-DD: <note>"` strings flattened from the day notes.
    #[sqlx(json)]
    pub reasons: Vec<String>,
    #[sqlx(json)]
    pub days: Vec<DaySnapshot>,
    pub computed_at: DateTime<Utc>,
}

// ─── Bonus Candidates ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    MonthlyAttendance,
    QuarterlyAttendance,
    Kpi,
}

impl BonusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusType::MonthlyAttendance => "monthly_attendance",
            BonusType::QuarterlyAttendance => "quarterly_attendance",
            BonusType::Kpi => "kpi",
        }
    }
}

impl std::str::FromStr for BonusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly_attendance" => Ok(BonusType::MonthlyAttendance),
            "quarterly_attendance" => Ok(BonusType::QuarterlyAttendance),
            "kpi" => Ok(BonusType::Kpi),
            _ => Err(format!("Invalid BonusType: {s}")),
        }
    }
}

pg_text_enum!(BonusType);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusStatus {
    Earned,
    Pending,
    Approved,
    Denied,
}

impl BonusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusStatus::Earned => "earned",
            BonusStatus::Pending => "pending",
            BonusStatus::Approved => "approved",
            BonusStatus::Denied => "denied",
        }
    }

    /// Whether recomputation may replace a candidate in this status.
    /// `Approved`/`Denied` are manual review decisions and stay untouched.
    pub fn is_overwritable(&self) -> bool {
        matches!(self, BonusStatus::Earned | BonusStatus::Pending)
    }
}

impl std::str::FromStr for BonusStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earned" => Ok(BonusStatus::Earned),
            "pending" => Ok(BonusStatus::Pending),
            "approved" => Ok(BonusStatus::Approved),
            "denied" => Ok(BonusStatus::Denied),
            _ => Err(format!("Invalid BonusStatus: {s}")),
        }
    }
}

pg_text_enum!(BonusStatus);

/// Bonus emitted by the cascade, one row per `(user_id, bonus_type,
/// period_key)`. Monthly/quarterly candidates are fully derived; recompute
/// overwrites or deletes them freely. KPI candidates in `pending` are
/// likewise overwritten, but `approved`/`denied` decisions are sticky.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BonusCandidate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bonus_type: BonusType,
    /// `"YYYY-MM"` for monthly/kpi, `"YYYY-Qn"` for quarterly.
    pub period_key: String,
    pub amount: Decimal,
    pub status: BonusStatus,
    /// Manual override; payroll pays this when set, `amount` otherwise.
    pub final_amount: Option<Decimal>,
    pub eligible_pay_date: NaiveDate,
    #[sqlx(json)]
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BonusCandidate {
    /// Amount payroll actually pays for this candidate.
    pub fn payable_amount(&self) -> Decimal {
        self.final_amount.unwrap_or(self.amount)
    }
}

// ─── Payroll Period ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollPeriodStatus {
    Draft,
    Approved,
    Paid,
}

impl PayrollPeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollPeriodStatus::Draft => "draft",
            PayrollPeriodStatus::Approved => "approved",
            PayrollPeriodStatus::Paid => "paid",
        }
    }
}

impl std::str::FromStr for PayrollPeriodStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PayrollPeriodStatus::Draft),
            "approved" => Ok(PayrollPeriodStatus::Approved),
            "paid" => Ok(PayrollPeriodStatus::Paid),
            _ => Err(format!("Invalid PayrollPeriodStatus: {s}")),
        }
    }
}

pg_text_enum!(PayrollPeriodStatus);

/// Semi-monthly payroll period, one row per period key. Once `paid`, the
/// period and its month's attendance facts are locked against recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayrollPeriod {
    pub id: Uuid,
    /// `"YYYY-MM-A"` (1st–15th) or `"YYYY-MM-B"` (16th–end).
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub pay_date: NaiveDate,
    pub status: PayrollPeriodStatus,
    pub total_base: Decimal,
    pub total_bonus: Decimal,
    pub total_final: Decimal,
    pub employee_count: i32,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

/// One employee's pay for a period. Lines are regenerated wholesale (delete
/// + recreate) on every payroll recalculation, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayrollLine {
    pub id: Uuid,
    pub period_id: Uuid,
    pub user_id: Uuid,
    pub base_amount: Decimal,
    pub monthly_attendance: Decimal,
    /// Monthly bonuses earned in an older month and paid late.
    pub monthly_deferred: Decimal,
    pub quarterly_attendance: Decimal,
    pub kpi_bonus: Decimal,
    pub final_amount: Decimal,
    #[sqlx(json)]
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ─── Audit Log ────────────────────────────────────────────────────────────────

/// Actor-attributed record of a recalculation or state transition. Written
/// only when the triggering call supplied an actor id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub subject: String,
    #[sqlx(json)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor_id: Uuid, action: &str, subject: String, details: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action: action.to_string(),
            subject,
            details,
            created_at: Utc::now(),
        }
    }
}
