// src/store/postgres.rs
//
// sqlx/Postgres implementation of the store contracts. The input tables
// (users, compensation_configs, work_sessions, minute_stats, time_requests,
// holidays) are owned and migrated by the collaborating services; this crate
// only reads them. The derived tables (attendance_month_facts,
// bonus_candidates, payroll_periods, payroll_lines, audit_log) are written
// here via upserts keyed on their natural keys, so recomputation overwrites
// rows in place and row ids survive.
//
// Queries go through the runtime API with explicit binds; status enums
// travel as TEXT via the codecs in `models`, and snapshot columns are JSONB.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use crate::errors::EngineResult;
use crate::models::{
    AttendanceMonthFact, AuditEntry, BonusCandidate, BonusType, CompensationConfig, PayrollLine,
    PayrollPeriod, PayrollPeriodStatus, TimeRequest, User,
};
use crate::store::{
    ActivityStore, AuditStore, BonusStore, ConfigStore, FactStore, HolidayStore, PayrollStore,
    TimeOffStore, UserStore,
};

const FACT_COLUMNS: &str = "id, user_id, month_key, assigned_hours, worked_hours, pto_hours, \
     uto_absence_hours, tardy_minutes, matched_make_up_hours, is_perfect, reasons, days, \
     computed_at";

const CANDIDATE_COLUMNS: &str = "id, user_id, bonus_type, period_key, amount, status, \
     final_amount, eligible_pay_date, snapshot, created_at, updated_at";

const PERIOD_COLUMNS: &str = "id, period_key, period_start, period_end, pay_date, status, \
     total_base, total_bonus, total_final, employee_count, approved_by, approved_at, paid_by, \
     paid_at, computed_at";

const LINE_COLUMNS: &str = "id, period_id, user_id, base_amount, monthly_attendance, \
     monthly_deferred, quarterly_attendance, kpi_bonus, final_amount, snapshot, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn active_users(&self) -> EngineResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, first_name, last_name, email, is_active, created_at
             FROM users
             WHERE is_active = true
             ORDER BY first_name, last_name, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> EngineResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, first_name, last_name, email, is_active, created_at
             FROM users
             WHERE id = ANY($1)
             ORDER BY first_name, last_name, id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn effective_config(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Option<CompensationConfig>> {
        let config = sqlx::query_as::<_, CompensationConfig>(
            "SELECT id, user_id, effective_on, base_semi_monthly_salary,
                    monthly_attendance_bonus, quarterly_attendance_bonus, kpi_eligible,
                    kpi_default_bonus, schedule, pto_accrual_hours_per_month,
                    uto_accrual_hours_per_month, pto_opening_balance_hours,
                    uto_opening_balance_hours, created_at, updated_at
             FROM compensation_configs
             WHERE user_id = $1 AND effective_on <= $2
             ORDER BY effective_on DESC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }

    async fn configs_through(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<CompensationConfig>> {
        let configs = sqlx::query_as::<_, CompensationConfig>(
            "SELECT id, user_id, effective_on, base_semi_monthly_salary,
                    monthly_attendance_bonus, quarterly_attendance_bonus, kpi_eligible,
                    kpi_default_bonus, schedule, pto_accrual_hours_per_month,
                    uto_accrual_hours_per_month, pto_opening_balance_hours,
                    uto_opening_balance_hours, created_at, updated_at
             FROM compensation_configs
             WHERE user_id = $1 AND effective_on <= $2
             ORDER BY effective_on ASC",
        )
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(configs)
    }
}

#[async_trait]
impl ActivityStore for PgStore {
    async fn first_session_starts(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, DateTime<Utc>>> {
        let rows: Vec<(NaiveDate, DateTime<Utc>)> = sqlx::query_as(
            "SELECT work_day, MIN(started_at)
             FROM work_sessions
             WHERE user_id = $1 AND work_day BETWEEN $2 AND $3
             GROUP BY work_day",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn active_minutes_by_day(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, i64>> {
        let rows: Vec<(NaiveDate, i64)> = sqlx::query_as(
            "SELECT stat_day, COUNT(*)
             FROM minute_stats
             WHERE user_id = $1 AND stat_day BETWEEN $2 AND $3
               AND status IN ('active', 'idle')
             GROUP BY stat_day",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl TimeOffStore for PgStore {
    async fn approved_requests_overlapping(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<TimeRequest>> {
        let requests = sqlx::query_as::<_, TimeRequest>(
            "SELECT id, user_id, request_type, start_date, end_date, hours
             FROM time_requests
             WHERE user_id = $1 AND status = 'approved'
               AND start_date <= $3 AND end_date >= $2
             ORDER BY start_date, id",
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }
}

#[async_trait]
impl HolidayStore for PgStore {
    async fn holidays_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT observed_on FROM holidays
             WHERE observed_on BETWEEN $1 AND $2
             ORDER BY observed_on",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }
}

#[async_trait]
impl FactStore for PgStore {
    async fn fact(
        &self,
        user_id: Uuid,
        month_key: &str,
    ) -> EngineResult<Option<AttendanceMonthFact>> {
        let fact = sqlx::query_as::<_, AttendanceMonthFact>(&format!(
            "SELECT {FACT_COLUMNS} FROM attendance_month_facts
             WHERE user_id = $1 AND month_key = $2"
        ))
        .bind(user_id)
        .bind(month_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fact)
    }

    async fn facts_for_month(&self, month_key: &str) -> EngineResult<Vec<AttendanceMonthFact>> {
        let facts = sqlx::query_as::<_, AttendanceMonthFact>(&format!(
            "SELECT {FACT_COLUMNS} FROM attendance_month_facts
             WHERE month_key = $1
             ORDER BY user_id"
        ))
        .bind(month_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(facts)
    }

    async fn upsert_fact(
        &self,
        fact: &AttendanceMonthFact,
    ) -> EngineResult<AttendanceMonthFact> {
        // id stays out of the update set so the first-written row id survives
        // every recomputation.
        let stored = sqlx::query_as::<_, AttendanceMonthFact>(&format!(
            "INSERT INTO attendance_month_facts ({FACT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (user_id, month_key) DO UPDATE
             SET assigned_hours = EXCLUDED.assigned_hours,
                 worked_hours = EXCLUDED.worked_hours,
                 pto_hours = EXCLUDED.pto_hours,
                 uto_absence_hours = EXCLUDED.uto_absence_hours,
                 tardy_minutes = EXCLUDED.tardy_minutes,
                 matched_make_up_hours = EXCLUDED.matched_make_up_hours,
                 is_perfect = EXCLUDED.is_perfect,
                 reasons = EXCLUDED.reasons,
                 days = EXCLUDED.days,
                 computed_at = EXCLUDED.computed_at
             RETURNING {FACT_COLUMNS}"
        ))
        .bind(fact.id)
        .bind(fact.user_id)
        .bind(&fact.month_key)
        .bind(fact.assigned_hours)
        .bind(fact.worked_hours)
        .bind(fact.pto_hours)
        .bind(fact.uto_absence_hours)
        .bind(fact.tardy_minutes)
        .bind(fact.matched_make_up_hours)
        .bind(fact.is_perfect)
        .bind(Json(&fact.reasons))
        .bind(Json(&fact.days))
        .bind(fact.computed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }
}

#[async_trait]
impl BonusStore for PgStore {
    async fn candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<Option<BonusCandidate>> {
        let candidate = sqlx::query_as::<_, BonusCandidate>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM bonus_candidates
             WHERE user_id = $1 AND bonus_type = $2 AND period_key = $3"
        ))
        .bind(user_id)
        .bind(bonus_type)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(candidate)
    }

    async fn upsert_candidate(&self, candidate: &BonusCandidate) -> EngineResult<()> {
        sqlx::query(&format!(
            "INSERT INTO bonus_candidates ({CANDIDATE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (user_id, bonus_type, period_key) DO UPDATE
             SET amount = EXCLUDED.amount,
                 status = EXCLUDED.status,
                 final_amount = EXCLUDED.final_amount,
                 eligible_pay_date = EXCLUDED.eligible_pay_date,
                 snapshot = EXCLUDED.snapshot,
                 updated_at = EXCLUDED.updated_at"
        ))
        .bind(candidate.id)
        .bind(candidate.user_id)
        .bind(candidate.bonus_type)
        .bind(&candidate.period_key)
        .bind(candidate.amount)
        .bind(candidate.status)
        .bind(candidate.final_amount)
        .bind(candidate.eligible_pay_date)
        .bind(&candidate.snapshot)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<()> {
        sqlx::query(
            "DELETE FROM bonus_candidates
             WHERE user_id = $1 AND bonus_type = $2 AND period_key = $3",
        )
        .bind(user_id)
        .bind(bonus_type)
        .bind(period_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn candidates_for_pay_date(
        &self,
        pay_date: NaiveDate,
    ) -> EngineResult<Vec<BonusCandidate>> {
        let candidates = sqlx::query_as::<_, BonusCandidate>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM bonus_candidates
             WHERE eligible_pay_date = $1
             ORDER BY user_id, bonus_type, period_key"
        ))
        .bind(pay_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(candidates)
    }
}

#[async_trait]
impl PayrollStore for PgStore {
    async fn period(&self, period_key: &str) -> EngineResult<Option<PayrollPeriod>> {
        let period = sqlx::query_as::<_, PayrollPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM payroll_periods WHERE period_key = $1"
        ))
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(period)
    }

    async fn lines_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollLine>> {
        let lines = sqlx::query_as::<_, PayrollLine>(&format!(
            "SELECT {LINE_COLUMNS} FROM payroll_lines
             WHERE period_id = $1
             ORDER BY user_id"
        ))
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    async fn replace_period(
        &self,
        period: &PayrollPeriod,
        lines: &[PayrollLine],
    ) -> EngineResult<()> {
        // One transaction: a partial line replacement would corrupt the
        // period totals, so the upsert and the delete + re-insert commit or
        // fail together.
        let mut tx = self.pool.begin().await?;

        let stored_id: Uuid = sqlx::query_scalar(&format!(
            "INSERT INTO payroll_periods ({PERIOD_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (period_key) DO UPDATE
             SET period_start = EXCLUDED.period_start,
                 period_end = EXCLUDED.period_end,
                 pay_date = EXCLUDED.pay_date,
                 status = EXCLUDED.status,
                 total_base = EXCLUDED.total_base,
                 total_bonus = EXCLUDED.total_bonus,
                 total_final = EXCLUDED.total_final,
                 employee_count = EXCLUDED.employee_count,
                 approved_by = EXCLUDED.approved_by,
                 approved_at = EXCLUDED.approved_at,
                 paid_by = EXCLUDED.paid_by,
                 paid_at = EXCLUDED.paid_at,
                 computed_at = EXCLUDED.computed_at
             RETURNING id"
        ))
        .bind(period.id)
        .bind(&period.period_key)
        .bind(period.period_start)
        .bind(period.period_end)
        .bind(period.pay_date)
        .bind(period.status)
        .bind(period.total_base)
        .bind(period.total_bonus)
        .bind(period.total_final)
        .bind(period.employee_count)
        .bind(period.approved_by)
        .bind(period.approved_at)
        .bind(period.paid_by)
        .bind(period.paid_at)
        .bind(period.computed_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM payroll_lines WHERE period_id = $1")
            .bind(stored_id)
            .execute(&mut *tx)
            .await?;

        for line in lines {
            sqlx::query(&format!(
                "INSERT INTO payroll_lines ({LINE_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
            ))
            .bind(line.id)
            .bind(stored_id)
            .bind(line.user_id)
            .bind(line.base_amount)
            .bind(line.monthly_attendance)
            .bind(line.monthly_deferred)
            .bind(line.quarterly_attendance)
            .bind(line.kpi_bonus)
            .bind(line.final_amount)
            .bind(&line.snapshot)
            .bind(line.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_period_status(
        &self,
        period_id: Uuid,
        status: PayrollPeriodStatus,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        match status {
            PayrollPeriodStatus::Approved => {
                sqlx::query(
                    "UPDATE payroll_periods
                     SET status = $2, approved_by = $3, approved_at = $4
                     WHERE id = $1",
                )
                .bind(period_id)
                .bind(status)
                .bind(actor)
                .bind(at)
                .execute(&self.pool)
                .await?;
            }
            PayrollPeriodStatus::Paid => {
                sqlx::query(
                    "UPDATE payroll_periods
                     SET status = $2, paid_by = $3, paid_at = $4
                     WHERE id = $1",
                )
                .bind(period_id)
                .bind(status)
                .bind(actor)
                .bind(at)
                .execute(&self.pool)
                .await?;
            }
            PayrollPeriodStatus::Draft => {
                sqlx::query("UPDATE payroll_periods SET status = $2 WHERE id = $1")
                    .bind(period_id)
                    .bind(status)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record_audit(&self, entry: &AuditEntry) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, actor_id, action, subject, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.subject)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
