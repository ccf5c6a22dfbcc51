// src/services/payroll.rs
//
// Payroll Computer: resolves a pay date to its semi-monthly period, prorates
// base salary across config changes, folds in eligible bonus candidates, and
// replaces the period's lines transactionally. Also owns the
// draft → approved → paid transitions and the CSV export.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::calendar::{MonthKey, PeriodKey, resolve_period_for_pay_date};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    AuditEntry, BonusCandidate, BonusStatus, BonusType, CompensationConfig, PayrollLine,
    PayrollPeriod, PayrollPeriodStatus, User,
};
use crate::services::config::active_config_on;
use crate::services::round2;
use crate::store::Store;

/// One config's contiguous run of days within a period.
struct ConfigSpan<'a> {
    config: &'a CompensationConfig,
    days: i64,
}

/// Walks every day of the period and counts which config is active. Days
/// before a user's first config go uncounted, prorating their base down.
fn config_spans<'a>(configs: &'a [CompensationConfig], period: PeriodKey) -> Vec<ConfigSpan<'a>> {
    let mut spans: Vec<ConfigSpan<'a>> = Vec::new();
    for day in period.days() {
        if let Some(config) = active_config_on(configs, day) {
            match spans.last_mut() {
                Some(span) if span.config.id == config.id => span.days += 1,
                _ => spans.push(ConfigSpan { config, days: 1 }),
            }
        }
    }
    spans
}

/// Day-weighted base salary: `Σ salary_i × days_i / total_days`, rounded to
/// cents after the sum.
pub fn prorate_base(configs: &[CompensationConfig], period: PeriodKey) -> Decimal {
    let total_days = Decimal::from(period.total_days());
    let sum = config_spans(configs, period)
        .iter()
        .map(|span| span.config.base_semi_monthly_salary * Decimal::from(span.days) / total_days)
        .sum::<Decimal>();
    round2(sum)
}

#[derive(Debug, Default, PartialEq)]
struct BonusBuckets {
    monthly: Decimal,
    deferred: Decimal,
    quarterly: Decimal,
    kpi: Decimal,
    candidate_ids: Vec<Uuid>,
}

/// Filters one user's candidates down to the ones this pay date actually
/// pays (`earned` monthly/quarterly, `approved` KPI) and buckets them. A
/// monthly bonus whose earned month is not the month immediately preceding
/// the pay date was missed by its usual cycle and lands in the deferred
/// bucket.
fn split_candidates(candidates: &[BonusCandidate], pay_date: NaiveDate) -> BonusBuckets {
    let preceding_month = MonthKey::from_date(pay_date).prev().to_string();
    let mut buckets = BonusBuckets::default();
    for candidate in candidates {
        let qualifies = matches!(
            (candidate.bonus_type, candidate.status),
            (BonusType::MonthlyAttendance, BonusStatus::Earned)
                | (BonusType::QuarterlyAttendance, BonusStatus::Earned)
                | (BonusType::Kpi, BonusStatus::Approved)
        );
        if !qualifies {
            continue;
        }
        let amount = candidate.payable_amount();
        match candidate.bonus_type {
            BonusType::MonthlyAttendance => {
                if candidate.period_key == preceding_month {
                    buckets.monthly += amount;
                } else {
                    buckets.deferred += amount;
                }
            }
            BonusType::QuarterlyAttendance => buckets.quarterly += amount,
            BonusType::Kpi => buckets.kpi += amount,
        }
        buckets.candidate_ids.push(candidate.id);
    }
    buckets
}

/// Recomputes the payroll period a pay date closes out.
///
/// The period upsert and the full line replacement are one transaction; the
/// existing draft/approved status (and row id) survive a recompute. A period
/// that has already been paid is refused outright.
pub async fn recalc_payroll_for_pay_date<S: Store>(
    store: &S,
    pay_date: NaiveDate,
    actor: Option<Uuid>,
) -> EngineResult<(PayrollPeriod, Vec<PayrollLine>)> {
    let period_key = resolve_period_for_pay_date(pay_date)?;
    let key_string = period_key.to_string();

    let existing = store.period(&key_string).await?;
    if let Some(period) = &existing {
        if period.status == PayrollPeriodStatus::Paid {
            return Err(EngineError::PeriodAlreadyPaid(key_string));
        }
    }
    let (period_id, status, approved_by, approved_at) = match &existing {
        Some(p) => (p.id, p.status, p.approved_by, p.approved_at),
        None => (Uuid::new_v4(), PayrollPeriodStatus::Draft, None, None),
    };

    let users = store.active_users().await?;
    let mut candidates_by_user: HashMap<Uuid, Vec<BonusCandidate>> = HashMap::new();
    for candidate in store.candidates_for_pay_date(pay_date).await? {
        candidates_by_user
            .entry(candidate.user_id)
            .or_default()
            .push(candidate);
    }

    let now = Utc::now();
    let mut lines: Vec<PayrollLine> = Vec::new();
    for user in &users {
        let configs = store.configs_through(user.id, period_key.end()).await?;
        if configs.is_empty() {
            continue;
        }

        let base_amount = prorate_base(&configs, period_key);
        let buckets = candidates_by_user
            .get(&user.id)
            .map(|c| split_candidates(c, pay_date))
            .unwrap_or_default();

        let monthly_attendance = round2(buckets.monthly);
        let monthly_deferred = round2(buckets.deferred);
        let quarterly_attendance = round2(buckets.quarterly);
        let kpi_bonus = round2(buckets.kpi);
        let final_amount = round2(
            base_amount + monthly_attendance + monthly_deferred + quarterly_attendance + kpi_bonus,
        );

        let proration: Vec<serde_json::Value> = config_spans(&configs, period_key)
            .iter()
            .map(|span| {
                json!({
                    "config_id": span.config.id,
                    "effective_on": span.config.effective_on.to_string(),
                    "salary": span.config.base_semi_monthly_salary,
                    "days": span.days,
                })
            })
            .collect();

        lines.push(PayrollLine {
            id: Uuid::new_v4(),
            period_id,
            user_id: user.id,
            base_amount,
            monthly_attendance,
            monthly_deferred,
            quarterly_attendance,
            kpi_bonus,
            final_amount,
            snapshot: json!({
                "employee": user.full_name(),
                "email": user.email,
                "proration": proration,
                "bonus_candidates": buckets.candidate_ids,
            }),
            created_at: now,
        });
    }

    let total_base = round2(lines.iter().map(|l| l.base_amount).sum());
    let total_final = round2(lines.iter().map(|l| l.final_amount).sum());
    let total_bonus = round2(total_final - total_base);

    let period = PayrollPeriod {
        id: period_id,
        period_key: key_string.clone(),
        period_start: period_key.start(),
        period_end: period_key.end(),
        pay_date,
        status,
        total_base,
        total_bonus,
        total_final,
        employee_count: lines.len() as i32,
        approved_by,
        approved_at,
        paid_by: None,
        paid_at: None,
        computed_at: now,
    };

    store.replace_period(&period, &lines).await?;

    if let Some(actor_id) = actor {
        store
            .record_audit(&AuditEntry::new(
                actor_id,
                "payroll.recalc",
                format!("payroll:{key_string}"),
                json!({
                    "pay_date": pay_date.to_string(),
                    "employee_count": period.employee_count,
                    "total_final": period.total_final,
                }),
            ))
            .await?;
    }

    info!(
        "Computed payroll period {} for {} employee(s), total {}",
        key_string, period.employee_count, period.total_final
    );
    Ok((period, lines))
}

async fn transition_period<S: Store>(
    store: &S,
    period_key: &str,
    expected: PayrollPeriodStatus,
    target: PayrollPeriodStatus,
    action: &str,
    actor: Option<Uuid>,
) -> EngineResult<PayrollPeriod> {
    period_key.parse::<PeriodKey>()?;
    let mut period = store
        .period(period_key)
        .await?
        .ok_or_else(|| EngineError::PeriodNotFound(period_key.to_string()))?;
    if period.status != expected {
        return Err(EngineError::InvalidStatusTransition {
            period: period_key.to_string(),
            from: period.status,
            to: target,
        });
    }

    let now = Utc::now();
    store.set_period_status(period.id, target, actor, now).await?;
    period.status = target;
    match target {
        PayrollPeriodStatus::Approved => {
            period.approved_by = actor;
            period.approved_at = Some(now);
        }
        PayrollPeriodStatus::Paid => {
            period.paid_by = actor;
            period.paid_at = Some(now);
        }
        PayrollPeriodStatus::Draft => {}
    }

    if let Some(actor_id) = actor {
        store
            .record_audit(&AuditEntry::new(
                actor_id,
                action,
                format!("payroll:{period_key}"),
                json!({ "status": target.as_str() }),
            ))
            .await?;
    }
    Ok(period)
}

/// Moves a draft period to approved, stamping the actor and timestamp.
pub async fn approve_period<S: Store>(
    store: &S,
    period_key: &str,
    actor: Option<Uuid>,
) -> EngineResult<PayrollPeriod> {
    let period = transition_period(
        store,
        period_key,
        PayrollPeriodStatus::Draft,
        PayrollPeriodStatus::Approved,
        "payroll.approve",
        actor,
    )
    .await?;
    info!("Payroll period {} approved", period_key);
    Ok(period)
}

/// Moves an approved period to paid. From this point the period's month is
/// locked: attendance recalculations skip it and payroll recomputation of
/// the period errors.
pub async fn mark_period_paid<S: Store>(
    store: &S,
    period_key: &str,
    actor: Option<Uuid>,
) -> EngineResult<PayrollPeriod> {
    let period = transition_period(
        store,
        period_key,
        PayrollPeriodStatus::Approved,
        PayrollPeriodStatus::Paid,
        "payroll.mark_paid",
        actor,
    )
    .await?;
    info!(
        "Payroll period {} marked paid; its month is now locked",
        period_key
    );
    Ok(period)
}

/// Renders a period's lines as CSV, one row per employee sorted by name,
/// amounts with two decimals, dates ISO.
pub async fn export_period_csv<S: Store>(store: &S, period_key: &str) -> EngineResult<String> {
    period_key.parse::<PeriodKey>()?;
    let period = store
        .period(period_key)
        .await?
        .ok_or_else(|| EngineError::PeriodNotFound(period_key.to_string()))?;
    let lines = store.lines_for_period(period.id).await?;

    let user_ids: Vec<Uuid> = lines.iter().map(|l| l.user_id).collect();
    let users = store.users_by_ids(&user_ids).await?;
    let users_by_id: HashMap<Uuid, &User> = users.iter().map(|u| (u.id, u)).collect();

    let mut rows: Vec<(String, String, &PayrollLine)> = lines
        .iter()
        .map(|line| {
            let (name, email) = users_by_id
                .get(&line.user_id)
                .map(|u| (u.full_name(), u.email.clone()))
                .unwrap_or_default();
            (name, email, line)
        })
        .collect();
    rows.sort_by(|a, b| (&a.0, &a.1, a.2.user_id).cmp(&(&b.0, &b.1, b.2.user_id)));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Employee",
            "Email",
            "Period Start",
            "Period End",
            "Base Amount",
            "Monthly Attendance",
            "Monthly Deferred",
            "Quarterly Attendance",
            "KPI Bonus",
            "Final Amount",
        ])
        .map_err(|e| EngineError::CsvExport(e.to_string()))?;
    for (name, email, line) in &rows {
        let record = vec![
            name.clone(),
            email.clone(),
            period.period_start.to_string(),
            period.period_end.to_string(),
            format!("{:.2}", line.base_amount),
            format!("{:.2}", line.monthly_attendance),
            format!("{:.2}", line.monthly_deferred),
            format!("{:.2}", line.quarterly_attendance),
            format!("{:.2}", line.kpi_bonus),
            format!("{:.2}", line.final_amount),
        ];
        writer
            .write_record(&record)
            .map_err(|e| EngineError::CsvExport(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::CsvExport(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| EngineError::CsvExport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    use crate::models::WeekSchedule;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config(user_id: Uuid, effective_on: NaiveDate, salary: Decimal) -> CompensationConfig {
        CompensationConfig {
            id: Uuid::new_v4(),
            user_id,
            effective_on,
            base_semi_monthly_salary: salary,
            monthly_attendance_bonus: dec!(100),
            quarterly_attendance_bonus: dec!(300),
            kpi_eligible: false,
            kpi_default_bonus: Decimal::ZERO,
            schedule: WeekSchedule::standard_week(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                60,
                dec!(8),
            ),
            pto_accrual_hours_per_month: dec!(8),
            uto_accrual_hours_per_month: dec!(4),
            pto_opening_balance_hours: Decimal::ZERO,
            uto_opening_balance_hours: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn candidate(
        bonus_type: BonusType,
        period_key: &str,
        amount: Decimal,
        status: BonusStatus,
        final_amount: Option<Decimal>,
        eligible_pay_date: NaiveDate,
    ) -> BonusCandidate {
        BonusCandidate {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            bonus_type,
            period_key: period_key.to_string(),
            amount,
            status,
            final_amount,
            eligible_pay_date,
            snapshot: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn single_config_gets_the_full_salary() {
        let user_id = Uuid::new_v4();
        let configs = vec![config(user_id, d(2025, 1, 1), dec!(2500))];
        let period: PeriodKey = "2025-09-B".parse().unwrap();
        assert_eq!(prorate_base(&configs, period), dec!(2500));
    }

    #[test]
    fn mid_period_raise_is_day_weighted() {
        let user_id = Uuid::new_v4();
        // 2025-09-B covers the 16th–30th: 5 days at 1500, 10 days at 3000.
        let configs = vec![
            config(user_id, d(2025, 1, 1), dec!(1500)),
            config(user_id, d(2025, 9, 21), dec!(3000)),
        ];
        let period: PeriodKey = "2025-09-B".parse().unwrap();
        assert_eq!(prorate_base(&configs, period), dec!(2500));
    }

    #[test]
    fn days_before_the_first_config_prorate_down() {
        let user_id = Uuid::new_v4();
        // Joined on the 21st: only 10 of 15 days are covered.
        let configs = vec![config(user_id, d(2025, 9, 21), dec!(3000))];
        let period: PeriodKey = "2025-09-B".parse().unwrap();
        assert_eq!(prorate_base(&configs, period), dec!(2000));
    }

    #[test]
    fn proration_rounds_to_cents() {
        let user_id = Uuid::new_v4();
        let configs = vec![
            config(user_id, d(2025, 1, 1), dec!(1000)),
            config(user_id, d(2025, 9, 17), dec!(2000)),
        ];
        // 1 day at 1000 and 14 days at 2000 over 15 days:
        // 66.666... + 1866.666... = 1933.333... rounds to 1933.33.
        let period: PeriodKey = "2025-09-B".parse().unwrap();
        assert_eq!(prorate_base(&configs, period), dec!(1933.33));
    }

    #[test]
    fn split_pays_only_qualifying_statuses() {
        let pay_date = d(2025, 10, 15);
        let candidates = vec![
            candidate(
                BonusType::MonthlyAttendance,
                "2025-09",
                dec!(100),
                BonusStatus::Earned,
                Some(dec!(100)),
                pay_date,
            ),
            // Pending KPI has not been reviewed; it must not pay out.
            candidate(
                BonusType::Kpi,
                "2025-09",
                dec!(250),
                BonusStatus::Pending,
                None,
                pay_date,
            ),
            candidate(
                BonusType::Kpi,
                "2025-08",
                dec!(250),
                BonusStatus::Approved,
                Some(dec!(200)),
                pay_date,
            ),
            candidate(
                BonusType::QuarterlyAttendance,
                "2025-Q3",
                dec!(300),
                BonusStatus::Earned,
                Some(dec!(300)),
                pay_date,
            ),
        ];
        let buckets = split_candidates(&candidates, pay_date);
        assert_eq!(buckets.monthly, dec!(100));
        assert_eq!(buckets.deferred, Decimal::ZERO);
        assert_eq!(buckets.quarterly, dec!(300));
        // The approved KPI pays its overridden final amount.
        assert_eq!(buckets.kpi, dec!(200));
        assert_eq!(buckets.candidate_ids.len(), 3);
    }

    #[test]
    fn monthly_bonus_from_an_older_month_is_deferred() {
        let pay_date = d(2025, 11, 15);
        let candidates = vec![
            candidate(
                BonusType::MonthlyAttendance,
                "2025-10",
                dec!(100),
                BonusStatus::Earned,
                Some(dec!(100)),
                pay_date,
            ),
            // Earned for September but only paid in November.
            candidate(
                BonusType::MonthlyAttendance,
                "2025-09",
                dec!(100),
                BonusStatus::Earned,
                Some(dec!(100)),
                pay_date,
            ),
        ];
        let buckets = split_candidates(&candidates, pay_date);
        assert_eq!(buckets.monthly, dec!(100));
        assert_eq!(buckets.deferred, dec!(100));
    }
}

/// Property-based tests for salary proration and bonus bucketing.
#[cfg(test)]
mod props {
    use super::*;
    use chrono::NaiveTime;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use crate::calendar::PeriodHalf;
    use crate::models::WeekSchedule;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config_with(
        user_id: Uuid,
        effective_on: NaiveDate,
        salary: Decimal,
    ) -> CompensationConfig {
        CompensationConfig {
            id: Uuid::new_v4(),
            user_id,
            effective_on,
            base_semi_monthly_salary: salary,
            monthly_attendance_bonus: dec!(100),
            quarterly_attendance_bonus: dec!(300),
            kpi_eligible: false,
            kpi_default_bonus: Decimal::ZERO,
            schedule: WeekSchedule::standard_week(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                60,
                dec!(8),
            ),
            pto_accrual_hours_per_month: dec!(8),
            uto_accrual_hours_per_month: dec!(4),
            pto_opening_balance_hours: Decimal::ZERO,
            uto_opening_balance_hours: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Semi-monthly salaries between 500.00 and 10,000.00.
    fn salary() -> impl Strategy<Value = Decimal> {
        (50_000i64..=1_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn any_period() -> impl Strategy<Value = PeriodKey> {
        (2024i32..=2026, 1u32..=12, prop::bool::ANY).prop_map(|(year, month, first_half)| {
            PeriodKey {
                month: MonthKey::new(year, month).expect("month is in range"),
                half: if first_half { PeriodHalf::A } else { PeriodHalf::B },
            }
        })
    }

    /// Earned monthly candidates for either the month preceding the pay date
    /// or an older one.
    fn earned_monthly(pay_date: NaiveDate) -> impl Strategy<Value = BonusCandidate> {
        let preceding = MonthKey::from_date(pay_date).prev();
        (1_000i64..=50_000, prop::bool::ANY).prop_map(move |(cents, on_cycle)| {
            let month = if on_cycle { preceding } else { preceding.prev() };
            BonusCandidate {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                bonus_type: BonusType::MonthlyAttendance,
                period_key: month.to_string(),
                amount: Decimal::new(cents, 2),
                status: BonusStatus::Earned,
                final_amount: None,
                eligible_pay_date: pay_date,
                snapshot: json!({}),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A config effective before the period covers every one of its days.
        #[test]
        fn prop_spans_cover_every_period_day(
            period in any_period(),
            salary in salary(),
        ) {
            let user_id = Uuid::new_v4();
            let configs = vec![config_with(user_id, d(2020, 1, 1), salary)];
            let covered: i64 = config_spans(&configs, period).iter().map(|s| s.days).sum();
            prop_assert_eq!(covered, period.total_days());
            prop_assert_eq!(prorate_base(&configs, period), salary);
        }

        /// A mid-period salary change keeps the prorated base between the two
        /// salaries, wherever the switch lands.
        #[test]
        fn prop_base_stays_between_the_salaries(
            period in any_period(),
            first in salary(),
            second in salary(),
            switch_offset in 0u64..=15,
        ) {
            let user_id = Uuid::new_v4();
            let switch = period.start() + chrono::Days::new(switch_offset);
            let configs = vec![
                config_with(user_id, d(2020, 1, 1), first),
                config_with(user_id, switch, second),
            ];
            let base = prorate_base(&configs, period);
            let low = first.min(second);
            let high = first.max(second);
            prop_assert!(
                base >= low && base <= high,
                "base {} outside [{}, {}]",
                base,
                low,
                high
            );
        }

        /// Bucketing splits earned monthly bonuses between the on-cycle and
        /// deferred buckets without losing a cent.
        #[test]
        fn prop_split_buckets_conserve_amounts(
            candidates in prop::collection::vec(earned_monthly(d(2025, 10, 15)), 0..8),
        ) {
            let total: Decimal = candidates.iter().map(|c| c.payable_amount()).sum();
            let buckets = split_candidates(&candidates, d(2025, 10, 15));
            prop_assert_eq!(buckets.monthly + buckets.deferred, total);
            prop_assert_eq!(buckets.candidate_ids.len(), candidates.len());
        }
    }
}
