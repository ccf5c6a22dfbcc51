// src/services/bonuses.rs
//
// Bonus Cascade: consumes a month's attendance facts and emits, overwrites,
// or retracts bonus candidates. Monthly and quarterly candidates are fully
// derived and deleted outright when the underlying fact stops qualifying;
// KPI candidates carry sticky manual decisions that recomputation must not
// touch.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::calendar::MonthKey;
use crate::errors::EngineResult;
use crate::models::{AuditEntry, BonusCandidate, BonusStatus, BonusType};
use crate::store::Store;

fn fifteenth_of(month: MonthKey) -> NaiveDate {
    NaiveDate::from_ymd_opt(month.year(), month.month(), 15).expect("month key is validated")
}

/// Pay date for a month's attendance bonus: the 15th of the following month,
/// pushed one month further when `today` is already past it (a late
/// recompute missed the usual cycle).
pub fn monthly_bonus_pay_date(month: MonthKey, today: NaiveDate) -> NaiveDate {
    let scheduled = fifteenth_of(month.next());
    if today > scheduled {
        fifteenth_of(month.next().next())
    } else {
        scheduled
    }
}

/// Pay date for a quarterly bonus: the 15th after the quarter closes, which
/// wraps into January for Q4.
pub fn quarterly_bonus_pay_date(quarter_end: MonthKey) -> NaiveDate {
    fifteenth_of(quarter_end.next())
}

/// Re-derives every user's bonus candidates from the month's attendance
/// facts. Runs after each attendance recalculation and is idempotent over
/// the same facts and configs.
pub async fn sync_bonuses_for_month<S: Store>(
    store: &S,
    tz: Tz,
    month: MonthKey,
    actor: Option<Uuid>,
) -> EngineResult<()> {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let monthly_pay_date = monthly_bonus_pay_date(month, today);
    let month_key = month.to_string();
    let month_end = month.last_day();

    let facts = store.facts_for_month(&month_key).await?;
    for fact in &facts {
        let config = store.effective_config(fact.user_id, month_end).await?;

        // Monthly: perfect month + a config to price it, else revoke.
        match &config {
            Some(cfg) if fact.is_perfect => {
                let amount = cfg.monthly_attendance_bonus;
                store
                    .upsert_candidate(&candidate(
                        fact.user_id,
                        BonusType::MonthlyAttendance,
                        month_key.clone(),
                        amount,
                        BonusStatus::Earned,
                        Some(amount),
                        monthly_pay_date,
                        json!({
                            "month_key": month_key,
                            "assigned_hours": fact.assigned_hours,
                            "worked_hours": fact.worked_hours,
                            "tardy_minutes": fact.tardy_minutes,
                        }),
                    ))
                    .await?;
            }
            _ => {
                store
                    .delete_candidate(fact.user_id, BonusType::MonthlyAttendance, &month_key)
                    .await?;
            }
        }

        // Quarterly: checked only when a quarter just closed. Exactly three
        // facts, all perfect; a user who joined mid-quarter has fewer facts
        // and is silently ineligible.
        if month.is_quarter_end() {
            let quarter_key = month.quarter_key();
            let mut quarter_facts = Vec::with_capacity(3);
            for quarter_month in month.quarter_months() {
                if let Some(f) = store.fact(fact.user_id, &quarter_month.to_string()).await? {
                    quarter_facts.push(f);
                }
            }
            let all_perfect =
                quarter_facts.len() == 3 && quarter_facts.iter().all(|f| f.is_perfect);
            match &config {
                Some(cfg) if all_perfect => {
                    let amount = cfg.quarterly_attendance_bonus;
                    store
                        .upsert_candidate(&candidate(
                            fact.user_id,
                            BonusType::QuarterlyAttendance,
                            quarter_key.clone(),
                            amount,
                            BonusStatus::Earned,
                            Some(amount),
                            quarterly_bonus_pay_date(month),
                            json!({
                                "quarter": quarter_key,
                                "months": month
                                    .quarter_months()
                                    .iter()
                                    .map(|m| m.to_string())
                                    .collect::<Vec<_>>(),
                            }),
                        ))
                        .await?;
                }
                _ => {
                    store
                        .delete_candidate(
                            fact.user_id,
                            BonusType::QuarterlyAttendance,
                            &quarter_key,
                        )
                        .await?;
                }
            }
        }

        // KPI: eligibility comes from the config alone; the attendance fact
        // only triggers the refresh. Approved/denied decisions are sticky.
        match &config {
            Some(cfg) if cfg.kpi_eligible => {
                let existing = store
                    .candidate(fact.user_id, BonusType::Kpi, &month_key)
                    .await?;
                if existing
                    .as_ref()
                    .is_some_and(|c| !c.status.is_overwritable())
                {
                    continue;
                }
                store
                    .upsert_candidate(&candidate(
                        fact.user_id,
                        BonusType::Kpi,
                        month_key.clone(),
                        cfg.kpi_default_bonus,
                        BonusStatus::Pending,
                        None,
                        monthly_pay_date,
                        json!({
                            "month_key": month_key,
                            "default_bonus": cfg.kpi_default_bonus,
                        }),
                    ))
                    .await?;
            }
            _ => {
                store
                    .delete_candidate(fact.user_id, BonusType::Kpi, &month_key)
                    .await?;
            }
        }
    }

    if let Some(actor_id) = actor {
        store
            .record_audit(&AuditEntry::new(
                actor_id,
                "bonuses.sync",
                format!("bonuses:{month}"),
                json!({
                    "month_key": month_key,
                    "facts": facts.len(),
                    "monthly_pay_date": monthly_pay_date.to_string(),
                }),
            ))
            .await?;
    }

    info!(
        "Synced bonus candidates for {} across {} fact(s)",
        month,
        facts.len()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn candidate(
    user_id: Uuid,
    bonus_type: BonusType,
    period_key: String,
    amount: Decimal,
    status: BonusStatus,
    final_amount: Option<Decimal>,
    eligible_pay_date: NaiveDate,
    snapshot: serde_json::Value,
) -> BonusCandidate {
    let now = Utc::now();
    BonusCandidate {
        id: Uuid::new_v4(),
        user_id,
        bonus_type,
        period_key,
        amount,
        status,
        final_amount,
        eligible_pay_date,
        snapshot,
        created_at: now,
        updated_at: now,
    }
}
