// src/store/memory.rs

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
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

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // Per user, kept ascending by effective_on.
    configs: HashMap<Uuid, Vec<CompensationConfig>>,
    // Earliest session start per (user, business day).
    session_starts: HashMap<(Uuid, NaiveDate), DateTime<Utc>>,
    active_minutes: HashMap<(Uuid, NaiveDate), i64>,
    requests: HashMap<Uuid, Vec<TimeRequest>>,
    holidays: BTreeSet<NaiveDate>,
    facts: HashMap<(Uuid, String), AttendanceMonthFact>,
    candidates: HashMap<(Uuid, BonusType, String), BonusCandidate>,
    periods: HashMap<String, PayrollPeriod>,
    lines: HashMap<Uuid, Vec<PayrollLine>>,
    audits: Vec<AuditEntry>,
}

/// In-process store backed by `tokio::sync::RwLock` maps. The test suite
/// runs the whole pipeline against it; embedders staging data outside
/// Postgres can too.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_user(&self, first_name: &str, last_name: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.inner.write().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn seed_config(&self, config: CompensationConfig) {
        let mut inner = self.inner.write().await;
        let configs = inner.configs.entry(config.user_id).or_default();
        configs.retain(|c| c.effective_on != config.effective_on);
        configs.push(config);
        configs.sort_by_key(|c| c.effective_on);
    }

    /// Records a session start for a business day. When a day already has
    /// one, the earlier timestamp wins. The timestamp is allowed to fall on
    /// a different calendar day than `day` (midnight-crossing sessions).
    pub async fn seed_session_start(&self, user_id: Uuid, day: NaiveDate, start: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        inner
            .session_starts
            .entry((user_id, day))
            .and_modify(|existing| {
                if start < *existing {
                    *existing = start;
                }
            })
            .or_insert(start);
    }

    pub async fn seed_active_minutes(&self, user_id: Uuid, day: NaiveDate, minutes: i64) {
        self.inner
            .write()
            .await
            .active_minutes
            .insert((user_id, day), minutes);
    }

    pub async fn seed_request(&self, request: TimeRequest) {
        self.inner
            .write()
            .await
            .requests
            .entry(request.user_id)
            .or_default()
            .push(request);
    }

    pub async fn seed_holiday(&self, date: NaiveDate) {
        self.inner.write().await.holidays.insert(date);
    }

    pub async fn set_user_active(&self, user_id: Uuid, is_active: bool) {
        if let Some(user) = self.inner.write().await.users.get_mut(&user_id) {
            user.is_active = is_active;
        }
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.read().await.audits.clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn active_users(&self) -> EngineResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| u.is_active)
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            (&a.first_name, &a.last_name, a.id).cmp(&(&b.first_name, &b.last_name, b.id))
        });
        Ok(users)
    }

    async fn users_by_ids(&self, ids: &[Uuid]) -> EngineResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = ids
            .iter()
            .filter_map(|id| inner.users.get(id))
            .cloned()
            .collect();
        users.sort_by(|a, b| {
            (&a.first_name, &a.last_name, a.id).cmp(&(&b.first_name, &b.last_name, b.id))
        });
        Ok(users)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn effective_config(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Option<CompensationConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.configs.get(&user_id).and_then(|configs| {
            configs
                .iter()
                .rev()
                .find(|c| c.effective_on <= date)
                .cloned()
        }))
    }

    async fn configs_through(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Vec<CompensationConfig>> {
        let inner = self.inner.read().await;
        Ok(inner
            .configs
            .get(&user_id)
            .map(|configs| {
                configs
                    .iter()
                    .filter(|c| c.effective_on <= date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn first_session_starts(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .session_starts
            .iter()
            .filter(|((uid, day), _)| *uid == user_id && *day >= from && *day <= to)
            .map(|((_, day), start)| (*day, *start))
            .collect())
    }

    async fn active_minutes_by_day(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<HashMap<NaiveDate, i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .active_minutes
            .iter()
            .filter(|((uid, day), _)| *uid == user_id && *day >= from && *day <= to)
            .map(|((_, day), minutes)| (*day, *minutes))
            .collect())
    }
}

#[async_trait]
impl TimeOffStore for MemoryStore {
    async fn approved_requests_overlapping(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<TimeRequest>> {
        let inner = self.inner.read().await;
        let mut requests: Vec<TimeRequest> = inner
            .requests
            .get(&user_id)
            .map(|reqs| {
                reqs.iter()
                    .filter(|r| r.start_date <= to && r.end_date >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        requests.sort_by_key(|r| (r.start_date, r.id));
        Ok(requests)
    }
}

#[async_trait]
impl HolidayStore for MemoryStore {
    async fn holidays_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<NaiveDate>> {
        let inner = self.inner.read().await;
        Ok(inner.holidays.range(from..=to).copied().collect())
    }
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn fact(
        &self,
        user_id: Uuid,
        month_key: &str,
    ) -> EngineResult<Option<AttendanceMonthFact>> {
        let inner = self.inner.read().await;
        Ok(inner.facts.get(&(user_id, month_key.to_string())).cloned())
    }

    async fn facts_for_month(&self, month_key: &str) -> EngineResult<Vec<AttendanceMonthFact>> {
        let inner = self.inner.read().await;
        let mut facts: Vec<AttendanceMonthFact> = inner
            .facts
            .values()
            .filter(|f| f.month_key == month_key)
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.user_id);
        Ok(facts)
    }

    async fn upsert_fact(
        &self,
        fact: &AttendanceMonthFact,
    ) -> EngineResult<AttendanceMonthFact> {
        let mut inner = self.inner.write().await;
        let key = (fact.user_id, fact.month_key.clone());
        let mut stored = fact.clone();
        if let Some(existing) = inner.facts.get(&key) {
            stored.id = existing.id;
        }
        inner.facts.insert(key, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl BonusStore for MemoryStore {
    async fn candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<Option<BonusCandidate>> {
        let inner = self.inner.read().await;
        Ok(inner
            .candidates
            .get(&(user_id, bonus_type, period_key.to_string()))
            .cloned())
    }

    async fn upsert_candidate(&self, candidate: &BonusCandidate) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let key = (
            candidate.user_id,
            candidate.bonus_type,
            candidate.period_key.clone(),
        );
        let mut stored = candidate.clone();
        if let Some(existing) = inner.candidates.get(&key) {
            stored.id = existing.id;
            stored.created_at = existing.created_at;
        }
        inner.candidates.insert(key, stored);
        Ok(())
    }

    async fn delete_candidate(
        &self,
        user_id: Uuid,
        bonus_type: BonusType,
        period_key: &str,
    ) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .candidates
            .remove(&(user_id, bonus_type, period_key.to_string()));
        Ok(())
    }

    async fn candidates_for_pay_date(
        &self,
        pay_date: NaiveDate,
    ) -> EngineResult<Vec<BonusCandidate>> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<BonusCandidate> = inner
            .candidates
            .values()
            .filter(|c| c.eligible_pay_date == pay_date)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            (a.user_id, a.bonus_type.as_str(), &a.period_key)
                .cmp(&(b.user_id, b.bonus_type.as_str(), &b.period_key))
        });
        Ok(candidates)
    }
}

#[async_trait]
impl PayrollStore for MemoryStore {
    async fn period(&self, period_key: &str) -> EngineResult<Option<PayrollPeriod>> {
        let inner = self.inner.read().await;
        Ok(inner.periods.get(period_key).cloned())
    }

    async fn lines_for_period(&self, period_id: Uuid) -> EngineResult<Vec<PayrollLine>> {
        let inner = self.inner.read().await;
        Ok(inner.lines.get(&period_id).cloned().unwrap_or_default())
    }

    async fn replace_period(
        &self,
        period: &PayrollPeriod,
        lines: &[PayrollLine],
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.periods.get(&period.period_key) {
            if previous.id != period.id {
                let previous_id = previous.id;
                inner.lines.remove(&previous_id);
            }
        }
        inner
            .periods
            .insert(period.period_key.clone(), period.clone());
        inner.lines.insert(period.id, lines.to_vec());
        Ok(())
    }

    async fn set_period_status(
        &self,
        period_id: Uuid,
        status: PayrollPeriodStatus,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(period) = inner.periods.values_mut().find(|p| p.id == period_id) {
            period.status = status;
            match status {
                PayrollPeriodStatus::Approved => {
                    period.approved_by = actor;
                    period.approved_at = Some(at);
                }
                PayrollPeriodStatus::Paid => {
                    period.paid_by = actor;
                    period.paid_at = Some(at);
                }
                PayrollPeriodStatus::Draft => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_audit(&self, entry: &AuditEntry) -> EngineResult<()> {
        self.inner.write().await.audits.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::models::WeekSchedule;

    fn config_effective(user_id: Uuid, effective_on: NaiveDate) -> CompensationConfig {
        CompensationConfig {
            id: Uuid::new_v4(),
            user_id,
            effective_on,
            base_semi_monthly_salary: dec!(2500),
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

    #[tokio::test]
    async fn effective_config_picks_latest_on_or_before() {
        let store = MemoryStore::new();
        let user = store.seed_user("Ada", "Bell", "ada@example.com").await;
        let jan = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let jun = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        store.seed_config(config_effective(user.id, jan)).await;
        store.seed_config(config_effective(user.id, jun)).await;

        let picked = store
            .effective_config(user.id, NaiveDate::from_ymd_opt(2025, 5, 31).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.effective_on, jan);

        let picked = store.effective_config(user.id, jun).await.unwrap().unwrap();
        assert_eq!(picked.effective_on, jun);

        let none = store
            .effective_config(user.id, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn session_start_keeps_earliest() {
        let store = MemoryStore::new();
        let user = store.seed_user("Ada", "Bell", "ada@example.com").await;
        let day = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let later = DateTime::parse_from_rfc3339("2025-09-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let earlier = DateTime::parse_from_rfc3339("2025-09-01T14:02:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.seed_session_start(user.id, day, later).await;
        store.seed_session_start(user.id, day, earlier).await;

        let starts = store
            .first_session_starts(user.id, day, day)
            .await
            .unwrap();
        assert_eq!(starts.get(&day), Some(&earlier));
    }

    #[tokio::test]
    async fn fact_upsert_preserves_row_id() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let fact = AttendanceMonthFact {
            id: Uuid::new_v4(),
            user_id,
            month_key: "2025-09".to_string(),
            assigned_hours: dec!(176),
            worked_hours: dec!(176),
            pto_hours: Decimal::ZERO,
            uto_absence_hours: Decimal::ZERO,
            tardy_minutes: 0,
            matched_make_up_hours: Decimal::ZERO,
            is_perfect: true,
            reasons: vec![],
            days: vec![],
            computed_at: Utc::now(),
        };
        let first = store.upsert_fact(&fact).await.unwrap();

        let mut second = fact.clone();
        second.id = Uuid::new_v4();
        second.worked_hours = dec!(170);
        let stored = store.upsert_fact(&second).await.unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(stored.worked_hours, dec!(170));
        let fetched = store.fact(user_id, "2025-09").await.unwrap().unwrap();
        assert_eq!(fetched.id, first.id);
    }
}
