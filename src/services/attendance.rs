// src/services/attendance.rs
//
// Attendance Fact Builder: turns one month of session starts, per-minute
// activity, approved time requests, and holidays into one
// AttendanceMonthFact per user, then re-syncs the bonus cascade. The fact is
// a cache of the underlying data, so recomputation always overwrites it
// wholesale.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::{MonthKey, PeriodHalf, PeriodKey};
use crate::errors::EngineResult;
use crate::models::{
    AttendanceMonthFact, AuditEntry, CompensationConfig, DaySnapshot, PayrollPeriodStatus,
    TimeRequest, TimeRequestType,
};
use crate::services::bonuses;
use crate::services::config::active_config_on;
use crate::services::round2;
use crate::store::Store;

/// Make-up hours may settle an absence at most this many calendar days away
/// from the request's start date, in either direction.
pub const MAKE_UP_WINDOW_DAYS: i64 = 14;

/// Monthly ceiling on matched make-up hours.
pub const MAKE_UP_MONTHLY_CAP_HOURS: Decimal = dec!(8);

/// Cumulative tardy minutes a month tolerates before losing the perfect flag.
pub const TARDY_TOLERANCE_MINUTES: i64 = 90;

/// Slack when judging assigned hours fully covered.
const PERFECT_HOURS_EPSILON: Decimal = dec!(0.01);

/// Result of a month recalculation. A locked month is skipped, not failed:
/// late edits after payout are normal operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecalcOutcome {
    Completed(Vec<AttendanceMonthFact>),
    SkippedLocked,
}

/// A month is locked once either of its semi-monthly payroll periods has
/// been paid. Checked before every recomputation entry point.
pub async fn is_month_locked<S: Store>(store: &S, month: MonthKey) -> EngineResult<bool> {
    for half in [PeriodHalf::A, PeriodHalf::B] {
        let key = PeriodKey { month, half };
        if let Some(period) = store.period(&key.to_string()).await? {
            if period.status == PayrollPeriodStatus::Paid {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Recomputes attendance facts for one month, then re-syncs bonuses.
///
/// `user_subset` overrides the default set of all active users. Users are
/// processed sequentially so the audit order stays deterministic; each fact
/// upsert is atomic on its own, the month is not one transaction. Two
/// concurrent recalculations of the same month race via last-write-wins
/// upserts, which is acceptable because the computation is idempotent over
/// the same inputs.
pub async fn recalc_attendance_for_month<S: Store>(
    store: &S,
    tz: Tz,
    month: MonthKey,
    actor: Option<Uuid>,
    user_subset: Option<&[Uuid]>,
) -> EngineResult<RecalcOutcome> {
    if is_month_locked(store, month).await? {
        warn!(
            "Attendance recalculation for {} skipped: month is locked by a paid payroll period",
            month
        );
        return Ok(RecalcOutcome::SkippedLocked);
    }

    let users = match user_subset {
        Some(ids) => store.users_by_ids(ids).await?,
        None => store.active_users().await?,
    };

    let range_start = month.first_day();
    let range_end = month.last_day();
    let holidays: HashSet<NaiveDate> = store
        .holidays_in_range(range_start, range_end)
        .await?
        .into_iter()
        .collect();

    let mut facts = Vec::with_capacity(users.len());
    for user in &users {
        let configs = store.configs_through(user.id, range_end).await?;
        let session_starts = store
            .first_session_starts(user.id, range_start, range_end)
            .await?;
        let active_minutes = store
            .active_minutes_by_day(user.id, range_start, range_end)
            .await?;
        let requests = store
            .approved_requests_overlapping(user.id, range_start, range_end)
            .await?;

        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user.id, month, tz, &inputs);
        let stored = store.upsert_fact(&fact).await?;

        if let Some(actor_id) = actor {
            store
                .record_audit(&AuditEntry::new(
                    actor_id,
                    "attendance.recalc",
                    format!("attendance:{}:{}", month, user.id),
                    json!({
                        "month_key": month.to_string(),
                        "assigned_hours": stored.assigned_hours,
                        "worked_hours": stored.worked_hours,
                        "uto_absence_hours": stored.uto_absence_hours,
                        "tardy_minutes": stored.tardy_minutes,
                        "is_perfect": stored.is_perfect,
                    }),
                ))
                .await?;
        }
        facts.push(stored);
    }

    info!(
        "Recalculated attendance for {} user(s) in {}",
        facts.len(),
        month
    );

    bonuses::sync_bonuses_for_month(store, tz, month, actor).await?;

    Ok(RecalcOutcome::Completed(facts))
}

/// One user's already-fetched inputs for a month computation.
pub struct MonthInputs<'a> {
    /// Configs with `effective_on <=` month end, ascending.
    pub configs: &'a [CompensationConfig],
    /// Earliest session start per business day.
    pub session_starts: &'a HashMap<NaiveDate, DateTime<Utc>>,
    /// Active-or-idle minute counts per day.
    pub active_minutes: &'a HashMap<NaiveDate, i64>,
    /// Approved requests overlapping the month.
    pub requests: &'a [TimeRequest],
    pub holidays: &'a HashSet<NaiveDate>,
}

/// One day's unexcused hour deficit awaiting make-up matching.
#[derive(Debug, Clone, PartialEq)]
struct AbsenceEntry {
    date: NaiveDate,
    remaining: Decimal,
}

struct RequestBuckets {
    pto: HashMap<NaiveDate, Decimal>,
    uto: HashMap<NaiveDate, Decimal>,
    make_up: HashMap<NaiveDate, Decimal>,
}

/// Splits each request's hours evenly across the calendar days it spans,
/// bucketed by type. Days outside the month under computation still receive
/// their share; the per-day pass simply never reads them.
fn distribute_requests(requests: &[TimeRequest]) -> RequestBuckets {
    let mut buckets = RequestBuckets {
        pto: HashMap::new(),
        uto: HashMap::new(),
        make_up: HashMap::new(),
    };
    for request in requests {
        // Inverted ranges are malformed hand-off data from the request
        // workflow; they contribute nothing.
        let day_count = request.day_count();
        if day_count <= 0 {
            warn!(
                "Skipping time request {} with inverted range {}..{}",
                request.id, request.start_date, request.end_date
            );
            continue;
        }
        let per_day = request.hours / Decimal::from(day_count);
        let bucket = match request.request_type {
            TimeRequestType::Pto => &mut buckets.pto,
            TimeRequestType::Uto => &mut buckets.uto,
            TimeRequestType::MakeUp => &mut buckets.make_up,
        };
        for day in request
            .start_date
            .iter_days()
            .take_while(|d| *d <= request.end_date)
        {
            *bucket.entry(day).or_insert(Decimal::ZERO) += per_day;
        }
    }
    buckets
}

/// Greedy windowed matching: make-up requests in start-date order, ledger
/// entries in date order, a request settling any entry within
/// `MAKE_UP_WINDOW_DAYS` of its start date. Takes are clamped so the monthly
/// total never exceeds the cap. The ordering is policy, not an optimization
/// target: earliest make-up requests win the available deficits, and the
/// request that hits the cap simply stops short.
fn match_make_up_requests(requests: &[TimeRequest], ledger: &mut [AbsenceEntry]) -> Decimal {
    let mut make_ups: Vec<&TimeRequest> = requests
        .iter()
        .filter(|r| r.request_type == TimeRequestType::MakeUp && r.day_count() > 0)
        .collect();
    make_ups.sort_by_key(|r| (r.start_date, r.id));

    let mut matched_total = Decimal::ZERO;
    'requests: for request in make_ups {
        let mut request_remaining = request.hours;
        for entry in ledger.iter_mut() {
            if matched_total >= MAKE_UP_MONTHLY_CAP_HOURS {
                break 'requests;
            }
            if request_remaining <= Decimal::ZERO {
                break;
            }
            if entry.remaining <= Decimal::ZERO {
                continue;
            }
            if (entry.date - request.start_date).num_days().abs() > MAKE_UP_WINDOW_DAYS {
                continue;
            }
            let take = entry
                .remaining
                .min(request_remaining)
                .min(MAKE_UP_MONTHLY_CAP_HOURS - matched_total);
            entry.remaining -= take;
            request_remaining -= take;
            matched_total += take;
        }
    }
    matched_total
}

/// Builds one user's month fact from already-fetched inputs.
///
/// Pure: the same inputs always produce the same fact apart from
/// `computed_at` and the fresh row id (replaced by the stored id on upsert).
/// A user with no applicable config accrues no assigned hours; worked hours
/// recorded by the activity data still appear.
pub fn build_month_fact(
    user_id: Uuid,
    month: MonthKey,
    tz: Tz,
    inputs: &MonthInputs<'_>,
) -> AttendanceMonthFact {
    let buckets = distribute_requests(inputs.requests);

    let mut assigned_total = Decimal::ZERO;
    let mut worked_total = Decimal::ZERO;
    let mut pto_total = Decimal::ZERO;
    let mut tardy_total: i64 = 0;
    let mut ledger: Vec<AbsenceEntry> = Vec::new();
    let mut days: Vec<DaySnapshot> = Vec::with_capacity(31);

    for day in month.days() {
        let config = active_config_on(inputs.configs, day);
        let schedule = config.map(|c| c.schedule.day(day.weekday()));
        let holiday = inputs.holidays.contains(&day);
        let scheduled = schedule.map(|s| s.enabled).unwrap_or(false);

        let expected = match schedule {
            Some(s) if s.enabled && !holiday => s.expected_hours,
            _ => Decimal::ZERO,
        };
        assigned_total += expected;

        let minutes = inputs.active_minutes.get(&day).copied().unwrap_or(0);
        let worked = round2(Decimal::from(minutes) / dec!(60));
        worked_total += worked;

        let pto = buckets.pto.get(&day).copied().unwrap_or(Decimal::ZERO);
        let uto = buckets.uto.get(&day).copied().unwrap_or(Decimal::ZERO);
        let make_up = buckets.make_up.get(&day).copied().unwrap_or(Decimal::ZERO);
        pto_total += pto;

        let mut notes: Vec<String> = Vec::new();
        if pto > Decimal::ZERO {
            notes.push("PTO".to_string());
        }
        if uto > Decimal::ZERO {
            notes.push("UTO Request".to_string());
        }
        if make_up > Decimal::ZERO {
            notes.push("Make-up".to_string());
        }

        // Tardiness needs an enabled schedule and a session start whose
        // local date is still `day`: a start that rolled past midnight is
        // never measured against the previous day's scheduled start.
        let mut tardy: i64 = 0;
        if scheduled {
            if let (Some(sched), Some(start)) = (schedule, inputs.session_starts.get(&day)) {
                let local = start.with_timezone(&tz);
                if local.date_naive() == day {
                    tardy = (local.time() - sched.start).num_minutes().max(0);
                }
            }
        }
        // PTO on the day or a holiday excuses lateness outright.
        if pto > Decimal::ZERO || holiday {
            tardy = 0;
        }
        tardy_total += tardy;

        let deficit = (expected - (worked + pto + uto + make_up)).max(Decimal::ZERO);
        if deficit > Decimal::ZERO {
            ledger.push(AbsenceEntry {
                date: day,
                remaining: deficit,
            });
            notes.push("Absence".to_string());
        }

        days.push(DaySnapshot {
            date: day,
            expected_hours: expected,
            worked_hours: worked,
            pto_hours: round2(pto),
            uto_hours: round2(uto),
            make_up_hours: round2(make_up),
            tardy_minutes: tardy,
            holiday,
            notes,
        });
    }

    let matched = match_make_up_requests(inputs.requests, &mut ledger);
    let residual: Decimal = ledger.iter().map(|e| e.remaining).sum();

    let assigned_hours = round2(assigned_total);
    let worked_hours = round2(worked_total);
    let pto_hours = round2(pto_total);
    let matched_make_up_hours = round2(matched);
    let uto_absence_hours = round2(residual);

    // UTO never counts toward perfect attendance; only PTO and matched
    // make-up hours cover assigned time.
    let is_perfect = tardy_total <= TARDY_TOLERANCE_MINUTES
        && assigned_hours - (worked_hours + pto_hours + matched_make_up_hours)
            < PERFECT_HOURS_EPSILON;

    let reasons = days
        .iter()
        .flat_map(|d| d.notes.iter().map(move |n| format!("{}: {}", d.date, n)))
        .collect();

    AttendanceMonthFact {
        id: Uuid::new_v4(),
        user_id,
        month_key: month.to_string(),
        assigned_hours,
        worked_hours,
        pto_hours,
        uto_absence_hours,
        tardy_minutes: tardy_total,
        matched_make_up_hours,
        is_perfect,
        reasons,
        days,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use chrono_tz::America::Chicago;

    use crate::models::WeekSchedule;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn request(
        request_type: TimeRequestType,
        start: NaiveDate,
        end: NaiveDate,
        hours: Decimal,
    ) -> TimeRequest {
        TimeRequest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            request_type,
            start_date: start,
            end_date: end,
            hours,
        }
    }

    fn weekday_config(user_id: Uuid, effective_on: NaiveDate) -> CompensationConfig {
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

    #[test]
    fn distribution_splits_hours_evenly_by_type() {
        let requests = vec![
            request(TimeRequestType::Pto, d(2025, 9, 2), d(2025, 9, 4), dec!(24)),
            request(TimeRequestType::Uto, d(2025, 9, 10), d(2025, 9, 10), dec!(4)),
        ];
        let buckets = distribute_requests(&requests);
        assert_eq!(buckets.pto.get(&d(2025, 9, 2)), Some(&dec!(8)));
        assert_eq!(buckets.pto.get(&d(2025, 9, 3)), Some(&dec!(8)));
        assert_eq!(buckets.pto.get(&d(2025, 9, 4)), Some(&dec!(8)));
        assert!(buckets.pto.get(&d(2025, 9, 5)).is_none());
        assert_eq!(buckets.uto.get(&d(2025, 9, 10)), Some(&dec!(4)));
        assert!(buckets.make_up.is_empty());
    }

    #[test]
    fn inverted_request_ranges_are_skipped() {
        let requests = vec![request(
            TimeRequestType::Pto,
            d(2025, 9, 10),
            d(2025, 9, 9),
            dec!(8),
        )];
        let buckets = distribute_requests(&requests);
        assert!(buckets.pto.is_empty());

        // An inverted make-up range settles nothing either.
        let mut ledger = vec![AbsenceEntry {
            date: d(2025, 9, 8),
            remaining: dec!(8),
        }];
        let make_ups = vec![request(
            TimeRequestType::MakeUp,
            d(2025, 9, 10),
            d(2025, 9, 9),
            dec!(8),
        )];
        let matched = match_make_up_requests(&make_ups, &mut ledger);
        assert_eq!(matched, Decimal::ZERO);
        assert_eq!(ledger[0].remaining, dec!(8));
    }

    #[test]
    fn matcher_settles_absence_within_window() {
        let mut ledger = vec![AbsenceEntry {
            date: d(2025, 9, 3),
            remaining: dec!(8),
        }];
        let requests = vec![request(
            TimeRequestType::MakeUp,
            d(2025, 9, 6),
            d(2025, 9, 6),
            dec!(8),
        )];
        let matched = match_make_up_requests(&requests, &mut ledger);
        assert_eq!(matched, dec!(8));
        assert_eq!(ledger[0].remaining, Decimal::ZERO);
    }

    #[test]
    fn matcher_ignores_absence_outside_window() {
        let mut ledger = vec![AbsenceEntry {
            date: d(2025, 9, 3),
            remaining: dec!(8),
        }];
        let requests = vec![request(
            TimeRequestType::MakeUp,
            d(2025, 9, 23),
            d(2025, 9, 23),
            dec!(8),
        )];
        let matched = match_make_up_requests(&requests, &mut ledger);
        assert_eq!(matched, Decimal::ZERO);
        assert_eq!(ledger[0].remaining, dec!(8));
    }

    #[test]
    fn matcher_clamps_at_monthly_cap() {
        let mut ledger = vec![
            AbsenceEntry {
                date: d(2025, 9, 3),
                remaining: dec!(6),
            },
            AbsenceEntry {
                date: d(2025, 9, 10),
                remaining: dec!(6),
            },
        ];
        let requests = vec![request(
            TimeRequestType::MakeUp,
            d(2025, 9, 12),
            d(2025, 9, 12),
            dec!(12),
        )];
        let matched = match_make_up_requests(&requests, &mut ledger);
        assert_eq!(matched, dec!(8));
        assert_eq!(ledger[0].remaining, Decimal::ZERO);
        // Second entry only gets what the cap leaves over.
        assert_eq!(ledger[1].remaining, dec!(4));
    }

    #[test]
    fn earliest_make_up_request_wins_the_deficit() {
        let mut ledger = vec![AbsenceEntry {
            date: d(2025, 9, 10),
            remaining: dec!(5),
        }];
        let later = request(TimeRequestType::MakeUp, d(2025, 9, 13), d(2025, 9, 13), dec!(5));
        let earlier = request(TimeRequestType::MakeUp, d(2025, 9, 11), d(2025, 9, 11), dec!(4));
        let requests = vec![later, earlier];
        let matched = match_make_up_requests(&requests, &mut ledger);
        // The earlier request consumes 4h first, the later one the last 1h.
        assert_eq!(matched, dec!(5));
        assert_eq!(ledger[0].remaining, Decimal::ZERO);
    }

    #[test]
    fn tardiness_measured_in_org_time_zone() {
        let user_id = Uuid::new_v4();
        let configs = vec![weekday_config(user_id, d(2025, 1, 1))];
        // Tuesday 2025-09-02, 09:15 Chicago = 14:15 UTC.
        let mut session_starts = HashMap::new();
        session_starts.insert(d(2025, 9, 2), utc("2025-09-02T14:15:00Z"));
        let active_minutes = HashMap::new();
        let requests = vec![];
        let holidays = HashSet::new();
        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user_id, "2025-09".parse().unwrap(), Chicago, &inputs);
        assert_eq!(fact.tardy_minutes, 15);
        let day = fact.days.iter().find(|s| s.date == d(2025, 9, 2)).unwrap();
        assert_eq!(day.tardy_minutes, 15);
    }

    #[test]
    fn tardiness_is_zero_when_start_rolls_past_midnight() {
        let user_id = Uuid::new_v4();
        let configs = vec![weekday_config(user_id, d(2025, 1, 1))];
        // Filed under Tuesday 2025-09-02 but started 00:30 Chicago on the 3rd.
        let mut session_starts = HashMap::new();
        session_starts.insert(d(2025, 9, 2), utc("2025-09-03T05:30:00Z"));
        let active_minutes = HashMap::new();
        let requests = vec![];
        let holidays = HashSet::new();
        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user_id, "2025-09".parse().unwrap(), Chicago, &inputs);
        assert_eq!(fact.tardy_minutes, 0);
    }

    #[test]
    fn pto_and_holidays_excuse_tardiness() {
        let user_id = Uuid::new_v4();
        let configs = vec![weekday_config(user_id, d(2025, 1, 1))];
        let mut session_starts = HashMap::new();
        // Two very late starts: one on a PTO day, one on a holiday.
        session_starts.insert(d(2025, 9, 2), utc("2025-09-02T16:00:00Z"));
        session_starts.insert(d(2025, 9, 3), utc("2025-09-03T16:00:00Z"));
        let active_minutes = HashMap::new();
        let requests = vec![request(
            TimeRequestType::Pto,
            d(2025, 9, 2),
            d(2025, 9, 2),
            dec!(8),
        )];
        let mut holidays = HashSet::new();
        holidays.insert(d(2025, 9, 3));
        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user_id, "2025-09".parse().unwrap(), Chicago, &inputs);
        assert_eq!(fact.tardy_minutes, 0);
        for snapshot in &fact.days {
            if snapshot.pto_hours > Decimal::ZERO || snapshot.holiday {
                assert_eq!(snapshot.tardy_minutes, 0);
            }
        }
        // The holiday also drops out of assigned hours: 22 weekdays minus one.
        assert_eq!(fact.assigned_hours, dec!(168));
    }

    #[test]
    fn unworked_day_enters_ledger_and_reasons() {
        let user_id = Uuid::new_v4();
        let configs = vec![weekday_config(user_id, d(2025, 1, 1))];
        let session_starts = HashMap::new();
        let mut active_minutes = HashMap::new();
        // Work every weekday except 2025-09-08.
        for day in "2025-09".parse::<MonthKey>().unwrap().days() {
            if day.weekday().num_days_from_monday() < 5 && day != d(2025, 9, 8) {
                active_minutes.insert(day, 480);
            }
        }
        let requests = vec![];
        let holidays = HashSet::new();
        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user_id, "2025-09".parse().unwrap(), Chicago, &inputs);
        assert_eq!(fact.assigned_hours, dec!(176));
        assert_eq!(fact.worked_hours, dec!(168));
        assert_eq!(fact.uto_absence_hours, dec!(8));
        assert!(!fact.is_perfect);
        assert!(fact.reasons.contains(&"2025-09-08: Absence".to_string()));
    }

    #[test]
    fn user_without_config_accrues_nothing_but_keeps_worked_hours() {
        let user_id = Uuid::new_v4();
        let configs: Vec<CompensationConfig> = vec![];
        let session_starts = HashMap::new();
        let mut active_minutes = HashMap::new();
        active_minutes.insert(d(2025, 9, 2), 300);
        let requests = vec![];
        let holidays = HashSet::new();
        let inputs = MonthInputs {
            configs: &configs,
            session_starts: &session_starts,
            active_minutes: &active_minutes,
            requests: &requests,
            holidays: &holidays,
        };
        let fact = build_month_fact(user_id, "2025-09".parse().unwrap(), Chicago, &inputs);
        assert_eq!(fact.assigned_hours, Decimal::ZERO);
        assert_eq!(fact.worked_hours, dec!(5));
        assert_eq!(fact.tardy_minutes, 0);
        assert!(fact.days.iter().all(|s| s.expected_hours == Decimal::ZERO));
    }
}
