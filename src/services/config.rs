// src/services/config.rs

use chrono::NaiveDate;

use crate::models::CompensationConfig;

/// Picks the config in force on `date` from a slice sorted ascending by
/// `effective_on`: the last row with `effective_on <= date`, if any.
///
/// Pure so that range computations (attendance days, payroll proration) can
/// fetch a user's configs once and resolve per day without further store
/// round-trips.
pub fn active_config_on(
    configs: &[CompensationConfig],
    date: NaiveDate,
) -> Option<&CompensationConfig> {
    let mut active = None;
    for config in configs {
        if config.effective_on > date {
            break;
        }
        active = Some(config);
    }
    active
}
