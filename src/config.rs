// src/config.rs

use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;

/// Fixed organization time zone applied when none is configured.
///
/// Every calendar boundary in the pipeline (month ranges, pay dates,
/// "is the pay date already past" checks) is evaluated in this zone, never
/// in the server's local zone.
pub const DEFAULT_ORG_TIMEZONE: &str = "America/Chicago";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub org_timezone: Tz,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            org_timezone: env::var("ORG_TIMEZONE")
                .unwrap_or_else(|_| DEFAULT_ORG_TIMEZONE.to_string())
                .parse()
                .expect("ORG_TIMEZONE must be a valid IANA time zone name"),
        }
    }
}
