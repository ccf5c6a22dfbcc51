// src/errors.rs

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::PayrollPeriodStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Key and date validation errors
    #[error("Invalid month key '{0}': expected YYYY-MM")]
    InvalidMonthKey(String),

    #[error("Invalid period key '{0}': expected YYYY-MM-A or YYYY-MM-B")]
    InvalidPeriodKey(String),

    #[error("Pay date {0} must fall on the 15th or the last day of a month")]
    InvalidPayDate(NaiveDate),

    // State violations
    #[error("Payroll period {0} has already been paid")]
    PeriodAlreadyPaid(String),

    #[error("Payroll period {0} not found")]
    PeriodNotFound(String),

    #[error("Payroll period {period} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        period: String,
        from: PayrollPeriodStatus,
        to: PayrollPeriodStatus,
    },

    // Export errors
    #[error("CSV export error: {0}")]
    CsvExport(String),
}

// Convenience alias
pub type EngineResult<T> = Result<T, EngineError>;
