// src/calendar.rs
//
// Calendar arithmetic for the attendance/payroll pipeline. All keys identify
// calendar windows in the organization's fixed time zone; the types here are
// validated on construction so the rest of the pipeline can treat them as
// infallible.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::errors::{EngineError, EngineResult};

/// A calendar month in the organization time zone, parsed from `"YYYY-MM"`.
/// The fields stay private so a key with a month outside 1-12 cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> EngineResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidMonthKey(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("month key is validated")
    }

    pub fn last_day(&self) -> NaiveDate {
        last_day_of_month(self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Iterates every calendar day of the month, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last_day();
        self.first_day().iter_days().take_while(move |d| *d <= last)
    }

    /// Calendar quarter this month belongs to (1–4).
    pub fn quarter(&self) -> u32 {
        (self.month - 1) / 3 + 1
    }

    /// True for the closing month of a quarter (3, 6, 9, 12), the only
    /// months on which the quarterly bonus check runs.
    pub fn is_quarter_end(&self) -> bool {
        self.month % 3 == 0
    }

    /// The three months of this month's quarter, ascending.
    pub fn quarter_months(&self) -> [MonthKey; 3] {
        let start = (self.quarter() - 1) * 3 + 1;
        [
            Self { year: self.year, month: start },
            Self { year: self.year, month: start + 1 },
            Self { year: self.year, month: start + 2 },
        ]
    }

    /// Candidate period key for this month's quarter, e.g. `"2025-Q2"`.
    pub fn quarter_key(&self) -> String {
        format!("{:04}-Q{}", self.year, self.quarter())
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidMonthKey(s.to_string());

        // Strictly "YYYY-MM": four digit year, dash, two digit month.
        let (year_part, month_part) = s.split_once('-').ok_or_else(invalid)?;
        if year_part.len() != 4
            || month_part.len() != 2
            || !year_part.bytes().all(|b| b.is_ascii_digit())
            || !month_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let year: i32 = year_part.parse().map_err(|_| invalid())?;
        let month: u32 = month_part.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

/// Which half of the month a semi-monthly payroll period covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodHalf {
    /// 1st through the 15th, paid on the last day of the same month.
    A,
    /// 16th through month-end, paid on the 15th of the following month.
    B,
}

impl fmt::Display for PeriodHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Semi-monthly payroll period identifier, `"YYYY-MM-A"` or `"YYYY-MM-B"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodKey {
    pub month: MonthKey,
    pub half: PeriodHalf,
}

impl PeriodKey {
    pub fn start(&self) -> NaiveDate {
        match self.half {
            PeriodHalf::A => self.month.first_day(),
            PeriodHalf::B => NaiveDate::from_ymd_opt(self.month.year, self.month.month, 16)
                .expect("month key is validated"),
        }
    }

    pub fn end(&self) -> NaiveDate {
        match self.half {
            PeriodHalf::A => NaiveDate::from_ymd_opt(self.month.year, self.month.month, 15)
                .expect("month key is validated"),
            PeriodHalf::B => self.month.last_day(),
        }
    }

    pub fn pay_date(&self) -> NaiveDate {
        match self.half {
            PeriodHalf::A => self.month.last_day(),
            PeriodHalf::B => {
                let next = self.month.next();
                NaiveDate::from_ymd_opt(next.year, next.month, 15).expect("month key is validated")
            }
        }
    }

    /// Number of calendar days the period covers, inclusive.
    pub fn total_days(&self) -> i64 {
        (self.end() - self.start()).num_days() + 1
    }

    /// Iterates every calendar day of the period, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.end();
        self.start().iter_days().take_while(move |d| *d <= last)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.month, self.half)
    }
}

impl FromStr for PeriodKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidPeriodKey(s.to_string());

        let (month_part, half_part) = s.rsplit_once('-').ok_or_else(invalid)?;
        let month: MonthKey = month_part.parse().map_err(|_| invalid())?;
        let half = match half_part {
            "A" => PeriodHalf::A,
            "B" => PeriodHalf::B,
            _ => return Err(invalid()),
        };
        Ok(Self { month, half })
    }
}

/// Maps a pay date to the payroll period it closes out.
///
/// A pay date on the 15th closes the prior month's 16th–end window; a pay
/// date on the last day of a month closes that month's 1st–15th window.
/// Any other date is a configuration error.
pub fn resolve_period_for_pay_date(pay_date: NaiveDate) -> EngineResult<PeriodKey> {
    if pay_date.day() == 15 {
        Ok(PeriodKey {
            month: MonthKey::from_date(pay_date).prev(),
            half: PeriodHalf::B,
        })
    } else if is_last_day_of_month(pay_date) {
        Ok(PeriodKey {
            month: MonthKey::from_date(pay_date),
            half: PeriodHalf::A,
        })
    } else {
        Err(EngineError::InvalidPayDate(pay_date))
    }
}

pub fn is_last_day_of_month(date: NaiveDate) -> bool {
    date == last_day_of_month(date.year(), date.month())
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid month")
        .pred_opt()
        .expect("date has a predecessor")
}
