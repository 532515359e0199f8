//! Monitoring periods: one (year, month) window per device.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    /// Calendar order, January first.
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    pub fn abbrev(&self) -> &'static str {
        match self {
            Month::Jan => "Jan",
            Month::Feb => "Feb",
            Month::Mar => "Mar",
            Month::Apr => "Apr",
            Month::May => "May",
            Month::Jun => "Jun",
            Month::Jul => "Jul",
            Month::Aug => "Aug",
            Month::Sep => "Sep",
            Month::Oct => "Oct",
            Month::Nov => "Nov",
            Month::Dec => "Dec",
        }
    }

}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

/// A single monitoring window. Years are kept as strings because that is how
/// the capture pipeline names its directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: String,
    pub month: Month,
}

impl Period {
    pub fn new(year: impl Into<String>, month: Month) -> Self {
        Self {
            year: year.into(),
            month,
        }
    }

    /// Value written to the `Month-Year` column, e.g. `Jan-2023`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.month, self.year)
    }

    /// Directory name used by the capture pipeline, e.g. `Jan_2023`.
    pub fn folder_name(&self) -> String {
        format!("{}_{}", self.month, self.year)
    }

    /// Cartesian product of `years` and the twelve months, years ascending
    /// and months in calendar order. Duplicate years are collapsed.
    pub fn grid(years: &[String]) -> Vec<Period> {
        let mut sorted: Vec<&String> = years.iter().collect();
        sorted.sort_by(|a, b| match (a.parse::<u32>(), b.parse::<u32>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        sorted.dedup();

        sorted
            .into_iter()
            .flat_map(|year| Month::ALL.iter().map(move |m| Period::new(year.clone(), *m)))
            .collect()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
