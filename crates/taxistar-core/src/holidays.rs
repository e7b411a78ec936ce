use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub const US_NY_VERSION: &str = "us-ny-v1";

/// Decides whether a calendar date is a public holiday.
pub trait HolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool;

    fn version(&self) -> &str {
        "custom"
    }
}

impl<F> HolidayCalendar for F
where
    F: Fn(NaiveDate) -> bool,
{
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self(date)
    }
}

/// A precomputed set of holiday dates for a span of years.
#[derive(Debug, Clone)]
pub struct HolidayTable {
    version: &'static str,
    dates: BTreeMap<NaiveDate, &'static str>,
}

impl HolidayCalendar for HolidayTable {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains_key(&date)
    }

    fn version(&self) -> &str {
        self.version
    }
}

impl HolidayTable {
    /// US federal holidays plus the New York State additions. A fixed-date
    /// holiday falling on a weekend is also observed on the nearest weekday
    /// (Saturday to Friday, Sunday to Monday); both dates count as holidays.
    pub fn us_ny(years: RangeInclusive<i32>) -> Self {
        let mut table = Self {
            version: US_NY_VERSION,
            dates: BTreeMap::new(),
        };

        for year in years {
            table.add_observed(ymd(year, 1, 1), "New Year's Day");
            table.add(nth_weekday(year, 1, Weekday::Mon, 3), "Martin Luther King Jr. Day");
            table.add_observed(ymd(year, 2, 12), "Lincoln's Birthday");
            table.add(nth_weekday(year, 2, Weekday::Mon, 3), "Washington's Birthday");
            if year >= 2004 {
                table.add(ymd(year, 2, 15), "Susan B. Anthony Day");
            }
            table.add(last_weekday(year, 5, Weekday::Mon), "Memorial Day");
            if year >= 2021 {
                table.add_observed(ymd(year, 6, 19), "Juneteenth National Independence Day");
            }
            table.add_observed(ymd(year, 7, 4), "Independence Day");
            table.add(nth_weekday(year, 9, Weekday::Mon, 1), "Labor Day");
            table.add(nth_weekday(year, 10, Weekday::Mon, 2), "Columbus Day");
            table.add(
                nth_weekday(year, 11, Weekday::Mon, 1) + Duration::days(1),
                "Election Day",
            );
            table.add_observed(ymd(year, 11, 11), "Veterans Day");
            table.add(nth_weekday(year, 11, Weekday::Thu, 4), "Thanksgiving Day");
            table.add_observed(ymd(year, 12, 25), "Christmas Day");

            // A Saturday New Year's Day is observed on the last day of the prior year.
            let next_new_year = ymd(year + 1, 1, 1);
            if next_new_year.weekday() == Weekday::Sat {
                table.add(next_new_year - Duration::days(1), "New Year's Day (observed)");
            }
        }

        table
    }

    pub fn name(&self, date: NaiveDate) -> Option<&'static str> {
        self.dates.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    fn add(&mut self, date: NaiveDate, name: &'static str) {
        self.dates.entry(date).or_insert(name);
    }

    fn add_observed(&mut self, date: NaiveDate, name: &'static str) {
        self.add(date, name);
        let observed = match date.weekday() {
            Weekday::Sat => date - Duration::days(1),
            Weekday::Sun => date + Duration::days(1),
            _ => return,
        };
        // New Year's Day on a Saturday is handled with the previous year.
        if observed.year() == date.year() {
            self.add(observed, name);
        }
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n).unwrap_or(NaiveDate::MIN)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let fifth = nth_weekday(year, month, weekday, 5);
    if fifth.month() == month && fifth.year() == year {
        fifth
    } else {
        nth_weekday(year, month, weekday, 4)
    }
}
