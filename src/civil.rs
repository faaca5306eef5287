//! Civil (wall-clock) date and time values, with the one-bit fold
//! disambiguator for readings that occur twice on a backward clock change.
use crate::common::scalar::*;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub struct Date {
    pub(crate) year: Year,
    pub(crate) month: Month,
    pub(crate) day: u8,
}

impl Date {
    pub fn new(year: Year, month: Month, day: u8) -> Option<Self> {
        (day >= 1 && day <= year.days_in_month(month)).then_some(Date { year, month, day })
    }

    pub(crate) fn last_of_month(year: Year, month: Month) -> Self {
        Date {
            year,
            month,
            day: year.days_in_month(month),
        }
    }

    pub(crate) fn first_of_month(year: Year, month: Month) -> Self {
        Date {
            year,
            month,
            day: 1,
        }
    }

    pub fn year(&self) -> Year {
        self.year
    }

    pub fn month(&self) -> Month {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub(crate) fn unix_days(self) -> UnixDays {
        // Safety: unix days and dates have the same range, conversions are always valid
        UnixDays::new_unchecked(
            self.year.days_before()
                + self.year.days_before_month(self.month) as i32
                + self.day as i32
                + UnixDays::MIN.get()
                - 1,
        )
    }

    pub(crate) fn epoch_at(self, t: Time) -> EpochSecs {
        self.unix_days().epoch_at(t)
    }

    pub(crate) fn day_of_week(self) -> Weekday {
        self.unix_days().day_of_week()
    }
}

impl Display for Date {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}",
            self.year.get(),
            self.month.get(),
            self.day
        )
    }
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub struct Time {
    pub(crate) hour: u8,
    pub(crate) minute: u8,
    pub(crate) second: u8,
    pub(crate) subsec: SubSecNanos,
}

impl Time {
    pub const MIDNIGHT: Time = Time {
        hour: 0,
        minute: 0,
        second: 0,
        subsec: SubSecNanos::MIN,
    };

    pub fn new(hour: u8, minute: u8, second: u8, subsec: SubSecNanos) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(Time {
            hour,
            minute,
            second,
            subsec,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    pub fn subsec(&self) -> SubSecNanos {
        self.subsec
    }

    pub(crate) const fn total_seconds(&self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60 + self.second as u32
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}{}",
            self.hour, self.minute, self.second, self.subsec
        )
    }
}

/// A civil date and time. The `fold` bit selects between the first (0) and
/// second (1) occurrence of readings that a backward clock change repeats;
/// for readings a forward change skips, it selects the pre- and post-change
/// rules instead. It is ignored for unambiguous readings.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct DateTime {
    pub(crate) date: Date,
    pub(crate) time: Time,
    pub(crate) fold: bool,
}

impl DateTime {
    pub fn new(date: Date, time: Time) -> Self {
        DateTime {
            date,
            time,
            fold: false,
        }
    }

    pub fn with_fold(self, fold: bool) -> Self {
        DateTime { fold, ..self }
    }

    pub fn date(&self) -> Date {
        self.date
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn fold(&self) -> bool {
        self.fold
    }

    /// Compare the civil reading only, disregarding the fold bit.
    pub fn same_civil(&self, other: &DateTime) -> bool {
        self.date == other.date && self.time == other.time
    }

    /// Seconds since 1970-01-01 00:00, treating the civil reading as if it
    /// were UTC. Sub-second precision is dropped (floor).
    pub(crate) fn local_epoch(&self) -> EpochSecs {
        self.date.epoch_at(self.time)
    }

    pub(crate) fn from_local_epoch(epoch: EpochSecs, subsec: SubSecNanos, fold: bool) -> Self {
        DateTime {
            date: epoch.date(),
            time: epoch.time(subsec),
            fold,
        }
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: u16, m: u8, d: u8) -> Date {
        Date::new(Year::new(y).unwrap(), Month::new(m).unwrap(), d).unwrap()
    }

    #[test]
    fn test_date_validation() {
        assert!(Date::new(Year::new(2021).unwrap(), Month::February, 29).is_none());
        assert!(Date::new(Year::new(2020).unwrap(), Month::February, 29).is_some());
        assert!(Date::new(Year::new(2020).unwrap(), Month::April, 31).is_none());
        assert!(Date::new(Year::new(2020).unwrap(), Month::April, 0).is_none());
    }

    #[test]
    fn test_date_unix_days() {
        assert_eq!(date(1970, 1, 1).unix_days().get(), 0);
        assert_eq!(date(1970, 1, 2).unix_days().get(), 1);
        assert_eq!(date(1969, 12, 31).unix_days().get(), -1);
        assert_eq!(date(2019, 1, 1).unix_days().get(), 17_897);
        assert_eq!(date(1, 1, 1).unix_days(), UnixDays::MIN);
        assert_eq!(date(9999, 12, 31).unix_days(), UnixDays::MAX);
    }

    #[test]
    fn test_first_last_of_month() {
        let y = Year::new(2020).unwrap();
        assert_eq!(Date::first_of_month(y, Month::February).day, 1);
        assert_eq!(Date::last_of_month(y, Month::February).day, 29);
        assert_eq!(
            Date::last_of_month(Year::new(2019).unwrap(), Month::February).day,
            28
        );
    }

    #[test]
    fn test_local_epoch() {
        let dt = DateTime::new(
            date(2019, 11, 3),
            Time::new(2, 0, 0, SubSecNanos::MIN).unwrap(),
        );
        assert_eq!(dt.local_epoch().get(), 1_572_746_400);

        let back = DateTime::from_local_epoch(dt.local_epoch(), SubSecNanos::MIN, false);
        assert_eq!(back, dt);
    }

    #[test]
    fn test_fold_in_equality() {
        let dt = DateTime::new(date(2019, 11, 3), Time::MIDNIGHT);
        assert_ne!(dt, dt.with_fold(true));
        assert!(dt.same_civil(&dt.with_fold(true)));
    }

    #[test]
    fn test_display() {
        let dt = DateTime::new(
            date(2019, 3, 10),
            Time::new(4, 5, 6, SubSecNanos::new(999_000_000).unwrap()).unwrap(),
        );
        assert_eq!(dt.to_string(), "2019-03-10T04:05:06.999");
    }
}
