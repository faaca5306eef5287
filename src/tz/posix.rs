//! Functionality for working with POSIX TZ strings.
//! Note this includes extensions to the POSIX standard as part of the TZif format.
//!
//! Resources:
//! - [POSIX TZ strings](https://pubs.opengroup.org/onlinepubs/9699919799/basedefs/V1_chap08.html)
//! - [GNU libc manual](https://www.gnu.org/software/libc/manual/html_node/TZ-Variable.html)
use crate::{
    civil::Date,
    common::{parse::Scan, scalar::*},
    tz::zone::TypeRecord,
};
use std::num::{NonZeroU8, NonZeroU16};
use std::sync::Arc;

const DEFAULT_DST: OffsetDelta = OffsetDelta::new_unchecked(3_600);

// RFC 9636: the transition time may range from -167 to 167 hours! (not just 24)
pub(crate) type TransitionTime = i32;
const DEFAULT_RULE_TIME: i32 = 2 * 3_600; // 2 AM

/// A decoded TZ string: either a fixed standard offset, or a standard/DST
/// pair with the yearly recurrence rules for switching between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tz {
    pub(crate) std: TypeRecord,
    pub(crate) dst: Option<Dst>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dst {
    pub(crate) record: TypeRecord,
    pub(crate) start: (Rule, TransitionTime),
    pub(crate) end: (Rule, TransitionTime),
}

/// A rule for the date when DST starts or ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rule {
    LastWeekday(Weekday, Month),
    NthWeekday(NonZeroU8, Weekday, Month), // N is 1..=4
    DayOfYear(NonZeroU16),                 // 1..=366, accounts for leap days
    JulianDayOfYear(NonZeroU16),           // 1..=365, ignores leap days
}

impl Dst {
    /// The DST shift relative to standard time. May be negative.
    fn diff(&self) -> i64 {
        self.record.dst_offset().get() as i64
    }

    /// The two transition instants for the given year, denominated in the
    /// local time of their own side: the start in pre-DST (standard) time,
    /// the end in DST time.
    fn transitions(&self, year: Year) -> (i64, i64) {
        let (start_rule, start_time) = self.start;
        let (end_rule, end_time) = self.end;
        (
            day_epoch(start_rule.for_year(year)) + start_time as i64,
            day_epoch(end_rule.for_year(year)) + end_time as i64,
        )
    }
}

/// Naive epoch seconds at midnight of the given date.
fn day_epoch(d: Date) -> i64 {
    d.unix_days().get() as i64 * S_PER_DAY as i64
}

impl Tz {
    /// The record for a local timestamp (naive epoch seconds), resolving
    /// repeated or skipped readings through the fold bit.
    pub(crate) fn record_for_local(&self, t: EpochSecs, year: Year, fold: bool) -> &TypeRecord {
        let Some(dst) = &self.dst else {
            return &self.std;
        };
        let (mut start, mut end) = dst.transitions(year);
        let d = dst.diff();

        // With fold=0, the period with the smaller offset (in local terms)
        // runs from the end of the gap to the end of the fold; with fold=1
        // it runs from the start of the gap to the start of the fold.
        // Which end to nudge therefore depends on fold XOR the sign of the
        // DST shift.
        if fold == (d >= 0) {
            end -= d;
        } else {
            start += d;
        }

        if in_dst_window(t.get(), start, end) {
            &dst.record
        } else {
            &self.std
        }
    }

    /// The record and fold flag for a UTC timestamp (naive epoch seconds).
    pub(crate) fn record_from_utc(&self, t: EpochSecs, year: Year) -> (&TypeRecord, bool) {
        let Some(dst) = &self.dst else {
            return (&self.std, false);
        };
        let (mut start, mut end) = dst.transitions(year);
        // Re-express both rule instants in UTC.
        start -= self.std.utc_offset().get() as i64;
        end -= dst.record.utc_offset().get() as i64;
        let d = dst.diff();
        let t = t.get();

        // The ambiguous period covers the first |d| seconds after the
        // backward jump: after the end of DST when the shift is positive,
        // after the start of DST when it is negative.
        let fold = if d > 0 {
            end <= t && t < end + d
        } else {
            start <= t && t < start - d
        };
        let record = if in_dst_window(t, start, end) {
            &dst.record
        } else {
            &self.std
        };
        (record, fold)
    }
}

/// Is `t` inside the DST period bounded by `start` and `end`? The period
/// may straddle the year boundary (southern hemisphere), in which case
/// `end` precedes `start`.
fn in_dst_window(t: i64, start: i64, end: i64) -> bool {
    if start < end {
        start <= t && t < end
    } else {
        !(end <= t && t < start)
    }
}

impl Rule {
    fn for_year(self, y: Year) -> Date {
        match self {
            Rule::DayOfYear(d) => y
                .unix_days_at_jan1()
                // Safe: no overflow since it stays within the year
                .add_unchecked(
                    (d.get()
                        // The 366th day will blow up for non-leap years.
                        // It's unlikely that a TZ string would specify this,
                        // so we'll just clamp it to the last day of the year.
                        .min(365 + y.is_leap() as u16)
                        - 1) as _,
                )
                .date(),

            Rule::JulianDayOfYear(d) => y
                .unix_days_at_jan1()
                // Safe: No overflow since it stays within the year
                .add_unchecked((d.get() - 1) as i32 + (y.is_leap() && d.get() > 59) as i32)
                .date(),

            Self::LastWeekday(w, m) => {
                // Try the last day of the month, and adjust from there
                let day_last = Date::last_of_month(y, m);
                Date {
                    day: day_last.day
                        - (day_last.day_of_week().sunday_is_0() + 7 - w.sunday_is_0()) % 7,
                    ..day_last
                }
            }
            Self::NthWeekday(n, w, m) => {
                // Try the first day of the month, and adjust from there
                debug_assert!(n.get() <= 4);
                let day1 = Date::first_of_month(y, m);
                Date {
                    day: ((w.sunday_is_0() + 7 - day1.day_of_week().sunday_is_0()) % 7)
                        + 7 * (n.get() - 1)
                        + 1,
                    ..day1
                }
            }
        }
    }
}

pub(crate) fn parse(s: &[u8]) -> Option<Tz> {
    let mut scan = Scan::new(s);
    let std_abbr = parse_designation(&mut scan)?;
    let std = parse_offset(&mut scan)?;
    let std_record = TypeRecord::new(std, OffsetDelta::ZERO, std_abbr);

    // If there's nothing else, it's a fixed offset without DST
    if scan.is_done() {
        return Some(Tz {
            std: std_record,
            dst: None,
        });
    };
    let dst_abbr = parse_designation(&mut scan)?;

    let dst_offset = match scan.peek()? {
        // If the offset is omitted, the default is 1 hour ahead
        b',' => {
            scan.take_unchecked(1);
            // It's theoretically possible for this default shift to
            // bump the offset to over 24 hours. We reject these cases here.
            std.shift(DEFAULT_DST)?
        }
        // Otherwise, parse the offset
        _ => {
            let offset = parse_offset(&mut scan)?;
            scan.expect(b',')?;
            offset
        }
    };

    // Expect two rules separated by a comma
    let start = parse_rule(&mut scan)?;
    scan.expect(b',')?;
    let end = parse_rule(&mut scan)?;

    // No content should remain after parsing
    scan.is_done().then_some(Tz {
        std: std_record,
        dst: Some(Dst {
            record: TypeRecord::new(dst_offset, dst_offset.sub(std), dst_abbr),
            start,
            end,
        }),
    })
}

fn is_designation_end(c: u8) -> bool {
    matches!(c, b'0'..=b'9' | b':' | b'.' | b',' | b'+' | b'-' | b'<' | b'>')
}

/// Parse a TZ designation: either 3+ "name" characters, or a
/// `<`-quoted run of alphanumerics and signs (e.g. `<+11>`, `<-0330>`).
fn parse_designation(s: &mut Scan) -> Option<Arc<str>> {
    let name = match s.peek()? {
        b'<' => {
            let quoted = s.take_until_inclusive(|c| c == b'>')?;
            let inner = &quoted[1..quoted.len() - 1];
            (!inner.is_empty()
                && inner
                    .iter()
                    .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-'))
            .then_some(inner)?
        }
        _ => {
            // The designation may be the last thing in the string
            // (which is valid grammar, though doomed to fail later on).
            let name = match s.take_until(is_designation_end) {
                Some(x) => x,
                None => s.drain(),
            };
            (name.len() >= 3 && name.is_ascii()).then_some(name)?
        }
    };
    // Safe: confirmed ASCII above
    Some(std::str::from_utf8(name).ok()?.into())
}

/// Parse an offset like `[+|-]h[h][:mm[:ss]]`
fn parse_offset(s: &mut Scan) -> Option<Offset> {
    parse_hms(s, Offset::MAX.get())
        // POSIX offsets are inverted from how we store them
        .map(|s| Offset::new_unchecked(-s))
}

/// Parse a `h[hh][:mm[:ss]]` string into a total number of seconds
fn parse_hms(s: &mut Scan, max: i32) -> Option<i32> {
    let sign = s
        .transform(|c| match c {
            b'+' => Some(1),
            b'-' => Some(-1),
            _ => None,
        })
        .unwrap_or(1);
    let mut total = 0;

    // parse the hours
    let hrs = if max > 99 * 3_600 {
        s.up_to_3_digits()? as i32
    } else {
        s.up_to_2_digits()? as i32
    };
    total += hrs * 3_600;

    // parse the optional minutes and seconds
    if let Some(true) = s.advance_on(b':') {
        total += s.digits00_59()? as i32 * 60;
        if let Some(true) = s.advance_on(b':') {
            total += s.digits00_59()? as i32;
        }
    }
    (total <= max).then_some(total * sign)
}

/// Parse `m[m].w.d` string as part of a DST start/end rule
fn parse_weekday_rule(scan: &mut Scan) -> Option<Rule> {
    let m = scan.up_to_2_digits().and_then(Month::new)?;
    scan.expect(b'.')?;
    let w: NonZeroU8 = scan.digit_ranged(b'1'..=b'5')?.try_into().unwrap(); // safe >0 unwrap
    scan.expect(b'.')?;
    let d = scan.digit_ranged(b'0'..=b'6')?;
    // In Posix TZ strings, Sunday is 0. In ISO, it's 7
    let day_of_week = Weekday::from_iso_unchecked(if d == 0 { 7 } else { d });

    // A "fifth" occurrence of a weekday doesn't always occur.
    // Interpret it as the last weekday, according to the standard.
    Some(if w.get() == 5 {
        Rule::LastWeekday(day_of_week, m)
    } else {
        Rule::NthWeekday(w, day_of_week, m)
    })
}

fn parse_rule(scan: &mut Scan) -> Option<(Rule, TransitionTime)> {
    let rule = match scan.peek()? {
        b'M' => {
            scan.next();
            parse_weekday_rule(scan)
        }
        b'J' => {
            scan.next();
            NonZeroU16::new(scan.up_to_3_digits()?)
                .filter(|&d| d.get() <= 365)
                .map(Rule::JulianDayOfYear)
        }
        _ => NonZeroU16::new(scan.up_to_3_digits()? + 1)
            .filter(|&d| d.get() <= 366)
            .map(Rule::DayOfYear),
    }?;

    Some((
        rule,
        scan.expect(b'/')
            .and_then(|_| parse_hms(scan, 167 * 3_600))
            .unwrap_or(DEFAULT_RULE_TIME),
    ))
}
