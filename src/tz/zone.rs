//! The in-memory form of a time zone and its lookup operations.
use crate::{
    civil::DateTime,
    common::scalar::*,
    delta::TimeDelta,
    tz::{Error, posix, tzif},
};
use std::fmt;
use std::sync::Arc;

/// One local-time regime: the total UTC offset, the daylight-saving part
/// of it (zero outside DST, possibly negative), and the designation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    pub(crate) utcoff: Offset,
    pub(crate) dstoff: OffsetDelta,
    pub(crate) abbr: Arc<str>,
}

impl TypeRecord {
    pub(crate) fn new(utcoff: Offset, dstoff: OffsetDelta, abbr: Arc<str>) -> Self {
        TypeRecord {
            utcoff,
            dstoff,
            abbr,
        }
    }

    /// Total offset from UTC, in effect while this record governs.
    pub fn utc_offset(&self) -> Offset {
        self.utcoff
    }

    /// The daylight-saving component of the offset. The standard offset
    /// is `utc_offset - dst_offset`.
    pub fn dst_offset(&self) -> OffsetDelta {
        self.dstoff
    }

    /// The designation, e.g. "CET" or "+0330".
    pub fn abbreviation(&self) -> &str {
        &self.abbr
    }
}

/// What governs instants past the last explicit transition: a fixed record,
/// or a yearly recurrence decoded from the file's TZ-string trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TzAfter {
    Static(TypeRecord),
    Rule(posix::Tz),
}

/// A loaded time zone: an ordered transition table bracketed by a `before`
/// record and an `after` rule. Immutable once constructed; queries are
/// read-only and safe to run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub(crate) key: Option<String>,
    // The i-th transition occurs at trans_utc[i], after which types[i]
    // governs. The same instants denominated in local time, once per fold
    // value, permit direct lookup by civil time: a forward jump makes two
    // successive fold=1 entries equal, a backward jump does the same to
    // fold=0 entries.
    pub(crate) trans_utc: Vec<EpochSecs>,
    pub(crate) trans_local: [Vec<EpochSecs>; 2],
    pub(crate) types: Vec<TypeRecord>,
    pub(crate) before: TypeRecord,
    pub(crate) after: TzAfter,
}

impl Zone {
    /// Decode a zone from TZif bytes (RFC 8536, any version).
    pub fn from_bytes(bytes: &[u8], key: Option<&str>) -> Result<Zone, Error> {
        tzif::parse(bytes, key)
    }

    /// The IANA key this zone was loaded under, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The record governing the given civil time in this zone. For civil
    /// readings that occur twice (or not at all), the fold bit picks the
    /// earlier or later regime.
    pub fn offset_at(&self, dt: &DateTime) -> &TypeRecord {
        let ts = dt.local_epoch();
        let lt = &self.trans_local[dt.fold as usize];
        match (lt.first(), lt.last()) {
            (None, _) => self.after_record_local(ts, dt),
            (Some(&first), _) if ts < first => &self.before,
            (_, Some(&last)) if ts > last => self.after_record_local(ts, dt),
            // bisect_right finds the transition *after* this timestamp,
            // so back up one to get the governing record
            _ => &self.types[bisect_right(lt, ts) - 1],
        }
    }

    fn after_record_local(&self, ts: EpochSecs, dt: &DateTime) -> &TypeRecord {
        match &self.after {
            TzAfter::Static(rec) => rec,
            TzAfter::Rule(tz) => tz.record_for_local(ts, dt.date.year, dt.fold),
        }
    }

    /// Reinterpret a civil reading of UTC as this zone's local time,
    /// setting the fold bit on the second pass through repeated readings.
    pub fn to_local(&self, utc: &DateTime) -> Result<DateTime, Error> {
        let ts = utc.local_epoch();
        // Everything before the *second* transition counts as the pre-table
        // regime here. The first transition is normally the cutover from
        // local mean time, whose pre-image zdump also reports as LMT; local
        // lookups, by contrast, compare against index 0. Both directions
        // reproduce the longstanding behavior of the zoneinfo lineage, and
        // round-trips near the epoch rely on the difference.
        let (rec, fold) = if self.trans_utc.len() >= 2 && ts < self.trans_utc[1] {
            (&self.before, false)
        } else if self.trans_utc.last().is_none_or(|&last| ts > last) {
            match &self.after {
                TzAfter::Static(rec) => (rec, false),
                TzAfter::Rule(tz) => tz.record_from_utc(ts, utc.date.year),
            }
        } else if self.trans_utc.len() < 2 {
            // A lone transition at or after `ts`
            (&self.before, false)
        } else {
            let idx = bisect_right(&self.trans_utc, ts);
            let prev = &self.types[idx - 2];
            let curr = &self.types[idx - 1];
            // In the wake of a backward jump, the repeated readings are
            // reached a second time: that's the fold.
            let shift = (prev.utcoff.get() - curr.utcoff.get()) as i64;
            let fold = shift > ts.get() - self.trans_utc[idx - 1].get();
            (curr, fold)
        };
        let local = ts.offset(rec.utcoff).ok_or(Error::OutOfRange)?;
        Ok(DateTime::from_local_epoch(local, utc.time.subsec, fold))
    }

    /// Convert a civil reading in this zone to its civil reading in UTC,
    /// resolving ambiguity through the fold bit.
    pub fn to_utc(&self, local: &DateTime) -> Result<DateTime, Error> {
        let rec = self.offset_at(local);
        let ts = local
            .local_epoch()
            .offset(-rec.utcoff)
            .ok_or(Error::OutOfRange)?;
        Ok(DateTime::from_local_epoch(ts, local.time.subsec, false))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key.as_deref().unwrap_or("<unkeyed zone>"))
    }
}

/// The tzinfo-style contract a datetime library calls.
pub trait TimeZone {
    /// Total offset from UTC at the given civil time.
    fn utc_offset(&self, dt: &DateTime) -> Arc<TimeDelta>;
    /// Daylight-saving component of the offset at the given civil time.
    fn dst(&self, dt: &DateTime) -> Arc<TimeDelta>;
    /// Designation in effect at the given civil time.
    fn tzname(&self, dt: &DateTime) -> Arc<str>;
    /// Map a civil reading of UTC into this zone.
    fn from_utc(&self, dt: &DateTime) -> Result<DateTime, Error>;
}

impl TimeZone for Zone {
    fn utc_offset(&self, dt: &DateTime) -> Arc<TimeDelta> {
        TimeDelta::of(self.offset_at(dt).utcoff.get())
    }

    fn dst(&self, dt: &DateTime) -> Arc<TimeDelta> {
        TimeDelta::of(self.offset_at(dt).dstoff.get())
    }

    fn tzname(&self, dt: &DateTime) -> Arc<str> {
        self.offset_at(dt).abbr.clone()
    }

    fn from_utc(&self, dt: &DateTime) -> Result<DateTime, Error> {
        self.to_local(dt)
    }
}

/// Index of the first element greater than `x` (i.e. the count of
/// elements `<= x`). The slice must be sorted.
pub(crate) fn bisect_right(arr: &[EpochSecs], x: EpochSecs) -> usize {
    let mut left = 0;
    let mut right = arr.len();
    while left < right {
        let mid = left + (right - left) / 2;
        if x >= arr[mid] {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::civil::{Date, Time};
    use crate::tz::tzif::local_index;

    fn epoch(secs: i64) -> EpochSecs {
        EpochSecs::new(secs).unwrap()
    }

    fn record(utcoff: i32, dstoff: i32, abbr: &str) -> TypeRecord {
        TypeRecord::new(
            Offset::new(utcoff).unwrap(),
            OffsetDelta::new(dstoff).unwrap(),
            abbr.into(),
        )
    }

    fn dt(y: u16, m: u8, d: u8, hour: u8, minute: u8, second: u8) -> DateTime {
        DateTime::new(
            Date::new(Year::new(y).unwrap(), Month::new(m).unwrap(), d).unwrap(),
            Time::new(hour, minute, second, SubSecNanos::MIN).unwrap(),
        )
    }

    /// An eastern-US-shaped zone: LMT until 1883, then explicit EST/EDT
    /// transitions for 2019-2020, extended by the usual recurrence.
    fn us_eastern() -> Zone {
        let lmt = record(-17762, 0, "LMT");
        let est = record(-18000, 0, "EST");
        let edt = record(-14400, 3600, "EDT");
        let trans_utc = vec![
            // 1883-11-18T17:03:04Z: LMT -> EST, at the stroke of noon
            // on the standard-time clock (12:07:02 on the mean-time one)
            epoch(-2_717_650_616),
            epoch(1_520_751_600), // 2018-03-11T07:00Z: EST -> EDT
            epoch(1_541_311_200),  // 2018-11-04T06:00Z: EDT -> EST
            epoch(1_552_201_200),  // 2019-03-10T07:00Z: EST -> EDT
            epoch(1_572_760_800),  // 2019-11-03T06:00Z: EDT -> EST
            epoch(1_583_650_800),  // 2020-03-08T07:00Z: EST -> EDT
            epoch(1_604_210_400),  // 2020-11-01T06:00Z: EDT -> EST
        ];
        let types = vec![
            est.clone(),
            edt.clone(),
            est.clone(),
            edt.clone(),
            est.clone(),
            edt,
            est,
        ];
        Zone {
            key: Some("America/Testville".to_string()),
            trans_local: local_index(&trans_utc, &types, lmt.utcoff),
            trans_utc,
            types,
            before: lmt,
            after: TzAfter::Rule(posix::parse(b"EST5EDT,M3.2.0,M11.1.0").unwrap()),
        }
    }

    #[test]
    fn test_bisect_right() {
        let arr: Vec<EpochSecs> = [4, 9, 12, 16, 24].iter().map(|&x| epoch(x)).collect();
        assert_eq!(bisect_right(&arr, epoch(3)), 0);
        assert_eq!(bisect_right(&arr, epoch(4)), 1);
        assert_eq!(bisect_right(&arr, epoch(10)), 2);
        assert_eq!(bisect_right(&arr, epoch(12)), 3);
        assert_eq!(bisect_right(&arr, epoch(24)), 5);
        assert_eq!(bisect_right(&arr, epoch(30)), 5);
        assert_eq!(bisect_right(&[], epoch(1)), 0);
        // duplicates: lands after the run
        let dup: Vec<EpochSecs> = [4, 9, 9, 16].iter().map(|&x| epoch(x)).collect();
        assert_eq!(bisect_right(&dup, epoch(9)), 3);
    }

    #[test]
    fn test_offset_at_before_first_transition() {
        let zone = us_eastern();
        // 1883-11-18T12:07:01.999 as the mean-time clock showed it: a
        // fraction of a second before the cutover, so still LMT, not EST
        let early = DateTime::new(
            Date::new(Year::new(1883).unwrap(), Month::November, 18).unwrap(),
            Time::new(12, 7, 1, SubSecNanos::new(999_000_000).unwrap()).unwrap(),
        );
        let rec = zone.offset_at(&early);
        assert_eq!(rec.abbreviation(), "LMT");
        assert_eq!(rec.utc_offset().get(), -17762);
        // At the cutover reading itself, standard time has taken hold
        let at = DateTime::new(
            Date::new(Year::new(1883).unwrap(), Month::November, 18).unwrap(),
            Time::new(12, 7, 2, SubSecNanos::MIN).unwrap(),
        );
        assert_eq!(zone.offset_at(&at).abbreviation(), "EST");

        let really_early = dt(1005, 1, 1, 0, 0, 0);
        assert_eq!(zone.offset_at(&really_early).abbreviation(), "LMT");
    }

    #[test]
    fn test_offset_at_within_table() {
        let zone = us_eastern();
        // Plain summer/winter readings, either fold
        for fold in [false, true] {
            let summer = dt(2019, 7, 1, 12, 0, 0).with_fold(fold);
            assert_eq!(zone.offset_at(&summer).abbreviation(), "EDT");
            let winter = dt(2019, 12, 25, 12, 0, 0).with_fold(fold);
            assert_eq!(zone.offset_at(&winter).abbreviation(), "EST");
        }
    }

    #[test]
    fn test_offset_at_gap() {
        let zone = us_eastern();
        // 2019-03-10 02:30 never happened: clocks jumped from 02:00 to 03:00
        let skipped = dt(2019, 3, 10, 2, 30, 0);
        let pre = zone.offset_at(&skipped);
        let post = zone.offset_at(&skipped.with_fold(true));
        assert_eq!(
            (pre.abbreviation(), pre.utc_offset().get()),
            ("EST", -18000)
        );
        assert_eq!(
            (post.abbreviation(), post.utc_offset().get()),
            ("EDT", -14400)
        );
        // Just outside the gap, both folds agree
        assert_eq!(zone.offset_at(&dt(2019, 3, 10, 1, 59, 59)).abbr,
                   zone.offset_at(&dt(2019, 3, 10, 1, 59, 59).with_fold(true)).abbr);
        assert_eq!(zone.offset_at(&dt(2019, 3, 10, 3, 0, 0)).abbr,
                   zone.offset_at(&dt(2019, 3, 10, 3, 0, 0).with_fold(true)).abbr);
    }

    #[test]
    fn test_offset_at_fold() {
        let zone = us_eastern();
        // 2020-11-01 01:30 happened twice (within the explicit table)
        let repeated = dt(2020, 11, 1, 1, 30, 0);
        let first = zone.offset_at(&repeated);
        let second = zone.offset_at(&repeated.with_fold(true));
        assert_eq!(first.abbreviation(), "EDT");
        assert_eq!(second.abbreviation(), "EST");
        // The two answers differ by exactly the size of the fold
        assert_eq!(
            first.utc_offset().get() - second.utc_offset().get(),
            3600
        );
    }

    #[test]
    fn test_offset_at_after_table() {
        let zone = us_eastern();
        // Past the last explicit transition, the recurrence takes over
        let future_summer = dt(2031, 7, 1, 12, 0, 0);
        assert_eq!(zone.offset_at(&future_summer).abbreviation(), "EDT");
        let future_winter = dt(2031, 1, 1, 12, 0, 0);
        assert_eq!(zone.offset_at(&future_winter).abbreviation(), "EST");
        // Fold resolution in a future fall-back, handled by the rule:
        // first Sunday of November 2031 is Nov 2
        let ambiguous = dt(2031, 11, 2, 1, 30, 0);
        assert_eq!(zone.offset_at(&ambiguous).abbreviation(), "EDT");
        assert_eq!(
            zone.offset_at(&ambiguous.with_fold(true)).abbreviation(),
            "EST"
        );
    }

    #[test]
    fn test_to_local_before_second_transition() {
        let zone = us_eastern();
        // Everything before the second transition maps through the
        // pre-table record, LMT included 1970
        let t = zone.to_local(&dt(1970, 6, 1, 12, 0, 0)).unwrap();
        assert_eq!(t, dt(1970, 6, 1, 7, 3, 58)); // -17762 = -4:56:02
        assert!(!t.fold());
    }

    #[test]
    fn test_to_local_fold_detection() {
        let zone = us_eastern();
        let cases = [
            // (utc civil, expected local civil, fold)
            ((2019, 11, 3, 5, 30), (2019, 11, 3, 1, 30), false), // EDT, first pass
            ((2019, 11, 3, 6, 30), (2019, 11, 3, 1, 30), true),  // EST, second pass
            ((2019, 11, 3, 7, 30), (2019, 11, 3, 2, 30), false), // EST, past the fold
            ((2019, 3, 10, 6, 59), (2019, 3, 10, 1, 59), false), // just before spring forward
            ((2019, 3, 10, 7, 0), (2019, 3, 10, 3, 0), false),   // at spring forward
        ];
        for ((uy, um, ud, uh, umin), (ly, lm, ld, lh, lmin), fold) in cases {
            let got = zone.to_local(&dt(uy, um, ud, uh, umin, 0)).unwrap();
            let want = dt(ly, lm, ld, lh, lmin, 0).with_fold(fold);
            assert_eq!(got, want, "{uy}-{um:02}-{ud:02}T{uh:02}:{umin:02}Z");
        }
    }

    #[test]
    fn test_to_local_after_table_uses_rule() {
        let zone = us_eastern();
        // First Sunday of November 2031 is Nov 2; transition at 06:00 UTC
        let got = zone.to_local(&dt(2031, 11, 2, 6, 30, 0)).unwrap();
        assert_eq!(got, dt(2031, 11, 2, 1, 30, 0).with_fold(true));
        let got = zone.to_local(&dt(2031, 11, 2, 5, 30, 0)).unwrap();
        assert_eq!(got, dt(2031, 11, 2, 1, 30, 0));
    }

    #[test]
    fn test_round_trip_with_fold() {
        let zone = us_eastern();
        let readings = [
            dt(2019, 7, 1, 12, 0, 0),
            dt(2019, 12, 25, 23, 59, 59),
            dt(2020, 11, 1, 1, 30, 0),                 // ambiguous, first pass
            dt(2020, 11, 1, 1, 30, 0).with_fold(true), // ambiguous, second pass
            dt(2031, 11, 2, 1, 30, 0),                 // ambiguous, rule-governed
            dt(2031, 11, 2, 1, 30, 0).with_fold(true),
        ];
        for local in readings {
            let utc = zone.to_utc(&local).unwrap();
            let back = zone.to_local(&utc).unwrap();
            assert_eq!(back, local, "round trip through {utc}");
        }
    }

    #[test]
    fn test_empty_table_delegates_to_rule() {
        let zone = Zone {
            key: None,
            trans_utc: vec![],
            trans_local: [vec![], vec![]],
            types: vec![],
            before: record(0, 0, "UTC"),
            after: TzAfter::Rule(posix::parse(b"CET-1CEST,M3.5.0,M10.5.0/3").unwrap()),
        };
        assert_eq!(
            zone.offset_at(&dt(2024, 7, 1, 12, 0, 0)).abbreviation(),
            "CEST"
        );
        assert_eq!(
            zone.offset_at(&dt(2024, 1, 1, 12, 0, 0)).abbreviation(),
            "CET"
        );
        let local = zone.to_local(&dt(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(local, dt(2024, 1, 1, 13, 0, 0));
    }

    #[test]
    fn test_static_after() {
        let mut zone = us_eastern();
        zone.after = TzAfter::Static(record(-18000, 0, "EST"));
        assert_eq!(
            zone.offset_at(&dt(2031, 7, 1, 12, 0, 0)).abbreviation(),
            "EST"
        );
        let got = zone.to_local(&dt(2031, 7, 1, 12, 0, 0)).unwrap();
        assert_eq!(got, dt(2031, 7, 1, 7, 0, 0));
    }

    #[test]
    fn test_out_of_range_conversion() {
        // Shifting the very end of the calendar past its bounds
        let zone = us_eastern();
        let edge = dt(9999, 12, 31, 23, 30, 0);
        assert!(matches!(zone.to_utc(&edge), Err(Error::OutOfRange)));

        let mut east = us_eastern();
        east.after = TzAfter::Static(record(7200, 0, "XST"));
        assert!(matches!(east.to_local(&edge), Err(Error::OutOfRange)));
    }

    #[test]
    fn test_timezone_trait_interning() {
        let zone = us_eastern();
        let a = zone.utc_offset(&dt(2019, 7, 1, 12, 0, 0));
        let b = zone.utc_offset(&dt(2020, 7, 1, 12, 0, 0));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.seconds(), -14400);
        assert_eq!(zone.dst(&dt(2019, 7, 1, 12, 0, 0)).seconds(), 3600);
        assert_eq!(zone.dst(&dt(2019, 1, 15, 12, 0, 0)).seconds(), 0);
        assert_eq!(&*zone.tzname(&dt(2019, 1, 15, 12, 0, 0)), "EST");
        assert_eq!(
            zone.from_utc(&dt(2019, 11, 3, 6, 30, 0)).unwrap(),
            dt(2019, 11, 3, 1, 30, 0).with_fold(true)
        );
    }

    #[test]
    fn test_display_and_key() {
        let zone = us_eastern();
        assert_eq!(zone.key(), Some("America/Testville"));
        assert_eq!(zone.to_string(), "America/Testville");
    }
}
