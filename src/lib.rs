//! An IANA time zone engine: decodes compiled TZif files (RFC 8536,
//! versions 1-3), evaluates the POSIX TZ strings that extend them
//! indefinitely into the future, and answers the three questions a
//! datetime library asks of a zone: the UTC offset, its daylight-saving
//! component, and the designation in effect at any civil instant.
//!
//! Conversions across the UTC boundary handle repeated ("fold") and
//! skipped ("gap") wall-clock readings through the one-bit fold
//! disambiguator on [`DateTime`].
//!
//! ```no_run
//! use zoneinfo::{TimeZone, store};
//!
//! # fn main() -> Result<(), zoneinfo::Error> {
//! let zone = store::shared().get("Europe/Dublin")?;
//! let utc = zoneinfo::DateTime::new(
//!     zoneinfo::Date::new(
//!         zoneinfo::Year::new(2019).unwrap(),
//!         zoneinfo::Month::October,
//!         27,
//!     )
//!     .unwrap(),
//!     zoneinfo::Time::MIDNIGHT,
//! );
//! let local = zone.from_utc(&utc)?;
//! println!("{local} {}", zone.tzname(&local));
//! # Ok(())
//! # }
//! ```
//!
//! Loaded zones are immutable and freely shareable across threads; the
//! [`store`] module adds search-path resolution and a process-wide cache
//! that hands out identity-shared instances.
mod civil;
mod common;
mod delta;
pub mod tz;

pub use civil::{Date, DateTime, Time};
pub use common::scalar::{EpochSecs, Month, Offset, OffsetDelta, SubSecNanos, Weekday, Year};
pub use delta::TimeDelta;
pub use tz::{
    Error, store,
    zone::{TimeZone, TypeRecord, Zone},
};
