//! Shared, interned second-precision durations.
//!
//! A zone only ever hands out a handful of distinct offset magnitudes, and
//! most of them (whole hours, half hours) are shared between many zones.
//! Instead of allocating a fresh value per query, identical magnitudes are
//! deduplicated into one refcounted value per process.
use ahash::AHashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// An amount of time with second precision, as returned by offset queries.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TimeDelta {
    secs: i32,
}

impl TimeDelta {
    /// Get a shared handle for the given number of seconds.
    ///
    /// Handles for equal magnitudes are pointer-identical
    /// (`Arc::ptr_eq`) and live for the rest of the process.
    pub fn of(secs: i32) -> Arc<TimeDelta> {
        let mut pool = cache().lock().expect("delta intern pool poisoned");
        pool.entry(secs)
            .or_insert_with(|| Arc::new(TimeDelta { secs }))
            .clone()
    }

    pub const fn seconds(&self) -> i32 {
        self.secs
    }
}

impl std::fmt::Display for TimeDelta {
    /// Format as "+hh:mm", adding ":ss" only if needed
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (sign, secs) = if self.secs < 0 {
            ('-', -self.secs)
        } else {
            ('+', self.secs)
        };
        if secs % 60 == 0 {
            write!(f, "{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
        } else {
            write!(
                f,
                "{}{:02}:{:02}:{:02}",
                sign,
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            )
        }
    }
}

fn cache() -> &'static Mutex<AHashMap<i32, Arc<TimeDelta>>> {
    static POOL: OnceLock<Mutex<AHashMap<i32, Arc<TimeDelta>>>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(AHashMap::with_capacity(16)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interned_identity() {
        let a = TimeDelta::of(3600);
        let b = TimeDelta::of(3600);
        let c = TimeDelta::of(-3600);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.seconds(), 3600);
        assert_eq!(c.seconds(), -3600);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeDelta::of(0).to_string(), "+00:00");
        assert_eq!(TimeDelta::of(-18_000).to_string(), "-05:00");
        assert_eq!(TimeDelta::of(2_079).to_string(), "+00:34:39");
    }
}
