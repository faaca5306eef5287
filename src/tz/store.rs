//! Locating time zone data on the file system, and the process-wide cache
//! of loaded zones.
use crate::tz::{Error, tzif, zone::Zone};
use ahash::AHashMap;
use log::{debug, warn};
use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, Weak},
};

const LRU_CAPACITY: usize = 8; // this value seems to work well for the reference cache

const DEFAULT_TZPATH: &[&str] = &[
    "/usr/share/zoneinfo",
    "/usr/lib/zoneinfo",
    "/usr/share/lib/zoneinfo",
    "/etc/zoneinfo",
];

/// Loads zones by key from a list of search paths, handing out shared
/// references to already-loaded zones where possible.
#[derive(Debug)]
pub struct ZoneStore {
    // The paths to search for zone files, in order
    paths: Vec<PathBuf>,
    cache: Mutex<Cache>,
}

/// Two cache tiers, as in the reference zoneinfo implementation:
///
/// - `lookup` holds weak references, so a key resolves to the *same* zone
///   instance for as long as anything in the process still uses it;
/// - `lru` keeps strong references to the handful of most recently used
///   zones, so churning through short-lived values doesn't reload the
///   same file over and over.
///
/// Dead weak entries are pruned opportunistically when new zones come in.
#[derive(Debug)]
struct Cache {
    lookup: AHashMap<String, Weak<Zone>>,
    lru: VecDeque<Arc<Zone>>,
}

impl Cache {
    fn new() -> Self {
        Cache {
            lookup: AHashMap::with_capacity(8), // a reasonable default size
            lru: VecDeque::with_capacity(LRU_CAPACITY),
        }
    }

    /// Register the given zone was "used recently", moving it to the front
    /// of the LRU.
    fn promote(&mut self, zone: &Arc<Zone>) {
        match self.lru.iter().position(|z| Arc::ptr_eq(z, zone)) {
            Some(0) => {} // Already at the front
            Some(i) => {
                let z = self.lru.remove(i).unwrap();
                self.lru.push_front(z);
            }
            None => self.push_front(zone.clone()),
        }
    }

    fn insert(&mut self, key: &str, zone: &Arc<Zone>) {
        self.lookup.retain(|_, weak| weak.strong_count() > 0);
        self.lookup.insert(key.to_string(), Arc::downgrade(zone));
        self.push_front(zone.clone());
    }

    fn push_front(&mut self, zone: Arc<Zone>) {
        // If the LRU exceeds capacity, drop the least recently used entry.
        // Its weak entry lingers until the next pruning (or longer, if
        // users still hold the zone; then it keeps serving lookups).
        if self.lru.len() == LRU_CAPACITY {
            self.lru.pop_back();
        }
        self.lru.push_front(zone);
    }
}

impl ZoneStore {
    /// A store searching the `TZPATH` environment variable (colon-separated
    /// absolute paths; empty means "nowhere"), or the usual Unix locations
    /// if it is unset.
    pub fn new() -> Self {
        Self::with_paths(tzpath_from_env())
    }

    /// A store searching exactly the given paths, in order.
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        ZoneStore {
            paths,
            cache: Mutex::new(Cache::new()),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Fetch the zone for the given IANA key, loading it from the search
    /// path on first use. As long as any previously returned reference to
    /// this key is still alive, the same instance is returned.
    pub fn get(&self, key: &str) -> Result<Arc<Zone>, Error> {
        let mut cache = self.cache.lock().expect("zone cache poisoned");
        if let Some(zone) = cache.lookup.get(key).and_then(Weak::upgrade) {
            cache.promote(&zone);
            return Ok(zone);
        }
        // Loading happens inside the critical section: each key is
        // constructed at most once, no matter how many threads race here.
        let zone = Arc::new(self.load(key)?);
        cache.insert(key, &zone);
        Ok(zone)
    }

    /// Load a fresh zone, bypassing the cache in both directions.
    pub fn get_uncached(&self, key: &str) -> Result<Arc<Zone>, Error> {
        self.load(key).map(Arc::new)
    }

    /// Forget all cached zones. Zones still referenced elsewhere stay
    /// valid, but later `get` calls return new instances.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().expect("zone cache poisoned");
        cache.lookup.clear();
        cache.lru.clear();
    }

    /// Forget only the given keys.
    pub fn clear_only(&self, keys: &[&str]) {
        let mut cache = self.cache.lock().expect("zone cache poisoned");
        for &key in keys {
            cache.lookup.remove(key);
            if let Some(i) = cache
                .lru
                .iter()
                .position(|z| z.key() == Some(key))
            {
                cache.lru.remove(i);
            }
        }
    }

    /// Read and decode a zone file, assuming the key is untrusted input.
    fn load(&self, key: &str) -> Result<Zone, Error> {
        if !is_valid_key(key) {
            return Err(Error::BadKey(key.to_string()));
        }
        for base in &self.paths {
            let path = base.join(key);
            if path.is_file() {
                debug!("loading zone {key} from {}", path.display());
                let bytes = fs::read(&path)?;
                return tzif::parse(&bytes, Some(key));
            }
        }
        debug!("no file for zone {key} on {:?}", self.paths);
        Err(Error::NotFound(key.to_string()))
    }
}

impl Default for ZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide store, initialized from the environment on first use.
pub fn shared() -> &'static ZoneStore {
    static STORE: OnceLock<ZoneStore> = OnceLock::new();
    STORE.get_or_init(ZoneStore::new)
}

fn tzpath_from_env() -> Vec<PathBuf> {
    match std::env::var("TZPATH") {
        Ok(raw) => parse_tzpath(&raw),
        Err(_) => {
            let mut paths: Vec<PathBuf> = DEFAULT_TZPATH.iter().map(PathBuf::from).collect();
            // Probe existing directories first
            paths.sort_by_key(|p| !p.exists());
            paths
        }
    }
}

fn parse_tzpath(raw: &str) -> Vec<PathBuf> {
    raw.split(':')
        .filter(|s| !s.is_empty())
        .filter_map(|s| {
            let path = PathBuf::from(s);
            if path.is_absolute() {
                Some(path)
            } else {
                warn!("ignoring relative TZPATH entry {s:?}");
                None
            }
        })
        .collect()
}

/// Check whether a TZ key has a valid format (not whether it actually
/// exists). Since keys are used to traverse the filesystem, anything that
/// could escape the search path is rejected.
pub fn is_valid_key(key: &str) -> bool {
    let Some(&first) = key.as_bytes().first() else {
        return false; // empty is invalid
    };
    let &last = key.as_bytes().last().unwrap(); // we know it's not empty

    // There's no standard limit on IANA tz keys, but we have to draw
    // the line somewhere to prevent abuse.
    key.len() < 100
        // Here we eliminate most "nasty" characters like null bytes,
        // or invalid path characters.
        // Note this is a more relaxed check than the TZDB uses.
        && key.as_bytes().iter().all(|&b| b.is_ascii_alphanumeric()
            || b == b'_'
            || b == b'-'
            || b == b'+'
            || b == b'/'
            || b == b'.')
        // Some specific sequences are not allowed, that'd mess up path
        // traversal. These checks re-scan the string. Somewhat inefficient,
        // but fine for small strings
        && !key.contains("..")
        && !key.contains("//")
        && !key.contains("/./")
        // Extra restrictions for the first...
        && !matches!(first, b'-' | b'+' | b'/')
        // ... and last character
        && last != b'/'
}
