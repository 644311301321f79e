// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The lookup dispatcher: handle cache, LRU chain, open and tidy.
//!
//! A [`Search`] context owns every piece of dispatcher state: the
//! handle cache (a slab of slots addressed by `(driver, resource)`
//! keys), the per-slot item caches, the LRU chain threaded through the
//! file-backed slots, and the open-file count. Call sites hold one
//! context per process and drive it through [`Search::open`],
//! [`Search::find`], and a final [`Search::tidy`].
//!
//! Opening is cached: the first open of a `(driver, resource)` pair
//! runs the driver's open (and optional check) hooks and records the
//! backend state in a slot; later opens return the same [`Handle`].
//! When too many file-backed backends are open at once, the least
//! recently used one is closed, but its slot (and the item cache
//! hanging off it) survives, and the backend is reopened transparently
//! the next time the handle is used.

use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

use arrayvec::ArrayVec;
use log::{debug, error};
use slab::Slab;

use crate::driver::{self, DriverInfo};
use crate::taint::{Text, TextBuf};

mod error;
mod find;
mod lookup_type;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{Error, Result};
pub use find::ExpandSink;
pub use lookup_type::{find_driver, split_args, LookupType, Star};

/// Resource names longer than this are truncated when forming a slot
/// key. Keeps keys bounded; the full name is kept separately for
/// reopening.
const KEY_RESOURCE_MAX: usize = 254;

/// A slot key: the driver index as one character, then the (possibly
/// truncated) resource name.
type SlotKey = ArrayVec<u8, 255>;

/// Tunable parameters for a [`Search`] context.
pub struct Params {
    /// Maximum number of file-backed backends held open concurrently.
    /// Opening past the cap closes the least recently used backend
    /// first.
    pub open_max: usize,
    /// What to do when a tainted query reaches a quoting driver
    /// without having been quoted for it.
    pub quote_policy: QuotePolicy,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            open_max: 25,
            quote_policy: QuotePolicy::Defer,
        }
    }
}

/// Policy for tainted queries that are not quoted for their driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuotePolicy {
    /// Log a warning and let the lookup proceed.
    Warn,
    /// Refuse the lookup with [`Error::UnquotedQuery`].
    Defer,
}

/// An opaque reference to a slot in the handle cache. Valid until the
/// next [`Search::tidy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Handle(usize);

/// One entry in the handle cache.
struct Slot {
    /// Index of the driver in the registry.
    driver: usize,
    /// The backend state from the driver's open hook, or `None` when
    /// LRU pressure has closed it.
    backend: Option<Box<dyn Any>>,
    /// Cached results, keyed by the exact string given to the driver.
    items: HashMap<String, Item>,
    /// The full resource name, kept for transparent reopening.
    filename: Option<String>,
    // Ownership constraints from the first open, reused on reopen.
    modemask: u32,
    owners: Vec<u32>,
    groups: Vec<u32>,
    /// LRU links (slot indices); `prev` is towards the MRU end. Only
    /// meaningful while a file-backed backend is open.
    prev: Option<usize>,
    next: Option<usize>,
}

/// One cached result.
struct Item {
    /// The payload, or `None` for a cached negative answer.
    data: Option<String>,
    /// Absolute expiry; `None` means the entry lives until tidy.
    expires: Option<Instant>,
    /// The per-query options that produced this result. A later query
    /// with different options must miss.
    opts: Option<String>,
}

/// The dispatcher context.
///
/// All dispatcher state lives here; there are no globals and no
/// internal locks. One context belongs to one thread of one process.
pub struct Search<'d> {
    registry: &'d [DriverInfo<'d>],
    params: Params,
    slots: Slab<Slot>,
    by_key: HashMap<SlotKey, usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    open_filecount: usize,
}

impl Search<'static> {
    /// Creates a context over the built-in driver registry.
    pub fn new(params: Params) -> Self {
        Self::with_registry(driver::REGISTRY, params)
    }
}

impl<'d> Search<'d> {
    /// Creates a context over a caller-supplied registry. The registry
    /// must be sorted by name.
    pub fn with_registry(registry: &'d [DriverInfo<'d>], params: Params) -> Self {
        Self {
            registry,
            params,
            slots: Slab::new(),
            by_key: HashMap::new(),
            lru_head: None,
            lru_tail: None,
            open_filecount: 0,
        }
    }

    /// Returns the driver registry this context resolves names in.
    pub fn registry(&self) -> &'d [DriverInfo<'d>] {
        self.registry
    }

    /// Parses a decorated lookup type string against this context's
    /// registry.
    pub fn parse_type(&self, full: &str) -> Result<LookupType> {
        LookupType::parse(self.registry, full)
    }

    /// Returns the number of file-backed backends currently open.
    pub fn open_filecount(&self) -> usize {
        self.open_filecount
    }

    /// Opens (or finds in the handle cache) the backend for
    /// `search_type` and `filename`.
    ///
    /// `filename` is required by single-key types and absent for query
    /// types; it must be untainted. `modemask` names mode bits that
    /// must not be set on a real file backing the lookup, and
    /// `owners`/`groups` the acceptable owners (empty lists accept
    /// anything); they are handed to the driver's check hook and
    /// remembered for transparent reopening.
    ///
    /// The returned [`Handle`] stays valid until [`Search::tidy`] is
    /// called, surviving LRU eviction of the backend.
    pub fn open(
        &mut self,
        search_type: usize,
        filename: Option<&Text<'_>>,
        modemask: u32,
        owners: &[u32],
        groups: &[u32],
    ) -> Result<Handle> {
        let registry = self.registry;
        let info = &registry[search_type];

        if let Some(filename) = filename {
            if filename.is_tainted() {
                error!("tainted filename for search: \"{}\"", filename.as_str());
                return Err(Error::TaintedFilename(filename.as_str().to_string()));
            }
        }
        let filename = filename.map(Text::as_str);
        debug!(
            "search_open: {} \"{}\"",
            info.name,
            filename.unwrap_or("NULL"),
        );

        // There may be an existing slot, possibly with a closed
        // backend if a lot of files have been opened.
        let key = slot_key(search_type, filename);
        let existing = self.by_key.get(&key).copied();
        if let Some(idx) = existing {
            if self.slots[idx].backend.is_some() {
                debug!("  cached open");
                return Ok(Handle(idx));
            }
            debug!("  cached closed");
        }

        let backend = self.open_backend(search_type, filename, modemask, owners, groups)?;
        let idx = match existing {
            Some(idx) => {
                // Revive the slot. Its item cache is left alone: the
                // driver and resource are unchanged, so the cached
                // results are still good.
                let slot = &mut self.slots[idx];
                slot.backend = Some(backend);
                slot.modemask = modemask;
                slot.owners = owners.to_vec();
                slot.groups = groups.to_vec();
                idx
            }
            None => {
                let idx = self.slots.insert(Slot {
                    driver: search_type,
                    backend: Some(backend),
                    items: HashMap::new(),
                    filename: filename.map(str::to_string),
                    modemask,
                    owners: owners.to_vec(),
                    groups: groups.to_vec(),
                    prev: None,
                    next: None,
                });
                self.by_key.insert(key, idx);
                idx
            }
        };

        if info.file_backed {
            self.lru_push_head(idx);
            self.open_filecount += 1;
        }
        Ok(Handle(idx))
    }

    /// Runs the driver's open and check hooks, evicting the least
    /// recently used file-backed backend first if the cap is reached.
    fn open_backend(
        &mut self,
        search_type: usize,
        filename: Option<&str>,
        modemask: u32,
        owners: &[u32],
        groups: &[u32],
    ) -> Result<Box<dyn Any>> {
        let registry = self.registry;
        let info = &registry[search_type];
        let driver = info
            .driver
            .ok_or_else(|| Error::TypeNotAvailable(info.name.to_string()))?;

        if info.file_backed && self.open_filecount >= self.params.open_max {
            self.evict_lru();
        }

        let backend = driver.open(filename).map_err(Error::Open)?;
        if let Err(message) = driver.check(backend.as_ref(), filename, modemask, owners, groups) {
            // Dropping the backend here closes it again.
            return Err(Error::Check(message));
        }
        Ok(backend)
    }

    /// Closes the backend at the tail of the LRU chain. The slot and
    /// its item cache remain. When the chain is empty even though the
    /// cap has been reached, this logs and returns: the caller opens
    /// anyway, transiently exceeding the cap.
    fn evict_lru(&mut self) {
        let victim = match self.lru_tail {
            Some(victim) => victim,
            None => {
                error!("too many lookup files open, but none can be closed");
                return;
            }
        };
        debug!(
            "too many lookup files open: closing {} \"{}\"",
            self.registry[self.slots[victim].driver].name,
            self.slots[victim].filename.as_deref().unwrap_or("NULL"),
        );
        self.lru_unlink(victim);
        // Dropping the boxed state closes the backend.
        self.slots[victim].backend = None;
        self.open_filecount -= 1;
    }

    /// Reopens the slot's backend if LRU pressure closed it, using the
    /// constraints remembered from the original open.
    fn ensure_open(&mut self, idx: usize) -> Result<()> {
        if self.slots[idx].backend.is_some() {
            return Ok(());
        }
        let slot = &self.slots[idx];
        let (search_type, filename) = (slot.driver, slot.filename.clone());
        let (modemask, owners, groups) =
            (slot.modemask, slot.owners.clone(), slot.groups.clone());
        debug!(
            "reopening {} \"{}\"",
            self.registry[search_type].name,
            filename.as_deref().unwrap_or("NULL"),
        );
        let backend =
            self.open_backend(search_type, filename.as_deref(), modemask, &owners, &groups)?;
        self.slots[idx].backend = Some(backend);
        if self.registry[search_type].file_backed {
            self.lru_push_head(idx);
            self.open_filecount += 1;
        }
        Ok(())
    }

    /// Moves a live file-backed slot to the head of the LRU chain.
    fn promote(&mut self, idx: usize) {
        if !self.registry[self.slots[idx].driver].file_backed
            || self.slots[idx].backend.is_none()
            || self.lru_head == Some(idx)
        {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_head(idx);
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.lru_tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn lru_push_head(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.lru_head;
        match self.lru_head {
            Some(head) => self.slots[head].prev = Some(idx),
            None => self.lru_tail = Some(idx),
        }
        self.lru_head = Some(idx);
    }

    /// Quotes `text` for the driver's backend syntax, marking the
    /// result so the quoting policy accepts it. Returns `None` when
    /// the driver has no quoting support.
    pub fn quote(&self, search_type: usize, text: &Text<'_>) -> Option<TextBuf> {
        let driver = self.registry[search_type].driver?;
        let quoted = driver.quote(text.as_str())?;
        Some(TextBuf::with_quoter(quoted, text.taint(), search_type))
    }

    /// Closes every cached backend, drops every slot and item cache,
    /// and runs each driver's process-wide tidy hook. All handles are
    /// invalidated.
    pub fn tidy(&mut self) {
        debug!("search tidy-up called");
        // Dropping the slots closes each live backend exactly once.
        self.slots.clear();
        self.by_key.clear();
        self.lru_head = None;
        self.lru_tail = None;
        self.open_filecount = 0;
        for info in self.registry {
            if let Some(driver) = info.driver {
                driver.tidy();
            }
        }
    }

    /// Looks up the slot for a handle, if it is still live.
    fn slot(&self, handle: Handle) -> Result<&Slot> {
        self.slots.get(handle.0).ok_or(Error::StaleHandle)
    }
}

/// Forms the handle cache key: the driver index as a single character
/// concatenated with the resource name, truncated to
/// [`KEY_RESOURCE_MAX`] bytes.
fn slot_key(search_type: usize, filename: Option<&str>) -> SlotKey {
    let mut key = SlotKey::new();
    key.push(b'0' + search_type as u8);
    let bytes = filename.unwrap_or("").as_bytes();
    let take = bytes.len().min(KEY_RESOURCE_MAX);
    // Capacity is exactly 1 + KEY_RESOURCE_MAX, so this cannot fill.
    for &b in &bytes[..take] {
        key.push(b);
    }
    key
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fixtures::MapDriver;
    use super::*;
    use crate::taint::Text;

    #[test]
    fn open_is_idempotent_per_driver_and_file() {
        let map = MapDriver::new(&[("foo", "bar")]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(&registry, Params::default());

        let a = search
            .open(0, Some(&Text::clean("/tmp/a")), 0, &[], &[])
            .unwrap();
        let b = search
            .open(0, Some(&Text::clean("/tmp/a")), 0, &[], &[])
            .unwrap();
        let c = search
            .open(0, Some(&Text::clean("/tmp/c")), 0, &[], &[])
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // The second open of /tmp/a was a cache hit.
        assert_eq!(map.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tainted_filenames_are_rejected() {
        let map = MapDriver::new(&[]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(&registry, Params::default());

        let err = search
            .open(0, Some(&Text::tainted("/tmp/evil")), 0, &[], &[])
            .unwrap_err();
        assert!(matches!(err, Error::TaintedFilename(_)));
        assert_eq!(map.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lru_eviction_closes_the_least_recently_used() {
        let map = MapDriver::new(&[("foo", "bar")]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(
            &registry,
            Params {
                open_max: 2,
                ..Params::default()
            },
        );

        let a = search.open(0, Some(&Text::clean("/a")), 0, &[], &[]).unwrap();
        let _b = search.open(0, Some(&Text::clean("/b")), 0, &[], &[]).unwrap();
        assert_eq!(search.open_filecount(), 2);
        assert_eq!(map.closes.load(Ordering::SeqCst), 0);

        // Opening a third file closes the oldest backend (/a), but its
        // slot survives.
        let _c = search.open(0, Some(&Text::clean("/c")), 0, &[], &[]).unwrap();
        assert_eq!(search.open_filecount(), 2);
        assert_eq!(map.closes.load(Ordering::SeqCst), 1);
        assert!(search.slot(a).unwrap().backend.is_none());

        // Reopening /a is a revive of the same slot, evicting /b.
        let a2 = search.open(0, Some(&Text::clean("/a")), 0, &[], &[]).unwrap();
        assert_eq!(a, a2);
        assert_eq!(search.open_filecount(), 2);
        assert_eq!(map.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cap_with_no_victim_still_opens() {
        let map = MapDriver::new(&[]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(
            &registry,
            Params {
                open_max: 0,
                ..Params::default()
            },
        );

        // The count is at the cap (zero) but the chain is empty; the
        // open proceeds anyway and transiently exceeds the cap.
        search.open(0, Some(&Text::clean("/a")), 0, &[], &[]).unwrap();
        assert_eq!(search.open_filecount(), 1);
    }

    #[test]
    fn resource_names_are_keyed_up_to_254_bytes() {
        let map = MapDriver::new(&[]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(&registry, Params::default());

        // Two 254-byte names differing in the last byte get their own
        // slots.
        let short_x = format!("{}x", "a".repeat(253));
        let short_y = format!("{}y", "a".repeat(253));
        let a = search
            .open(0, Some(&Text::clean(&short_x)), 0, &[], &[])
            .unwrap();
        let b = search
            .open(0, Some(&Text::clean(&short_y)), 0, &[], &[])
            .unwrap();
        assert_ne!(a, b);

        // Two 255-byte names differing only in the last byte collide
        // after truncation and share one slot.
        let long_x = format!("{}x", "b".repeat(254));
        let long_y = format!("{}y", "b".repeat(254));
        let c = search
            .open(0, Some(&Text::clean(&long_x)), 0, &[], &[])
            .unwrap();
        let d = search
            .open(0, Some(&Text::clean(&long_y)), 0, &[], &[])
            .unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn tidy_closes_everything_and_invalidates_handles() {
        let map = MapDriver::new(&[]);
        let registry = [map.info("map")];
        let mut search = Search::with_registry(&registry, Params::default());

        let a = search.open(0, Some(&Text::clean("/a")), 0, &[], &[]).unwrap();
        let _b = search.open(0, Some(&Text::clean("/b")), 0, &[], &[]).unwrap();
        search.tidy();

        assert_eq!(map.closes.load(Ordering::SeqCst), 2);
        assert_eq!(map.tidies.load(Ordering::SeqCst), 1);
        assert_eq!(search.open_filecount(), 0);
        assert!(matches!(search.slot(a), Err(Error::StaleHandle)));
    }

    #[test]
    fn check_failures_close_the_backend() {
        let map = MapDriver::new(&[]).failing_check("wrong mode");
        let registry = [map.info("map")];
        let mut search = Search::with_registry(&registry, Params::default());

        let err = search
            .open(0, Some(&Text::clean("/a")), 0o22, &[], &[])
            .unwrap_err();
        assert!(matches!(err, Error::Check(_)));
        assert_eq!(map.opens.load(Ordering::SeqCst), 1);
        assert_eq!(map.closes.load(Ordering::SeqCst), 1);
        assert_eq!(search.open_filecount(), 0);
    }
}
