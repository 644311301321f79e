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

//! Finding items: the lookup core and the wildcard fallback ladder.
//!
//! [`Search::find`] runs a ladder of attempts against one handle:
//!
//! 1. the key verbatim;
//! 2. for partial lookups, the affix prepended to the key, then the
//!    key with leading dotted components replaced by the affix, while
//!    at least the minimum number of non-wild components remains, and
//!    finally the affix alone;
//! 3. with the `*@` default, the key with the byte before its
//!    rightmost `@` replaced by `*`;
//! 4. with either default, the literal key `*`.
//!
//! Every attempt goes through the private lookup core, which consults
//! the handle's item cache before calling the driver and installs the
//! driver's answer afterwards (negative answers included) for as long
//! as the driver's TTL allows. A defer from the driver aborts the
//! whole ladder.
//!
//! A successful wildcard match reports the wild and fixed parts of the
//! key through a caller-supplied [`ExpandSink`]; the fixed part has
//! been validated by the lookup and is therefore detainted.

use std::time::Instant;

use log::{debug, warn};

use super::{Error, Handle, Item, QuotePolicy, Result, Search, Star};
use crate::driver::{Answer, Ttl};
use crate::taint::{Text, TextBuf};

/// A collector for the expansion variables produced by a match.
///
/// On a wildcard or default match the dispatcher pushes two values, in
/// order: the wild part of the key, then the fixed part. The fixed
/// part arrives detainted. On a verbatim match of a potentially
/// partial lookup the wild part is empty and the fixed part is the
/// whole key.
pub trait ExpandSink {
    fn push(&mut self, value: Text<'_>);
}

impl ExpandSink for Vec<TextBuf> {
    fn push(&mut self, value: Text<'_>) {
        Vec::push(self, value.to_buf());
    }
}

impl<'d> Search<'d> {
    /// Finds `key` through `handle`, applying the wildcard and default
    /// rules requested by the call site.
    ///
    /// `partial` is the minimum number of non-wild components for
    /// partial matching, or `None` to disable it; `affix` is the
    /// wildcard affix (used only with `partial`). `filename` must be
    /// the name the handle was opened with. Recognized dispatcher
    /// options in `opts` are `ret=key` (return the matched key, not
    /// the data) and `cache=no_rd` (do not read the item cache, only
    /// write it); all others are forwarded to the driver.
    ///
    /// Returns `Ok(None)` when nothing matched. A deferring backend
    /// surfaces as [`Error::Defer`] (see [`Error::is_defer`]). The
    /// payload came from outside and is returned tainted, except that
    /// `ret=key` yields a detainted copy of the key, which the lookup
    /// itself validated.
    #[allow(clippy::too_many_arguments)]
    pub fn find(
        &mut self,
        handle: Handle,
        filename: Option<&str>,
        key: &Text<'_>,
        partial: Option<u32>,
        affix: &str,
        star: Star,
        mut sink: Option<&mut dyn ExpandSink>,
        opts: Option<&str>,
    ) -> Result<Option<TextBuf>> {
        self.slot(handle)?;
        debug!(
            "search_find: file=\"{}\" key=\"{}\" partial={:?} affix=\"{}\" star={:?} opts={:?}",
            filename.unwrap_or("NULL"),
            key.as_str(),
            partial,
            affix,
            star,
            opts,
        );

        // Strip the dispatcher-level options. The remainder is what
        // the driver sees and what the item cache fingerprints, so
        // the cache modifiers themselves never influence cache keys.
        let mut ret_key = false;
        let mut cache_rd = true;
        let mut forwarded: Option<String> = None;
        if let Some(opts) = opts {
            let mut kept = Vec::new();
            for ele in opts.split(',') {
                match ele {
                    "ret=key" => ret_key = true,
                    "cache=no_rd" => cache_rd = false,
                    _ => kept.push(ele),
                }
            }
            if !kept.is_empty() {
                forwarded = Some(kept.join(","));
            }
        }
        let opts = forwarded.as_deref();

        // Reopen the backend if LRU pressure closed it, and move this
        // handle to the head of the chain.
        self.ensure_open(handle.0)?;
        self.promote(handle.0);

        let keystr = key.as_str();

        // First of all, try to match the key string verbatim. If a
        // potentially partial lookup matched a complete entry, flag it
        // so the expansion variables are set up at the end.
        let mut set_null_wild = false;
        let mut result = self.find_one(handle, filename, key, cache_rd, opts)?;
        if result.is_some() {
            set_null_wild = partial.is_some();
        } else if let Some(min_components) = partial {
            // Try with the affix on the front, except when it is
            // empty.
            if !affix.is_empty() {
                let candidate = format!("{}{}", affix, keystr);
                debug!("trying partial match {}", candidate);
                result = self.find_one(
                    handle,
                    filename,
                    &Text::new(&candidate, key.taint()),
                    cache_rd,
                    opts,
                )?;
            }
            if result.is_some() {
                // Matched a wild entry without trimming anything.
                set_null_wild = true;
            } else {
                // Chop off leading components, replacing them with the
                // affix, while enough non-wild components remain.
                let mut dotcount = keystr.matches('.').count() as i64;
                let mut cursor = 0;
                while dotcount >= min_components as i64 {
                    dotcount -= 1;
                    let (candidate, candidate_affix_len) = match keystr[cursor..].find('.') {
                        Some(dot) => {
                            cursor += dot + 1;
                            (format!("{}{}", affix, &keystr[cursor..]), affix.len())
                        }
                        None => {
                            // Right at the end of the string: one last
                            // lookup of the affix alone, minus a
                            // trailing dot when longer than one byte.
                            if affix.is_empty() {
                                break;
                            }
                            cursor = keystr.len();
                            let mut alone = affix;
                            if alone.len() > 1 && alone.ends_with('.') {
                                alone = &alone[..alone.len() - 1];
                            }
                            (alone.to_string(), alone.len())
                        }
                    };
                    debug!("trying partial match {}", candidate);
                    result = self.find_one(
                        handle,
                        filename,
                        &Text::new(&candidate, key.taint()),
                        cache_rd,
                        opts,
                    )?;
                    if result.is_some() {
                        // The first variable is the wild part, the
                        // second the fixed part, detainted since the
                        // lookup validated it.
                        if let Some(sink) = sink.as_deref_mut() {
                            let fixed_len = candidate.len() - candidate_affix_len;
                            let wild_len = keystr.len().saturating_sub(fixed_len + 1);
                            sink.push(Text::new(
                                prefix_to_boundary(keystr, wild_len),
                                key.taint(),
                            ));
                            sink.push(Text::clean(&keystr[keystr.len() - fixed_len..]));
                        }
                        break;
                    }
                }
            }
        }

        // Nothing yet, but the *@ default is wanted: replace the byte
        // before the rightmost @ with * and try that. The wild part is
        // then everything to the left of the @.
        if result.is_none() && star == Star::StarAt {
            if let Some(at) = keystr.rfind('@') {
                if at > 0 {
                    let candidate = format!("*{}", &keystr[at..]);
                    debug!("trying default match {}", candidate);
                    result = self.find_one(
                        handle,
                        filename,
                        &Text::new(&candidate, key.taint()),
                        cache_rd,
                        opts,
                    )?;
                    if result.is_some() {
                        if let Some(sink) = sink.as_deref_mut() {
                            sink.push(Text::new(&keystr[..at], key.taint()));
                            sink.push(Text::new("", key.taint()));
                        }
                    }
                }
            }
        }

        // Still nothing, but one of the defaults is wanted: try the
        // literal key *. The wild part is the whole key.
        if result.is_none() && star != Star::None {
            debug!("trying to match *");
            result = self.find_one(handle, filename, &Text::clean("*"), cache_rd, opts)?;
            if result.is_some() {
                if let Some(sink) = sink.as_deref_mut() {
                    sink.push(Text::new(keystr, key.taint()));
                    sink.push(Text::new("", key.taint()));
                }
            }
        }

        // A potentially partial lookup that matched without any wild
        // part gets an empty wild variable and the whole key,
        // detainted, as the fixed variable.
        if set_null_wild {
            if let Some(sink) = sink.as_deref_mut() {
                sink.push(Text::new("", key.taint()));
                sink.push(Text::clean(keystr));
            }
        }

        // The caller may want the matched key rather than the data.
        // The lookup validated the key, so it is detainted.
        if ret_key && result.is_some() {
            return Ok(Some(TextBuf::clean(keystr.to_string())));
        }
        Ok(result.map(TextBuf::tainted))
    }

    /// The lookup core: finds one item through one handle, consulting
    /// and maintaining the item cache.
    fn find_one(
        &mut self,
        handle: Handle,
        filename: Option<&str>,
        key: &Text<'_>,
        cache_rd: bool,
        opts: Option<&str>,
    ) -> Result<Option<String>> {
        let idx = handle.0;
        let registry = self.registry;
        let policy = self.params.quote_policy;

        // If the keystring is empty, just fail.
        if key.as_str().is_empty() {
            return Ok(None);
        }

        let search_type = {
            let slot = self.slots.get(idx).ok_or(Error::StaleHandle)?;

            // Use the cached data for this key, if there is any and it
            // is still usable.
            if let Some(item) = slot.items.get(key.as_str()) {
                let unexpired = item.expires.map_or(true, |expires| expires > Instant::now());
                if cache_rd && unexpired && item.opts.as_deref() == opts {
                    debug!("cached data used for lookup of {}", key.as_str());
                    return Ok(item.data.clone());
                }
                debug!(
                    "cached data found for {} but {}",
                    key.as_str(),
                    if !unexpired {
                        "out of date"
                    } else if cache_rd {
                        "the options differ"
                    } else {
                        "cache reads are off"
                    },
                );
            }
            slot.driver
        };

        let info = &registry[search_type];
        let driver = info
            .driver
            .ok_or_else(|| Error::TypeNotAvailable(info.name.to_string()))?;

        // A tainted query sent to a driver with quoting support must
        // have been quoted for that driver.
        if filename.is_none()
            && key.is_tainted()
            && key.quoter() != Some(search_type)
            && driver.quote(key.as_str()).is_some()
        {
            match policy {
                QuotePolicy::Warn => {
                    warn!(
                        "tainted search query is not properly quoted: {}",
                        key.as_str(),
                    );
                }
                QuotePolicy::Defer => {
                    return Err(Error::UnquotedQuery(key.as_str().to_string()));
                }
            }
        }

        self.ensure_open(idx)?;
        let slot = self.slots.get_mut(idx).ok_or(Error::StaleHandle)?;
        let backend = match slot.backend.as_mut() {
            Some(backend) => backend,
            None => return Err(Error::StaleHandle),
        };

        debug!(
            "{} lookup required for {}",
            if filename.is_some() { "file" } else { "database" },
            key.as_str(),
        );
        let mut ttl = Ttl::Forever;
        let data = match driver.find(backend.as_mut(), filename, key.as_str(), opts, &mut ttl) {
            Answer::Found(data) => Some(data),
            Answer::NotFound => None,
            Answer::Defer(message) => {
                debug!("lookup deferred: {}", message);
                return Err(Error::Defer(message));
            }
        };

        // Install the answer, negative answers included, unless the
        // driver asked for the cache to be flushed, which happens when
        // it did something that invalidated its earlier data.
        match ttl {
            Ttl::Flush => {
                debug!("lookup forced cache cleanup");
                slot.items.clear();
            }
            Ttl::Forever => {
                slot.items.insert(
                    key.as_str().to_string(),
                    Item {
                        data: data.clone(),
                        expires: None,
                        opts: opts.map(str::to_string),
                    },
                );
            }
            Ttl::For(ttl) => {
                slot.items.insert(
                    key.as_str().to_string(),
                    Item {
                        data: data.clone(),
                        expires: Some(Instant::now() + ttl),
                        opts: opts.map(str::to_string),
                    },
                );
            }
        }

        match &data {
            Some(data) => debug!("lookup yielded: {}", data),
            None => debug!("lookup failed"),
        }
        Ok(data)
    }
}

/// Returns the prefix of `s` of at most `len` bytes, rounded down to a
/// character boundary. Keys are almost always ASCII; this keeps the
/// wild-part slicing safe when they are not.
fn prefix_to_boundary(s: &str, mut len: usize) -> &str {
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    &s[..len]
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
