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

//! Lookup type names and their decorated syntax.
//!
//! Call sites name a lookup with a decorated string, read left to
//! right:
//!
//! ```text
//! type    := partial? name star? options
//! partial := "partial" digits? ( "(" affix ")" | "-" )
//! star    := "*" | "*@"
//! options := "," raw-to-end
//! ```
//!
//! `partial` enables wildcard fallback for dotted keys: `partialN`
//! requires at least `N` non-wild components to remain, `partial`
//! alone defaults to 2, `partial-` selects the default `"*."` affix,
//! and `partial(AFFIX)` captures a literal affix of punctuation
//! characters. A trailing `*` or `*@` asks for the corresponding
//! last-resort default lookups. Everything after the first comma is
//! passed through as options. Examples:
//!
//! ```text
//! lsearch
//! partial-lsearch
//! partial3(*+)dbm
//! lsearch*@,ret=key
//! ```
//!
//! [`LookupType::parse`] resolves the embedded name against the
//! registry with [`find_driver`], and rejects `partial` and the star
//! defaults for query-style types.

use std::cmp::Ordering;

use super::{Error, Result};
use crate::driver::{DriverInfo, Style};

/// Resolves a lookup type name to its index in `registry`.
///
/// The registry is sorted by name, so this is a binary search. A name
/// that is a prefix of a stored name (e.g. `nis` against `nisplus`)
/// compares as less than it, which resolves such collisions to the
/// exact entry when it exists. A name that is present but has no
/// driver built in fails with [`Error::TypeNotAvailable`], distinct
/// from [`Error::UnknownType`].
pub fn find_driver(registry: &[DriverInfo], name: &str) -> Result<usize> {
    let mut bot = 0;
    let mut top = registry.len();
    while top > bot {
        let mid = (bot + top) / 2;
        let stored = registry[mid].name;
        let c = prefix_cmp(name.as_bytes(), stored.as_bytes());
        if c == Ordering::Equal && stored.len() == name.len() {
            return match registry[mid].driver {
                Some(_) => Ok(mid),
                None => Err(Error::TypeNotAvailable(name.to_string())),
            };
        }
        if c == Ordering::Greater {
            bot = mid + 1;
        } else {
            top = mid;
        }
    }
    Err(Error::UnknownType(name.to_string()))
}

/// Compares `name` against `stored` over the length of `name`. When
/// `stored` is longer and `name` matches its prefix, the result is
/// [`Ordering::Equal`]: the caller must also compare lengths for an
/// exact match, and otherwise treat `name` as the lesser (it sorts
/// before the longer stored name).
fn prefix_cmp(name: &[u8], stored: &[u8]) -> Ordering {
    for (i, &b) in name.iter().enumerate() {
        match stored.get(i) {
            None => return Ordering::Greater,
            Some(&s) if b != s => return b.cmp(&s),
            Some(_) => {}
        }
    }
    Ordering::Equal
}

/// The last-resort default lookups requested by a trailing `*` or
/// `*@`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Star {
    /// No default lookups.
    None,
    /// Try the literal key `*` as a last resort.
    Star,
    /// Try replacing the local part of an address with `*` first, then
    /// the literal key `*`.
    StarAt,
}

/// A parsed lookup type: the driver plus the wildcard and option
/// decorations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupType {
    /// Index of the driver in the registry.
    pub driver: usize,
    /// Minimum number of non-wild components for partial matching, or
    /// `None` when partial matching is disabled.
    pub partial: Option<u32>,
    /// The wildcard affix. Meaningful only when `partial` is set; may
    /// legitimately be empty (`partial0()`).
    pub affix: String,
    /// Requested default lookups.
    pub star: Star,
    /// Everything after the first comma, verbatim.
    pub opts: Option<String>,
}

impl LookupType {
    /// Parses a decorated lookup type string against `registry`.
    pub fn parse(registry: &[DriverInfo], full: &str) -> Result<LookupType> {
        let mut rest = full;
        let mut partial = None;
        let mut affix = String::new();

        if let Some(after) = rest.strip_prefix("partial") {
            let digits_end = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            let count = if digits_end > 0 {
                after[..digits_end]
                    .parse()
                    .map_err(|_| Error::BadTypeFormat(full.to_string()))?
            } else {
                // Default minimum number of non-wild components.
                2
            };
            let after = &after[digits_end..];
            if let Some(in_parens) = after.strip_prefix('(') {
                // The affix is a limited run of punctuation, not
                // including parentheses.
                let end = in_parens
                    .find(|c: char| !(c.is_ascii_punctuation() && c != ')'))
                    .unwrap_or(in_parens.len());
                if !in_parens[end..].starts_with(')') {
                    return Err(Error::BadTypeFormat(full.to_string()));
                }
                affix = in_parens[..end].to_string();
                rest = &in_parens[end + 1..];
            } else if let Some(after_dash) = after.strip_prefix('-') {
                affix = "*.".to_string();
                rest = after_dash;
            } else {
                return Err(Error::BadTypeFormat(full.to_string()));
            }
            partial = Some(count);
        }

        // What remains is the name, possibly followed by * or *@, and
        // then by options introduced by a comma.
        let mut star = Star::None;
        let mut name_len = rest.len();
        let star_pos = rest.find('*');
        if let Some(pos) = star_pos {
            name_len = pos;
            star = if rest.as_bytes().get(pos + 1) == Some(&b'@') {
                Star::StarAt
            } else {
                Star::Star
            };
        }
        let mut opts = None;
        let comma_from = star_pos.unwrap_or(0);
        if let Some(comma) = rest[comma_from..].find(',') {
            let comma = comma_from + comma;
            if comma < name_len {
                name_len = comma;
            }
            opts = Some(rest[comma + 1..].to_string());
        }

        let name = &rest[..name_len];
        let driver = find_driver(registry, name)?;
        if registry[driver].style.is_query() {
            if partial.is_some() {
                return Err(Error::PartialNotPermitted(name.to_string()));
            }
            if star != Star::None {
                return Err(Error::DefaultsNotPermitted(name.to_string()));
            }
        }

        Ok(LookupType {
            driver,
            partial,
            affix,
            star,
            opts,
        })
    }

    /// Writes the canonical form of this lookup type, which parses
    /// back to an equal value.
    pub fn canonical(&self, registry: &[DriverInfo]) -> String {
        let mut out = String::new();
        if let Some(count) = self.partial {
            out.push_str(&format!("partial{}({})", count, self.affix));
        }
        out.push_str(registry[self.driver].name);
        match self.star {
            Star::None => {}
            Star::Star => out.push('*'),
            Star::StarAt => out.push_str("*@"),
        }
        if let Some(opts) = &self.opts {
            out.push(',');
            out.push_str(opts);
        }
        out
    }
}

/// Splits a raw search argument into `(filename, keyquery)` according
/// to the driver style.
///
/// For single-key types the argument *is* the filename and the
/// separately supplied `key` is the key. For plain query types there
/// is no filename and the argument is the query. For
/// absfile-query types a filename may be supplied as a `file=` option
/// or as a leading `/`-initial token of the query. Leading white space
/// is consumed from the argument first.
pub fn split_args<'a>(
    style: Style,
    key: &'a str,
    raw: &'a str,
    opts: Option<&'a str>,
) -> (Option<&'a str>, &'a str) {
    let query = raw.trim_start();
    match style {
        Style::AbsFileQuery => {
            if let Some(opts) = opts {
                for ele in opts.split(',') {
                    if let Some(path) = ele.strip_prefix("file=") {
                        return (Some(path), query);
                    }
                }
            }
            if query.starts_with('/') {
                let end = query
                    .find(char::is_whitespace)
                    .unwrap_or(query.len());
                let (filename, rest) = query.split_at(end);
                (Some(filename), rest.trim_start())
            } else {
                (None, query)
            }
        }
        Style::SingleKeyFile => (Some(query), key),
        Style::Query => (None, query),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::REGISTRY;

    fn parse(full: &str) -> Result<LookupType> {
        LookupType::parse(REGISTRY, full)
    }

    fn driver_index(name: &str) -> usize {
        find_driver(REGISTRY, name).unwrap()
    }

    ////////////////////////////////////////////////////////////////////
    // NAME RESOLUTION                                                //
    ////////////////////////////////////////////////////////////////////

    #[test]
    fn every_registered_name_resolves_to_itself() {
        for (i, info) in REGISTRY.iter().enumerate() {
            match find_driver(REGISTRY, info.name) {
                Ok(found) => assert_eq!(found, i),
                Err(Error::TypeNotAvailable(name)) => {
                    assert_eq!(name, info.name);
                    assert!(info.driver.is_none());
                }
                Err(e) => panic!("unexpected error for {}: {}", info.name, e),
            }
        }
    }

    #[test]
    fn prefix_collisions_resolve_exactly() {
        // "nis" is a prefix of "nisplus"; "dbm" of "dbmnz". Both the
        // short and the long name must resolve to their own entries.
        assert!(matches!(
            find_driver(REGISTRY, "nis"),
            Err(Error::TypeNotAvailable(n)) if n == "nis",
        ));
        assert!(matches!(
            find_driver(REGISTRY, "nisplus"),
            Err(Error::TypeNotAvailable(n)) if n == "nisplus",
        ));
        assert!(matches!(
            find_driver(REGISTRY, "dbm"),
            Err(Error::TypeNotAvailable(n)) if n == "dbm",
        ));
        assert!(matches!(
            find_driver(REGISTRY, "dbmnz"),
            Err(Error::TypeNotAvailable(n)) if n == "dbmnz",
        ));
    }

    #[test]
    fn unknown_names_are_distinct_from_unavailable_ones() {
        assert!(matches!(
            find_driver(REGISTRY, "nispl"),
            Err(Error::UnknownType(n)) if n == "nispl",
        ));
        assert!(matches!(
            find_driver(REGISTRY, "lsearchx"),
            Err(Error::UnknownType(_)),
        ));
        assert!(matches!(
            find_driver(REGISTRY, ""),
            Err(Error::UnknownType(_)),
        ));
    }

    ////////////////////////////////////////////////////////////////////
    // TYPE PARSING                                                   //
    ////////////////////////////////////////////////////////////////////

    #[test]
    fn plain_name() {
        let lt = parse("lsearch").unwrap();
        assert_eq!(lt.driver, driver_index("lsearch"));
        assert_eq!(lt.partial, None);
        assert_eq!(lt.star, Star::None);
        assert_eq!(lt.opts, None);
    }

    #[test]
    fn partial_with_default_affix() {
        let lt = parse("partial-lsearch").unwrap();
        assert_eq!(lt.partial, Some(2));
        assert_eq!(lt.affix, "*.");
    }

    #[test]
    fn partial_with_count_and_affix() {
        let lt = parse("partial3(*+)lsearch").unwrap();
        assert_eq!(lt.partial, Some(3));
        assert_eq!(lt.affix, "*+");
    }

    #[test]
    fn partial_with_empty_affix() {
        let lt = parse("partial0()lsearch").unwrap();
        assert_eq!(lt.partial, Some(0));
        assert_eq!(lt.affix, "");
    }

    #[test]
    fn star_flags() {
        assert_eq!(parse("lsearch*").unwrap().star, Star::Star);
        assert_eq!(parse("lsearch*@").unwrap().star, Star::StarAt);
        assert_eq!(parse("partial-lsearch*@").unwrap().star, Star::StarAt);
    }

    #[test]
    fn options_are_copied_verbatim() {
        let lt = parse("lsearch,ret=key,cache=no_rd").unwrap();
        assert_eq!(lt.opts.as_deref(), Some("ret=key,cache=no_rd"));

        let lt = parse("lsearch*@,ret=key").unwrap();
        assert_eq!(lt.star, Star::StarAt);
        assert_eq!(lt.opts.as_deref(), Some("ret=key"));
    }

    #[test]
    fn malformed_partials_are_rejected() {
        assert!(matches!(
            parse("partialx(*.)lsearch"),
            Err(Error::BadTypeFormat(_)),
        ));
        assert!(matches!(
            parse("partial(*.lsearch"),
            Err(Error::BadTypeFormat(_)),
        ));
        assert!(matches!(
            parse("partial2lsearch"),
            Err(Error::BadTypeFormat(_)),
        ));
    }

    #[test]
    fn query_styles_reject_partial_and_defaults() {
        assert!(matches!(
            parse("partial-testdb"),
            Err(Error::PartialNotPermitted(n)) if n == "testdb",
        ));
        assert!(matches!(
            parse("testdb*"),
            Err(Error::DefaultsNotPermitted(n)) if n == "testdb",
        ));
        assert!(matches!(
            parse("testdb*@"),
            Err(Error::DefaultsNotPermitted(_)),
        ));
    }

    #[test]
    fn canonical_form_round_trips() {
        for full in [
            "lsearch",
            "partial-lsearch",
            "partial3(*+)lsearch",
            "partial0()lsearch",
            "lsearch*",
            "partial-lsearch*@,ret=key,cache=no_rd",
            "testdb,opt1,opt2",
        ] {
            let lt = parse(full).unwrap();
            let again = parse(&lt.canonical(REGISTRY)).unwrap();
            assert_eq!(lt, again, "round trip failed for {}", full);
        }
    }

    ////////////////////////////////////////////////////////////////////
    // ARGUMENT SPLITTING                                             //
    ////////////////////////////////////////////////////////////////////

    #[test]
    fn single_key_takes_the_argument_as_filename() {
        assert_eq!(
            split_args(Style::SingleKeyFile, "key", "  /etc/aliases", None),
            (Some("/etc/aliases"), "key"),
        );
    }

    #[test]
    fn query_style_passes_the_query_through() {
        assert_eq!(
            split_args(Style::Query, "", " select 1", None),
            (None, "select 1"),
        );
    }

    #[test]
    fn absfile_query_takes_the_file_option_first() {
        assert_eq!(
            split_args(
                Style::AbsFileQuery,
                "",
                "select 1",
                Some("cache=no_rd,file=/tmp/db"),
            ),
            (Some("/tmp/db"), "select 1"),
        );
    }

    #[test]
    fn absfile_query_splits_a_leading_filename_token() {
        assert_eq!(
            split_args(Style::AbsFileQuery, "", " /tmp/db select 1", None),
            (Some("/tmp/db"), "select 1"),
        );
        assert_eq!(
            split_args(Style::AbsFileQuery, "", "select 1", None),
            (None, "select 1"),
        );
        // A filename with no query after it.
        assert_eq!(
            split_args(Style::AbsFileQuery, "", "/tmp/db", None),
            (Some("/tmp/db"), ""),
        );
    }
}
