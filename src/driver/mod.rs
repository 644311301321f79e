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

//! Lookup drivers and the driver registry.
//!
//! A driver is a thin adapter over an external data source: a flat
//! file, an indexed key-value file, a network directory, an SQL
//! engine. The dispatcher (see the [`search`](crate::search) module)
//! never talks to a backend directly; it resolves a textual type name
//! to a [`DriverInfo`] entry in the [`REGISTRY`] and works through the
//! [`Driver`] hooks.
//!
//! The registry is a static table sorted by name so that name
//! resolution can binary-search it. An entry whose `driver` field is
//! `None` describes a type name that is recognized but whose driver is
//! not built into this binary; resolving such a name produces an error
//! distinct from an unknown name.
//!
//! Backend state returned by [`Driver::open`] is owned by the handle
//! cache as a `Box<dyn Any>`; each driver downcasts it back in its
//! other hooks. Dropping the box closes the backend, so drivers that
//! hold real resources implement [`Drop`] on their state types.

use std::any::Any;
use std::time::Duration;

pub mod dsearch;
pub mod lsearch;
pub mod testdb;

/// How a lookup of this type is addressed by call sites.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Style {
    /// Identified by `(driver, filename, key)`: a single key looked up
    /// in a file, e.g. a linear search or an indexed key-value file.
    SingleKeyFile,
    /// Identified by `(driver, query)`: a self-contained query string
    /// and no filename, e.g. an SQL statement.
    Query,
    /// Query-style, but the query may carry a leading filename (either
    /// a `file=` option or a `/`-initial token).
    AbsFileQuery,
}

impl Style {
    /// Returns whether this is a query style. Partial matching and the
    /// `*`/`*@` defaults are not permitted for query styles.
    pub fn is_query(self) -> bool {
        matches!(self, Style::Query | Style::AbsFileQuery)
    }
}

/// A driver's answer to one [`Driver::find`] invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Answer {
    /// The key matched and produced this payload.
    Found(String),
    /// The key is not present. The dispatcher may cache the miss.
    NotFound,
    /// The backend could not answer just now; the lookup should be
    /// retried later. Never cached.
    Defer(String),
}

/// Cache lifetime for one result, passed in-out through
/// [`Driver::find`].
///
/// The dispatcher initializes the value to [`Ttl::Forever`]; the
/// driver may lower it, or set [`Ttl::Flush`] after an operation that
/// invalidated its earlier answers (e.g. an SQL write).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ttl {
    /// Cache until the next tidy.
    Forever,
    /// Cache for a bounded time.
    For(Duration),
    /// Forget every cached result for this handle, including this one.
    Flush,
}

/// The hooks a lookup driver provides to the dispatcher.
///
/// Only `open` and `find` are mandatory. Presence of a `quote`
/// implementation (returning `Some`) advertises quoting support, which
/// in turn makes the dispatcher police tainted queries for this
/// driver.
pub trait Driver: Sync {
    /// Opens the backend resource. `filename` is `None` for query
    /// styles. The returned state is held in the handle cache until it
    /// is evicted or tidied away; dropping it closes the backend.
    fn open(&self, filename: Option<&str>) -> Result<Box<dyn Any>, String>;

    /// Validates mode and ownership of the opened resource. Only
    /// meaningful for drivers that read real files; the default
    /// accepts everything.
    fn check(
        &self,
        _backend: &dyn Any,
        _filename: Option<&str>,
        _modemask: u32,
        _owners: &[u32],
        _groups: &[u32],
    ) -> Result<(), String> {
        Ok(())
    }

    /// Performs one lookup. `ttl` arrives as [`Ttl::Forever`] and may
    /// be lowered.
    fn find(
        &self,
        backend: &mut dyn Any,
        filename: Option<&str>,
        key: &str,
        opts: Option<&str>,
        ttl: &mut Ttl,
    ) -> Answer;

    /// Process-wide cleanup, run once from tidy.
    fn tidy(&self) {}

    /// Quotes `query` for this backend's syntax, or `None` if the
    /// driver has no quoting convention.
    fn quote(&self, _query: &str) -> Option<String> {
        None
    }
}

/// A registry entry describing one lookup type.
pub struct DriverInfo<'d> {
    /// The textual type name used by call sites.
    pub name: &'d str,
    /// How lookups of this type are addressed.
    pub style: Style,
    /// Whether the backend holds a real open file, and therefore
    /// belongs on the LRU chain and counts against the open-file cap.
    pub file_backed: bool,
    /// `None` when the type name is recognized but the driver is not
    /// built into this binary.
    pub driver: Option<&'d dyn Driver>,
}

static DSEARCH: dsearch::Dsearch = dsearch::Dsearch;
static LSEARCH: lsearch::Lsearch = lsearch::Lsearch;
static TESTDB: testdb::Testdb = testdb::Testdb;

/// The driver registry. Sorted by name: name resolution binary-searches
/// this table.
pub static REGISTRY: &[DriverInfo<'static>] = &[
    DriverInfo {
        name: "cdb",
        style: Style::SingleKeyFile,
        file_backed: true,
        driver: None,
    },
    DriverInfo {
        name: "dbm",
        style: Style::SingleKeyFile,
        file_backed: true,
        driver: None,
    },
    DriverInfo {
        name: "dbmnz",
        style: Style::SingleKeyFile,
        file_backed: true,
        driver: None,
    },
    DriverInfo {
        name: "dnsdb",
        style: Style::Query,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "dsearch",
        style: Style::SingleKeyFile,
        file_backed: true,
        driver: Some(&DSEARCH),
    },
    DriverInfo {
        name: "lsearch",
        style: Style::SingleKeyFile,
        file_backed: true,
        driver: Some(&LSEARCH),
    },
    DriverInfo {
        name: "mysql",
        style: Style::Query,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "nis",
        style: Style::SingleKeyFile,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "nisplus",
        style: Style::Query,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "pgsql",
        style: Style::Query,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "sqlite",
        style: Style::AbsFileQuery,
        file_backed: false,
        driver: None,
    },
    DriverInfo {
        name: "testdb",
        style: Style::Query,
        file_backed: false,
        driver: Some(&TESTDB),
    },
];

/// Checks the mode and ownership of an opened file against the
/// constraints handed to the open protocol. `modemask` gives mode bits
/// that must *not* be set; empty `owners`/`groups` lists accept any
/// owner or group.
#[cfg(unix)]
pub(crate) fn check_file(
    metadata: &std::fs::Metadata,
    filename: &str,
    modemask: u32,
    owners: &[u32],
    groups: &[u32],
) -> Result<(), String> {
    use std::os::unix::fs::MetadataExt;

    let mode = metadata.mode() & 0o7777;
    if mode & modemask != 0 {
        return Err(format!(
            "{}: file mode {:04o} includes forbidden bits ({:04o})",
            filename,
            mode,
            mode & modemask
        ));
    }
    if !owners.is_empty() && !owners.contains(&metadata.uid()) {
        return Err(format!(
            "{}: file has wrong owner (uid {})",
            filename,
            metadata.uid()
        ));
    }
    if !groups.is_empty() && !groups.contains(&metadata.gid()) {
        return Err(format!(
            "{}: file has wrong group (gid {})",
            filename,
            metadata.gid()
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn check_file(
    _metadata: &std::fs::Metadata,
    _filename: &str,
    _modemask: u32,
    _owners: &[u32],
    _groups: &[u32],
) -> Result<(), String> {
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted_by_name() {
        // Name resolution binary-searches the table, so this ordering
        // is load-bearing.
        assert!(REGISTRY.windows(2).all(|w| w[0].name < w[1].name));
    }

    #[test]
    fn query_styles_are_query_styles() {
        assert!(Style::Query.is_query());
        assert!(Style::AbsFileQuery.is_query());
        assert!(!Style::SingleKeyFile.is_query());
    }
}
