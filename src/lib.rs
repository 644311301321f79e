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

//! A generic lookup dispatcher and cache for mail transport agents.
//!
//! Configuration and ACL engines in a mail transport agent resolve a
//! great many strings through external data sources: flat files,
//! indexed key-value files, SQL engines, network directories. This
//! crate sits between those call sites and a pluggable set of lookup
//! drivers, providing:
//!
//! * name resolution from a textual lookup-type name to a driver (see
//!   [`search::find_driver`] and the [`driver`] module);
//! * a two-level cache: open backend resources are cached per
//!   `(driver, resource)` in a handle cache, and each handle carries an
//!   item cache of previous results (see [`search::Search`]);
//! * bounded resource usage for drivers that hold real files open,
//!   enforced by an LRU eviction chain;
//! * a partial-match / wildcard protocol for hierarchical (dotted)
//!   keys, plus the `*@` and `*` default rules (see
//!   [`search::Search::find`]);
//! * parsing of the decorated lookup-type syntax used by call sites,
//!   e.g. `partial2(*.)lsearch*@,ret=key` (see
//!   [`search::LookupType`]).
//!
//! Strings that cross the trust boundary carry a taint marker; see the
//! [`taint`] module. The dispatcher refuses tainted filenames and
//! polices the quoting of tainted queries.
//!
//! The dispatcher is single-threaded by design: each worker process
//! owns one [`search::Search`] context and all state lives inside it.

pub mod driver;
pub mod search;
pub mod taint;
