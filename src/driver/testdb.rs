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

//! The testdb driver: a query-style backend for exercising the
//! dispatcher.
//!
//! The query text controls the outcome:
//!
//! * `fail` misses;
//! * `defer` defers;
//! * `write REST` succeeds and flushes the item cache, the way an SQL
//!   driver does after an UPDATE or INSERT;
//! * `ttl=N REST` succeeds and caches the result for `N` seconds
//!   (fractions accepted);
//! * anything else echoes the query back as the result.
//!
//! The driver also carries a quote hook (single quotes doubled, SQL
//! style) so that the tainted-query quoting policy can be exercised
//! end to end.

use std::any::Any;
use std::time::Duration;

use super::{Answer, Driver, Ttl};

/// The test driver.
pub struct Testdb;

/// Backend state: there is no real connection.
struct TestdbConn;

impl Driver for Testdb {
    fn open(&self, _filename: Option<&str>) -> Result<Box<dyn Any>, String> {
        Ok(Box::new(TestdbConn))
    }

    fn find(
        &self,
        _backend: &mut dyn Any,
        _filename: Option<&str>,
        key: &str,
        _opts: Option<&str>,
        ttl: &mut Ttl,
    ) -> Answer {
        if key == "fail" {
            return Answer::NotFound;
        }
        if key == "defer" {
            return Answer::Defer("testdb lookup deferred".to_string());
        }
        if let Some(rest) = key.strip_prefix("write ") {
            *ttl = Ttl::Flush;
            return Answer::Found(rest.to_string());
        }
        if let Some(rest) = key.strip_prefix("ttl=") {
            let (secs, data) = match rest.split_once(' ') {
                Some((secs, data)) => (secs, data),
                None => (rest, ""),
            };
            match secs.parse::<f64>() {
                Ok(secs) if secs >= 0.0 => {
                    *ttl = Ttl::For(Duration::from_secs_f64(secs));
                    return Answer::Found(data.to_string());
                }
                _ => return Answer::Defer(format!("testdb: bad ttl \"{}\"", secs)),
            }
        }
        Answer::Found(key.to_string())
    }

    fn quote(&self, query: &str) -> Option<String> {
        Some(query.replace('\'', "''"))
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
