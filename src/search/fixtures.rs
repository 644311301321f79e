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

//! Instrumented test drivers for exercising the dispatcher.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{Answer, Driver, DriverInfo, Style, Ttl};

/// A single-key driver over a fixed in-memory table, counting hook
/// invocations. It claims to be file-backed so that the LRU chain can
/// be exercised without touching the filesystem.
pub(crate) struct MapDriver {
    rows: Vec<(&'static str, &'static str)>,
    check_error: Option<&'static str>,
    pub opens: AtomicUsize,
    pub finds: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub tidies: AtomicUsize,
}

/// Backend state for [`MapDriver`]; counts its own drops so tests can
/// observe closes.
struct MapConn {
    closes: Arc<AtomicUsize>,
}

impl Drop for MapConn {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl MapDriver {
    pub fn new(rows: &[(&'static str, &'static str)]) -> Self {
        Self {
            rows: rows.to_vec(),
            check_error: None,
            opens: AtomicUsize::new(0),
            finds: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            tidies: AtomicUsize::new(0),
        }
    }

    /// Makes the check hook reject every open with `message`.
    pub fn failing_check(mut self, message: &'static str) -> Self {
        self.check_error = Some(message);
        self
    }

    /// Builds a registry entry for this driver.
    pub fn info<'d>(&'d self, name: &'d str) -> DriverInfo<'d> {
        DriverInfo {
            name,
            style: Style::SingleKeyFile,
            file_backed: true,
            driver: Some(self),
        }
    }
}

impl Driver for MapDriver {
    fn open(&self, _filename: Option<&str>) -> Result<Box<dyn Any>, String> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MapConn {
            closes: self.closes.clone(),
        }))
    }

    fn check(
        &self,
        _backend: &dyn Any,
        _filename: Option<&str>,
        _modemask: u32,
        _owners: &[u32],
        _groups: &[u32],
    ) -> Result<(), String> {
        match self.check_error {
            Some(message) => Err(message.to_string()),
            None => Ok(()),
        }
    }

    fn find(
        &self,
        _backend: &mut dyn Any,
        _filename: Option<&str>,
        key: &str,
        _opts: Option<&str>,
        _ttl: &mut Ttl,
    ) -> Answer {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if key == "defer" {
            return Answer::Defer("map lookup deferred".to_string());
        }
        match self.rows.iter().find(|(k, _)| *k == key) {
            Some((_, data)) => Answer::Found(data.to_string()),
            None => Answer::NotFound,
        }
    }

    fn tidy(&self) {
        self.tidies.fetch_add(1, Ordering::SeqCst);
    }
}

/// A query-style driver whose query text scripts its behaviour, with
/// call counting and a quote hook. TTLs are given in milliseconds so
/// expiry tests stay fast.
pub(crate) struct ScriptDriver {
    pub finds: AtomicUsize,
}

struct ScriptConn;

impl ScriptDriver {
    pub fn new() -> Self {
        Self {
            finds: AtomicUsize::new(0),
        }
    }

    /// Builds a registry entry for this driver.
    pub fn info<'d>(&'d self, name: &'d str) -> DriverInfo<'d> {
        DriverInfo {
            name,
            style: Style::Query,
            file_backed: false,
            driver: Some(self),
        }
    }
}

impl Driver for ScriptDriver {
    fn open(&self, _filename: Option<&str>) -> Result<Box<dyn Any>, String> {
        Ok(Box::new(ScriptConn))
    }

    fn find(
        &self,
        _backend: &mut dyn Any,
        _filename: Option<&str>,
        key: &str,
        _opts: Option<&str>,
        ttl: &mut Ttl,
    ) -> Answer {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if key == "defer" {
            return Answer::Defer("script lookup deferred".to_string());
        }
        if key == "fail" {
            return Answer::NotFound;
        }
        if let Some(rest) = key.strip_prefix("write ") {
            *ttl = Ttl::Flush;
            return Answer::Found(rest.to_string());
        }
        if let Some(rest) = key.strip_prefix("ttl=") {
            let (millis, data) = rest.split_once(' ').unwrap_or((rest, ""));
            let millis: u64 = millis.parse().unwrap();
            *ttl = Ttl::For(Duration::from_millis(millis));
            return Answer::Found(data.to_string());
        }
        Answer::Found(format!("answer:{}", key))
    }

    fn quote(&self, query: &str) -> Option<String> {
        Some(query.replace('\'', "''"))
    }
}
