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

//! Implements the configuration file: a table of named lookups.
//!
//! ```toml
//! [tables.aliases]
//! lookup = "partial-lsearch*@"
//! file = "/etc/aliases"
//!
//! [tables.hosts]
//! lookup = "testdb"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tables: HashMap<String, Table>,
}

/// One named lookup table.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Table {
    /// The decorated lookup type string.
    pub lookup: String,
    /// The filename, for single-key lookup types.
    pub file: Option<String>,
}

/// Loads the configuration from the file given by `path`.
pub fn load(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read the configuration file {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse the configuration file {}", path.display()))
}
