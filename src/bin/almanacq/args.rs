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

//! Command-line argument handling.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use almanac::search::QuotePolicy;

/// Performs lookups through the dispatcher from the command line.
#[derive(Parser)]
#[command(name = "almanacq", version, about)]
pub struct Args {
    /// TOML configuration file defining named lookup tables
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use a named lookup table from the configuration file
    #[arg(short, long, requires = "config")]
    pub table: Option<String>,

    /// Maximum number of file-backed lookups held open at once
    #[arg(long, default_value_t = 25)]
    pub open_max: usize,

    /// Policy for tainted queries that are not quoted for their driver
    #[arg(long, value_enum, default_value = "defer")]
    pub quote_policy: QuoteArg,

    /// Treat the keys as untrusted (tainted) input
    #[arg(long)]
    pub tainted: bool,

    /// The lookup type (omitted with --table), then the filename for
    /// single-key types, then the keys or queries
    #[arg(required = true)]
    pub words: Vec<String>,
}

/// Command-line spelling of [`QuotePolicy`].
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum QuoteArg {
    Warn,
    Defer,
}

impl From<QuoteArg> for QuotePolicy {
    fn from(arg: QuoteArg) -> Self {
        match arg {
            QuoteArg::Warn => QuotePolicy::Warn,
            QuoteArg::Defer => QuotePolicy::Defer,
        }
    }
}
