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

//! almanacq: command-line lookups through the dispatcher.
//!
//! The lookup type (or a named table from a configuration file), the
//! filename for single-key types, and one or more keys are given on
//! the command line; each key is resolved through a shared dispatcher
//! context, so repeated keys exercise the caches the way a real call
//! site would. Set `RUST_LOG=debug` to watch the dispatcher work.

mod args;
mod config;

use std::process;

use anyhow::{anyhow, Result};
use clap::Parser;
use env_logger::Env;
use log::error;

use almanac::driver::Style;
use almanac::search::{split_args, LookupType, Params, Search};
use almanac::taint::{Text, TextBuf};

use crate::args::Args;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut search = Search::new(Params {
        open_max: args.open_max,
        quote_policy: args.quote_policy.into(),
    });

    // Resolve the lookup type and (for single-key types) the filename,
    // either from a named table or from the leading words.
    let mut words = args.words.clone();
    let (type_string, mut filename) = match &args.table {
        Some(name) => {
            // clap guarantees --config alongside --table.
            let path = args.config.as_deref().ok_or_else(|| anyhow!("--table requires --config"))?;
            let config = config::load(path)?;
            let table = config
                .tables
                .get(name)
                .ok_or_else(|| anyhow!("no table named \"{}\" in {}", name, path.display()))?;
            (table.lookup.clone(), table.file.clone())
        }
        None => (words.remove(0), None),
    };

    let lookup_type = search.parse_type(&type_string)?;
    let style = search.registry()[lookup_type.driver].style;
    if style == Style::SingleKeyFile && filename.is_none() {
        if words.is_empty() {
            return Err(anyhow!("\"{}\" needs a filename", type_string));
        }
        filename = Some(words.remove(0));
    }
    if words.is_empty() {
        return Err(anyhow!("at least one key is required"));
    }

    for word in &words {
        // Single-key types look the word up in the filename; query
        // styles treat each word as a query of its own.
        let raw = match style {
            Style::SingleKeyFile => filename.as_deref().unwrap_or(word),
            _ => word.as_str(),
        };
        let (file, keyquery) = split_args(style, word, raw, lookup_type.opts.as_deref());
        query(&mut search, &lookup_type, file, keyquery, args.tainted)?;
    }

    search.tidy();
    Ok(())
}

/// Runs one lookup and prints the outcome.
fn query(
    search: &mut Search,
    lookup_type: &LookupType,
    filename: Option<&str>,
    key: &str,
    tainted: bool,
) -> Result<()> {
    let key_text = if tainted {
        Text::tainted(key)
    } else {
        Text::clean(key)
    };
    let file_text = filename.map(Text::clean);

    let handle = search.open(lookup_type.driver, file_text.as_ref(), 0, &[], &[])?;
    let mut vars: Vec<TextBuf> = Vec::new();
    match search.find(
        handle,
        filename,
        &key_text,
        lookup_type.partial,
        &lookup_type.affix,
        lookup_type.star,
        Some(&mut vars),
        lookup_type.opts.as_deref(),
    ) {
        Ok(Some(data)) => {
            println!("{}: {}", key, data);
            for (i, var) in vars.iter().enumerate() {
                println!("  ${} = \"{}\"", i + 1, var);
            }
            Ok(())
        }
        Ok(None) => {
            println!("{}: no match", key);
            Ok(())
        }
        Err(e) if e.is_defer() => {
            println!("{}: deferred ({})", key, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
