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

//! The lsearch driver: linear search of a text file.
//!
//! The file consists of entries, one key each. A key starts at the
//! beginning of a line and is terminated by a colon or white space; a
//! key containing either must be written inside double quotes, within
//! which backslash escapes (`\n`, `\t`, and `\X` for a literal `X`)
//! are honoured. The data is the remainder of the line, after an
//! optional colon and surrounding white space, and continues onto
//! subsequent lines that begin with white space. Blank lines and lines
//! beginning with `#` are ignored. Key comparison is
//! ASCII-case-insensitive.
//!
//! The open file handle is held by the handle cache and rewound for
//! every lookup, so one open serves many finds.

use std::any::Any;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use super::{check_file, Answer, Driver, Ttl};

/// The linear-search file driver.
pub struct Lsearch;

/// Backend state: the open file. Dropping it closes the file.
struct LsearchFile {
    file: File,
}

impl Driver for Lsearch {
    fn open(&self, filename: Option<&str>) -> Result<Box<dyn Any>, String> {
        let filename = filename.ok_or_else(|| "lsearch requires a filename".to_string())?;
        match File::open(filename) {
            Ok(file) => Ok(Box::new(LsearchFile { file })),
            Err(e) => Err(format!("failed to open {}: {}", filename, e)),
        }
    }

    fn check(
        &self,
        backend: &dyn Any,
        filename: Option<&str>,
        modemask: u32,
        owners: &[u32],
        groups: &[u32],
    ) -> Result<(), String> {
        let filename = filename.unwrap_or("<none>");
        let state = backend
            .downcast_ref::<LsearchFile>()
            .ok_or_else(|| format!("lsearch: backend state mismatch for {}", filename))?;
        let metadata = state
            .file
            .metadata()
            .map_err(|e| format!("failed to stat {}: {}", filename, e))?;
        if !metadata.is_file() {
            return Err(format!("{}: not a regular file", filename));
        }
        check_file(&metadata, filename, modemask, owners, groups)
    }

    fn find(
        &self,
        backend: &mut dyn Any,
        _filename: Option<&str>,
        key: &str,
        _opts: Option<&str>,
        _ttl: &mut Ttl,
    ) -> Answer {
        let state = match backend.downcast_mut::<LsearchFile>() {
            Some(state) => state,
            None => return Answer::Defer("lsearch: backend state mismatch".to_string()),
        };
        if let Err(e) = state.file.seek(SeekFrom::Start(0)) {
            return Answer::Defer(format!("lsearch: seek failed: {}", e));
        }

        let reader = BufReader::new(&state.file);
        let mut found: Option<String> = None;
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Answer::Defer(format!("lsearch: read failed: {}", e)),
            };
            if let Some(data) = found.as_mut() {
                // Collect continuation lines of the matched entry.
                if line.starts_with(' ') || line.starts_with('\t') {
                    data.push('\n');
                    data.push_str(line.trim_start());
                    continue;
                }
                break;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of an entry we did not match.
                continue;
            }
            if let Some((entry_key, data)) = split_entry(&line) {
                if entry_key.eq_ignore_ascii_case(key) {
                    found = Some(data.to_string());
                }
            }
        }
        match found {
            Some(data) => Answer::Found(data),
            None => Answer::NotFound,
        }
    }
}

/// Splits an entry line into its key and the start of its data.
/// Returns `None` if a quoted key has no closing quote.
fn split_entry(line: &str) -> Option<(String, &str)> {
    let (key, rest) = if let Some(quoted) = line.strip_prefix('"') {
        let mut key = String::new();
        let mut end = None;
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    end = Some(i + 1);
                    break;
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => key.push('\n'),
                    Some((_, 't')) => key.push('\t'),
                    Some((_, other)) => key.push(other),
                    None => return None,
                },
                other => key.push(other),
            }
        }
        (key, &quoted[end?..])
    } else {
        let end = line
            .find(|c: char| c == ':' || c.is_whitespace())
            .unwrap_or(line.len());
        (line[..end].to_string(), &line[end..])
    };

    // Data begins after optional white space, one optional colon, and
    // more optional white space.
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
    Some((key, rest))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
