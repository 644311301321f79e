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

//! The dsearch driver: looks up a key as a filename in a directory.
//!
//! The "file" given to open is a directory. A find succeeds when the
//! directory contains an entry named by the key; the yield is the key
//! itself, or the full path with the `ret=full` option. The
//! `filter=file`, `filter=dir`, and `filter=subdir` options restrict
//! the kind of entry that matches. Keys containing `/`, and the
//! special names `.` and `..`, never match: the key is untrusted and
//! must not escape the directory.

use std::any::Any;
use std::fs;
use std::path::Path;

use super::{check_file, Answer, Driver, Ttl};

/// The directory-entry driver.
pub struct Dsearch;

/// Backend state. The directory is re-examined on every find using
/// the stored path, so nothing is held open.
struct DsearchDir;

/// What kind of directory entry a find accepts.
#[derive(Clone, Copy, Eq, PartialEq)]
enum Filter {
    Any,
    File,
    Dir,
}

impl Driver for Dsearch {
    fn open(&self, filename: Option<&str>) -> Result<Box<dyn Any>, String> {
        let filename = filename.ok_or_else(|| "dsearch requires a directory name".to_string())?;
        match fs::metadata(filename) {
            Ok(metadata) if metadata.is_dir() => Ok(Box::new(DsearchDir)),
            Ok(_) => Err(format!("{}: not a directory", filename)),
            Err(e) => Err(format!("failed to open directory {}: {}", filename, e)),
        }
    }

    fn check(
        &self,
        _backend: &dyn Any,
        filename: Option<&str>,
        modemask: u32,
        owners: &[u32],
        groups: &[u32],
    ) -> Result<(), String> {
        let filename = filename.unwrap_or("<none>");
        let metadata =
            fs::metadata(filename).map_err(|e| format!("failed to stat {}: {}", filename, e))?;
        check_file(&metadata, filename, modemask, owners, groups)
    }

    fn find(
        &self,
        _backend: &mut dyn Any,
        filename: Option<&str>,
        key: &str,
        opts: Option<&str>,
        _ttl: &mut Ttl,
    ) -> Answer {
        let dir = match filename {
            Some(dir) => dir,
            None => return Answer::Defer("dsearch: no directory name".to_string()),
        };
        if key.contains('/') || key == "." || key == ".." || key.is_empty() {
            return Answer::NotFound;
        }

        let mut full = false;
        let mut filter = Filter::Any;
        if let Some(opts) = opts {
            for ele in opts.split(',') {
                match ele {
                    "ret=full" => full = true,
                    "filter=file" => filter = Filter::File,
                    "filter=dir" | "filter=subdir" => filter = Filter::Dir,
                    _ => {
                        return Answer::Defer(format!("dsearch: unknown option \"{}\"", ele));
                    }
                }
            }
        }

        let path = Path::new(dir).join(key);
        let matched = match fs::symlink_metadata(&path) {
            Ok(metadata) => match filter {
                Filter::Any => true,
                Filter::File => metadata.is_file(),
                Filter::Dir => metadata.is_dir(),
            },
            Err(_) => false,
        };
        if !matched {
            return Answer::NotFound;
        }
        if full {
            Answer::Found(path.to_string_lossy().into_owned())
        } else {
            Answer::Found(key.to_string())
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use lazy_static::lazy_static;

    use super::*;

    lazy_static! {
        static ref FIXTURE_DIR: PathBuf = {
            let mut path = std::env::temp_dir();
            path.push(format!("almanac-dsearch-fixture-{}", std::process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir(&path).unwrap();
            fs::write(path.join("present"), b"x").unwrap();
            fs::create_dir(path.join("subdir")).unwrap();
            path
        };
    }

    fn lookup(key: &str, opts: Option<&str>) -> Answer {
        let driver = Dsearch;
        let dir = FIXTURE_DIR.to_str().unwrap();
        let mut backend = driver.open(Some(dir)).unwrap();
        let mut ttl = Ttl::Forever;
        driver.find(backend.as_mut(), Some(dir), key, opts, &mut ttl)
    }

    #[test]
    fn entry_present() {
        assert_eq!(lookup("present", None), Answer::Found("present".to_string()));
    }

    #[test]
    fn entry_absent() {
        assert_eq!(lookup("absent", None), Answer::NotFound);
    }

    #[test]
    fn keys_may_not_escape_the_directory() {
        assert_eq!(lookup("../present", None), Answer::NotFound);
        assert_eq!(lookup(".", None), Answer::NotFound);
        assert_eq!(lookup("..", None), Answer::NotFound);
    }

    #[test]
    fn ret_full_returns_the_path() {
        let expected = FIXTURE_DIR.join("present").to_string_lossy().into_owned();
        assert_eq!(lookup("present", Some("ret=full")), Answer::Found(expected));
    }

    #[test]
    fn filters_restrict_the_entry_kind() {
        assert_eq!(lookup("present", Some("filter=dir")), Answer::NotFound);
        assert_eq!(
            lookup("subdir", Some("filter=dir")),
            Answer::Found("subdir".to_string()),
        );
        assert_eq!(
            lookup("present", Some("filter=file")),
            Answer::Found("present".to_string()),
        );
    }

    #[test]
    fn open_rejects_non_directories() {
        let file = FIXTURE_DIR.join("present");
        let err = Dsearch.open(Some(file.to_str().unwrap())).unwrap_err();
        assert!(err.contains("not a directory"));
    }
}
