// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds the suite/test tree out of an object's descriptor section.

use crate::error::{Error, Result};
use crate::model::{LoadedObject, Suite, Test};
use crate::section::{DescriptorEntry, FnKind, TestObject};
use std::collections::HashMap;
use std::path::Path;

/// Suite name used for tests declared with an empty suite string.
pub const NIL_SUITE: &str = "(nil)";

impl LoadedObject {
    /// Opens a shared object and enumerates its embedded descriptors.
    pub fn load(path: &Path) -> Result<LoadedObject> {
        let handle = TestObject::open_lazy(path)?;
        let entries = handle.entries()?;
        log::debug!(
            "{}: {} descriptor records",
            path.display(),
            entries.len()
        );
        let suites = assemble(&entries)?;
        let resolved_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(LoadedObject {
            path: path.to_path_buf(),
            resolved_path,
            handle,
            suites,
        })
    }
}

fn suite_key(entry: &DescriptorEntry) -> &str {
    if entry.suite.is_empty() {
        NIL_SUITE
    } else {
        &entry.suite
    }
}

/// Two-pass walk over the descriptor records.
///
/// The first pass registers every test record and creates suites as their
/// names first appear; the second pass binds setup and teardown records
/// onto the tests they name. A fixture record whose test was never
/// registered is skipped: it may belong to a test compiled out of this
/// build. A fixture record naming an already filled slot is an error in
/// the test object.
fn assemble(entries: &[DescriptorEntry]) -> Result<Vec<Suite>> {
    let mut suites: Vec<Suite> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for entry in entries.iter().filter(|e| e.kind.is_test()) {
        let key = suite_key(entry);
        let slot = *by_name.entry(key.to_owned()).or_insert_with(|| {
            suites.push(Suite::new(key.to_owned()));
            suites.len() - 1
        });
        if !suites[slot].register(Test::new(entry.name.clone(), entry.index)) {
            log::warn!(
                "duplicate test '{key}:{}' (descriptor {}), keeping the first",
                entry.name,
                entry.index
            );
        }
    }

    for entry in entries {
        let bound = match entry.kind {
            FnKind::Setup | FnKind::Teardown => lookup(&mut suites, &by_name, entry),
            _ => continue,
        };
        match bound {
            Some(test) => {
                let ok = match entry.kind {
                    FnKind::Setup => test.bind_setup(entry.index),
                    _ => test.bind_teardown(entry.index),
                };
                if !ok {
                    return Err(Error::DuplicateBinding {
                        kind: entry.kind,
                        suite: suite_key(entry).to_owned(),
                        test: entry.name.clone(),
                    });
                }
            }
            None => {
                // No such test in this object; the record may pair with a
                // test that was not compiled in.
                log::debug!(
                    "skipping {} record for unknown test '{}:{}'",
                    entry.kind,
                    suite_key(entry),
                    entry.name
                );
            }
        }
    }

    Ok(suites)
}

fn lookup<'a>(
    suites: &'a mut [Suite],
    by_name: &HashMap<String, usize>,
    entry: &DescriptorEntry,
) -> Option<&'a mut Test> {
    let slot = *by_name.get(suite_key(entry))?;
    suites[slot].get_mut(&entry.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, kind: FnKind, suite: &str, name: &str) -> DescriptorEntry {
        DescriptorEntry {
            index,
            kind,
            name: name.to_owned(),
            suite: suite.to_owned(),
        }
    }

    #[test]
    fn pass_one_groups_tests_into_suites() {
        let suites = assemble(&[
            entry(0, FnKind::PlainTest, "foo", "alpha"),
            entry(1, FnKind::PlainTest, "foo", "beta"),
            entry(2, FnKind::PlainTest, "bar", "gamma"),
        ])
        .unwrap();

        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].name(), "foo");
        assert_eq!(suites[0].len(), 2);
        assert_eq!(suites[1].name(), "bar");
        assert_eq!(suites[1].len(), 1);
        let alpha = suites[0].tests().next().unwrap();
        assert_eq!(alpha.function(), 0);
        assert!(alpha.setup().is_none());
    }

    #[test]
    fn pass_two_binds_fixtures_by_suite_and_name() {
        let mut suites = assemble(&[
            entry(0, FnKind::Setup, "foo", "fixtured"),
            entry(1, FnKind::Teardown, "foo", "fixtured"),
            entry(2, FnKind::FixturedTest, "foo", "fixtured"),
        ])
        .unwrap();

        let test = suites[0].get_mut("fixtured").unwrap();
        assert_eq!(test.function(), 2);
        assert_eq!(test.setup(), Some(0));
        assert_eq!(test.teardown(), Some(1));
    }

    #[test]
    fn empty_suite_name_uses_nil_sentinel() {
        let suites = assemble(&[entry(0, FnKind::PlainTest, "", "loner")]).unwrap();
        assert_eq!(suites[0].name(), NIL_SUITE);
    }

    #[test]
    fn orphan_fixture_records_are_skipped() {
        let suites = assemble(&[
            entry(0, FnKind::PlainTest, "foo", "alpha"),
            entry(1, FnKind::Setup, "foo", "missing"),
            entry(2, FnKind::Teardown, "other", "alpha"),
        ])
        .unwrap();
        assert_eq!(suites.len(), 1);
        let alpha = suites[0].tests().next().unwrap();
        assert!(alpha.setup().is_none());
        assert!(alpha.teardown().is_none());
    }

    #[test]
    fn rebinding_a_fixture_slot_fails() {
        let err = assemble(&[
            entry(0, FnKind::FixturedTest, "foo", "fixtured"),
            entry(1, FnKind::Setup, "foo", "fixtured"),
            entry(2, FnKind::Setup, "foo", "fixtured"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateBinding {
                kind: FnKind::Setup,
                ..
            }
        ));
    }

    #[test]
    fn suite_count_matches_test_records() {
        let entries = [
            entry(0, FnKind::PlainTest, "foo", "a"),
            entry(1, FnKind::Setup, "foo", "a"),
            entry(2, FnKind::Teardown, "foo", "a"),
            entry(3, FnKind::FixturedTest, "foo", "b"),
            entry(4, FnKind::PlainTest, "foo", "c"),
        ];
        let suites = assemble(&entries).unwrap();
        let test_records = entries.iter().filter(|e| e.kind.is_test()).count();
        assert_eq!(suites[0].len(), test_records);
    }
}
