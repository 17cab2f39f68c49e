// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The object → suite → test tree the harness operates on.
//!
//! Containers own their children outright; name lookup goes through a
//! side index over insertion-ordered vectors, so there are no parent
//! pointers and teardown is a plain drop.

use crate::record::{PhaseResult, PHASE_COUNT};
use crate::section::TestObject;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// One captured line of test output. Tests may write arbitrary bytes;
/// the line is kept as written and only rendered lossily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine(Vec<u8>);

impl LogLine {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for LogLine {
    fn from(line: &str) -> Self {
        LogLine(line.as_bytes().to_vec())
    }
}

/// Ordered log of one test run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Log {
    lines: Vec<LogLine>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<LogLine>) {
        self.lines.push(line.into());
    }

    /// Splits a drained pipe buffer into lines on LF, CR and NUL and
    /// appends every non-empty segment.
    pub fn extend_from_buffer(&mut self, buffer: &[u8]) {
        for segment in buffer.split(|byte| matches!(byte, b'\n' | b'\r' | 0)) {
            if !segment.is_empty() {
                self.lines.push(LogLine(segment.to_vec()));
            }
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Resource usage of one reaped runner process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    /// Peak resident set size, in kibibytes.
    pub max_rss_kib: i64,
}

impl From<libc::rusage> for ResourceUsage {
    fn from(ru: libc::rusage) -> Self {
        fn duration(tv: libc::timeval) -> Duration {
            Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
        }
        ResourceUsage {
            user_time: duration(ru.ru_utime),
            system_time: duration(ru.ru_stime),
            max_rss_kib: ru.ru_maxrss,
        }
    }
}

/// One embedded test: the callable's descriptor index, the optional
/// fixture indices, and everything its last run produced.
#[derive(Debug)]
pub struct Test {
    name: String,
    function: usize,
    setup: Option<usize>,
    teardown: Option<usize>,
    pub(crate) results: [PhaseResult; PHASE_COUNT],
    pub(crate) rusage: Option<ResourceUsage>,
    pub(crate) log: Log,
}

impl Test {
    pub(crate) fn new(name: String, function: usize) -> Self {
        Test {
            name,
            function,
            setup: None,
            teardown: None,
            results: [PhaseResult::None; PHASE_COUNT],
            rusage: None,
            log: Log::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self) -> usize {
        self.function
    }

    pub fn setup(&self) -> Option<usize> {
        self.setup
    }

    pub fn teardown(&self) -> Option<usize> {
        self.teardown
    }

    pub(crate) fn bind_setup(&mut self, index: usize) -> bool {
        if self.setup.is_some() {
            return false;
        }
        self.setup = Some(index);
        true
    }

    pub(crate) fn bind_teardown(&mut self, index: usize) -> bool {
        if self.teardown.is_some() {
            return false;
        }
        self.teardown = Some(index);
        true
    }

    pub fn results(&self) -> &[PhaseResult; PHASE_COUNT] {
        &self.results
    }

    pub fn rusage(&self) -> Option<&ResourceUsage> {
        self.rusage.as_ref()
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Worst phase outcome; how the test is classified in the report.
    pub fn worst(&self) -> PhaseResult {
        self.results.iter().copied().max().unwrap_or_default()
    }

    pub fn was_run(&self) -> bool {
        self.worst().is_run()
    }
}

/// All tests sharing one suite name.
#[derive(Debug, Default)]
pub struct Suite {
    name: String,
    tests: Vec<Test>,
    by_name: HashMap<String, usize>,
}

impl Suite {
    pub(crate) fn new(name: String) -> Self {
        Suite {
            name,
            tests: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a test; a second test with the same name is rejected.
    pub(crate) fn register(&mut self, test: Test) -> bool {
        if self.by_name.contains_key(test.name()) {
            return false;
        }
        self.by_name.insert(test.name().to_owned(), self.tests.len());
        self.tests.push(test);
        true
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Test> {
        let index = *self.by_name.get(name)?;
        self.tests.get_mut(index)
    }

    pub fn tests(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }

    pub(crate) fn tests_mut(&mut self) -> impl Iterator<Item = &mut Test> {
        self.tests.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// One dlopened shared object and the suites discovered inside it.
///
/// The loader handle is kept for the object's whole lifetime: it pins the
/// mapping, so descriptor indexes stay valid until the object is dropped.
pub struct LoadedObject {
    pub(crate) path: PathBuf,
    pub(crate) resolved_path: PathBuf,
    #[allow(dead_code)]
    pub(crate) handle: TestObject,
    pub(crate) suites: Vec<Suite>,
}

impl std::fmt::Debug for LoadedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedObject")
            .field("path", &self.path)
            .field("resolved_path", &self.resolved_path)
            .field("suites", &self.suites)
            .finish()
    }
}

impl LoadedObject {
    /// The path the object was loaded from, as given.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// The absolute path handed to runner children.
    pub fn resolved_path(&self) -> &std::path::Path {
        &self.resolved_path
    }

    pub fn suites(&self) -> impl Iterator<Item = &Suite> {
        self.suites.iter()
    }

    pub(crate) fn suites_mut(&mut self) -> impl Iterator<Item = &mut Suite> {
        self.suites.iter_mut()
    }
}
