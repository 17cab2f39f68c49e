// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The butcher itself: owns the loaded objects and drives the run.

use crate::chopper::{self, ChopConfig};
use crate::error::{Error, Result};
use crate::model::LoadedObject;
use crate::record::{PhaseResult, PHASE_COUNT};
use crate::report;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Display and runner-forwarding switches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// Show every test and its resource usage, not just the unhappy ones.
    pub verbose: bool,
    /// Accepted for interface parity; descriptor records carry no
    /// description strings to show.
    pub descriptions: bool,
    /// Show captured log lines for successful tests too.
    pub messages: bool,
    /// Have runners dump their environment before running.
    pub envdump: bool,
    /// Colorize the report.
    pub color: bool,
}

/// Harness root. Load objects into it, then chop and report.
///
/// ```no_run
/// # fn main() -> butcher::Result<()> {
/// let sink = Box::new(std::io::stdout());
/// let mut butcher = butcher::Butcher::new("./bexec".into(), sink, None, Some("^smoke"))?;
/// butcher.load(std::path::Path::new("./libfoo.so"))?;
/// butcher.chop()?;
/// let exit = butcher.report()?;
/// # let _ = exit;
/// # Ok(())
/// # }
/// ```
pub struct Butcher {
    bexec: PathBuf,
    sink: Box<dyn Write>,
    suite_filter: Regex,
    test_filter: Regex,
    debugger: Option<Vec<String>>,
    flags: Flags,
    objects: Vec<LoadedObject>,
}

impl std::fmt::Debug for Butcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Butcher")
            .field("bexec", &self.bexec)
            .field("suite_filter", &self.suite_filter)
            .field("test_filter", &self.test_filter)
            .field("debugger", &self.debugger)
            .field("flags", &self.flags)
            .field("objects", &self.objects)
            .finish()
    }
}

impl Butcher {
    /// A missing match pattern selects everything.
    pub fn new(
        bexec: PathBuf,
        sink: Box<dyn Write>,
        suite_match: Option<&str>,
        test_match: Option<&str>,
    ) -> Result<Self> {
        let suite_filter = Regex::new(suite_match.unwrap_or(".*"))?;
        let test_filter = Regex::new(test_match.unwrap_or(".*"))?;
        Ok(Butcher {
            bexec,
            sink,
            suite_filter,
            test_filter,
            debugger: None,
            flags: Flags::default(),
            objects: Vec::new(),
        })
    }

    pub fn tune(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Runs every test under the given debugger command line instead of
    /// plain `bexec`. Debugger runs are interactive, so only the first
    /// matching test is run per invocation.
    pub fn debugger(&mut self, cmdline: &str) -> Result<()> {
        let argv: Vec<String> = cmdline.split_whitespace().map(str::to_owned).collect();
        if argv.is_empty() {
            return Err(Error::InvalidArgument("empty debugger command".into()));
        }
        self.debugger = Some(argv);
        Ok(())
    }

    /// Loads one shared object and registers its suites.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let object = LoadedObject::load(path)?;
        log::debug!(
            "loaded '{}': {} suites",
            path.display(),
            object.suites().count()
        );
        self.objects.push(object);
        Ok(())
    }

    /// Loads several objects; the first failure aborts, objects loaded so
    /// far stay registered.
    pub fn loadv<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            self.load(path.as_ref())?;
        }
        Ok(())
    }

    /// Prints everything that was loaded instead of running it.
    pub fn list(&mut self) -> Result<()> {
        report::render_list(&mut self.sink, &self.objects)?;
        Ok(())
    }

    /// Runs every test selected by the match patterns, one child process
    /// per test. A test that cannot be orchestrated is recorded as
    /// corrupted and the run continues with the next one.
    pub fn chop(&mut self) -> Result<()> {
        let config = ChopConfig {
            bexec: &self.bexec,
            debugger: self.debugger.as_deref(),
            verbose: self.flags.verbose,
            envdump: self.flags.envdump,
        };
        let interactive = self.debugger.is_some();

        for object in &mut self.objects {
            let object_path = object.resolved_path().to_path_buf();
            for suite in object.suites_mut() {
                if !config_matches(&self.suite_filter, suite.name()) {
                    continue;
                }
                let suite_name = suite.name().to_owned();
                for test in suite.tests_mut() {
                    if !config_matches(&self.test_filter, test.name()) {
                        continue;
                    }
                    if let Err(error) = chopper::chop_test(&config, &object_path, test) {
                        writeln!(
                            self.sink,
                            "error running test '{suite_name}:{}': {error}",
                            test.name()
                        )?;
                        test.results = [PhaseResult::Corrupted; PHASE_COUNT];
                        test.log.push("(test was aborted)");
                    }
                    if interactive {
                        // One interactive session per invocation.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Renders the report and returns the exit code for the invocation.
    pub fn report(&mut self) -> Result<i32> {
        let totals = report::render_report(&mut self.sink, &self.objects, self.flags)?;
        Ok(totals.exit_code())
    }

    pub fn objects(&self) -> &[LoadedObject] {
        &self.objects
    }
}

fn config_matches(filter: &Regex, name: &str) -> bool {
    filter.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> Box<dyn Write> {
        Box::new(std::io::sink())
    }

    #[test]
    fn bad_match_pattern_is_a_compile_error() {
        let err = Butcher::new("bexec".into(), sink(), Some("("), None).unwrap_err();
        assert!(matches!(err, Error::RegexCompileFailed(_)));
    }

    #[test]
    fn default_patterns_match_everything() {
        let butcher = Butcher::new("bexec".into(), sink(), None, None).unwrap();
        assert!(butcher.suite_filter.is_match("anything"));
        assert!(butcher.test_filter.is_match(""));
    }

    #[test]
    fn empty_debugger_command_is_rejected() {
        let mut butcher = Butcher::new("bexec".into(), sink(), None, None).unwrap();
        assert!(matches!(
            butcher.debugger("   "),
            Err(Error::InvalidArgument(_))
        ));
        butcher.debugger("valgrind --leak-check=full").unwrap();
        assert_eq!(
            butcher.debugger.as_deref(),
            Some(&["valgrind".to_owned(), "--leak-check=full".to_owned()][..])
        );
    }

    #[test]
    fn loading_a_missing_object_fails() {
        let mut butcher = Butcher::new("bexec".into(), sink(), None, None).unwrap();
        assert!(matches!(
            butcher.load(Path::new("/nonexistent/libnope.so")),
            Err(Error::LoadFailed(_))
        ));
        assert!(butcher.objects().is_empty());
    }
}
