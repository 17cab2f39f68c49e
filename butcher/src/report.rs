// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering: the `--list` dump and the results report.

use crate::harness::Flags;
use crate::model::{LoadedObject, Suite, Test};
use crate::record::{Phase, PhaseResult};
use colored::Colorize;
use std::io::Write;

/// Tallies of run tests by worst-phase class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Totals {
    pub run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub ignored: usize,
    pub corrupted: usize,
}

impl Totals {
    fn record(&mut self, worst: PhaseResult) {
        match worst {
            PhaseResult::None => return,
            PhaseResult::Succeeded => self.succeeded += 1,
            PhaseResult::Failed => self.failed += 1,
            PhaseResult::Ignored => self.ignored += 1,
            PhaseResult::Corrupted => self.corrupted += 1,
        }
        self.run += 1;
    }

    fn merge(&mut self, other: Totals) {
        self.run += other.run;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.ignored += other.ignored;
        self.corrupted += other.corrupted;
    }

    fn percentage(&self) -> usize {
        if self.run == 0 {
            0
        } else {
            self.succeeded * 100 / self.run
        }
    }

    /// Exit code of the whole invocation: the worst class seen, using the
    /// class ordering, zero when everything succeeded or nothing ran.
    pub fn exit_code(&self) -> i32 {
        if self.corrupted > 0 {
            3
        } else if self.ignored > 0 {
            2
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

impl std::fmt::Display for Totals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} tests succeeded ({}%), {} ignored, {} failed, {} corrupted",
            self.succeeded,
            self.run,
            self.percentage(),
            self.ignored,
            self.failed,
            self.corrupted
        )
    }
}

/// Dumps everything discovery found, with descriptor indexes.
pub(crate) fn render_list(
    out: &mut dyn Write,
    objects: &[LoadedObject],
) -> std::io::Result<()> {
    writeln!(out, "{}...", "listing loaded objects".green().bold())?;
    for object in objects {
        writeln!(
            out,
            "[{}, name='{}']",
            "object".yellow().bold(),
            object.path().display().to_string().red()
        )?;
        for suite in object.suites() {
            writeln!(
                out,
                " [{}, name='{}', {} tests]",
                "suite".blue().bold(),
                suite.name().green(),
                suite.len()
            )?;
            for test in suite.tests() {
                write!(
                    out,
                    "  [{}, name='{}', function={}",
                    "test".magenta().bold(),
                    test.name().red(),
                    test.function()
                )?;
                if let Some(index) = test.setup() {
                    write!(out, ", setup={index}")?;
                }
                if let Some(index) = test.teardown() {
                    write!(out, ", teardown={index}")?;
                }
                writeln!(out, "]")?;
            }
        }
    }
    Ok(())
}

/// Renders the results for every object and returns the overall tallies.
pub(crate) fn render_report(
    out: &mut dyn Write,
    objects: &[LoadedObject],
    flags: Flags,
) -> std::io::Result<Totals> {
    writeln!(
        out,
        "{} (worst counts)...",
        "listing results for loaded objects".green().bold()
    )?;

    let mut overall = Totals::default();
    for object in objects {
        writeln!(
            out,
            "[{}, name='{}']",
            "object".yellow().bold(),
            object.path().display().to_string().red()
        )?;
        for suite in object.suites() {
            let totals = render_suite(out, suite, flags)?;
            overall.merge(totals);
        }
    }
    writeln!(out, "=> {overall}")?;
    Ok(overall)
}

fn render_suite(out: &mut dyn Write, suite: &Suite, flags: Flags) -> std::io::Result<Totals> {
    writeln!(
        out,
        " [{}, name='{}']",
        "suite".blue().bold(),
        suite.name().green()
    )?;

    let mut totals = Totals::default();
    for test in suite.tests() {
        render_test(out, test, flags)?;
        totals.record(test.worst());
    }

    writeln!(out, "  => {totals}")?;
    Ok(totals)
}

fn render_test(out: &mut dyn Write, test: &Test, flags: Flags) -> std::io::Result<()> {
    let worst = test.worst();
    let noteworthy = worst > PhaseResult::Succeeded;

    if flags.verbose || noteworthy {
        writeln!(
            out,
            "  [{}, name='{}']",
            "test".magenta().bold(),
            test.name().red()
        )?;
    }

    if (flags.messages || noteworthy) && !test.log().is_empty() {
        for line in test.log().lines() {
            let line = line.to_string();
            if noteworthy {
                writeln!(out, "   {}", line.red())?;
            } else {
                writeln!(out, "   {line}")?;
            }
        }
    }

    if (flags.verbose || noteworthy) && test.was_run() {
        write!(out, "   -> results: ")?;
        let mut first = true;
        for phase in Phase::ALL {
            let result = test.results()[phase as usize];
            if !result.is_run() {
                continue;
            }
            if !first {
                write!(out, ", ")?;
            }
            first = false;
            write!(out, "{} {}", phase.label().cyan(), paint(result))?;
        }
        writeln!(out, " -> [{}]", paint(worst))?;
    }

    if flags.verbose && test.was_run() {
        if let Some(rusage) = test.rusage() {
            writeln!(
                out,
                "   -> rusage: user {:.3}s, system {:.3}s, maxrss {} KiB",
                rusage.user_time.as_secs_f64(),
                rusage.system_time.as_secs_f64(),
                rusage.max_rss_kib
            )?;
        }
    }

    Ok(())
}

fn paint(result: PhaseResult) -> colored::ColoredString {
    match result {
        PhaseResult::Succeeded => result.label().green(),
        PhaseResult::Ignored => result.label().yellow(),
        PhaseResult::Failed | PhaseResult::Corrupted => result.label().red(),
        PhaseResult::None => result.label().normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_ignore_tests_that_never_ran() {
        let mut totals = Totals::default();
        totals.record(PhaseResult::None);
        totals.record(PhaseResult::Succeeded);
        totals.record(PhaseResult::Corrupted);
        assert_eq!(totals.run, 2);
        assert_eq!(totals.succeeded, 1);
        assert_eq!(totals.corrupted, 1);
    }

    #[test]
    fn exit_code_follows_worst_class() {
        let mut totals = Totals::default();
        assert_eq!(totals.exit_code(), 0);
        totals.record(PhaseResult::Succeeded);
        assert_eq!(totals.exit_code(), 0);
        totals.record(PhaseResult::Failed);
        assert_eq!(totals.exit_code(), 1);
        totals.record(PhaseResult::Ignored);
        assert_eq!(totals.exit_code(), 2);
        totals.record(PhaseResult::Corrupted);
        assert_eq!(totals.exit_code(), 3);
    }

    #[test]
    fn summary_line_shape() {
        colored::control::set_override(false);
        let mut totals = Totals::default();
        totals.record(PhaseResult::Succeeded);
        assert_eq!(
            totals.to_string(),
            "1/1 tests succeeded (100%), 0 ignored, 0 failed, 0 corrupted"
        );
    }
}
