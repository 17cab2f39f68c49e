// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Command-line front-end for the harness.

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
use clap::{ArgAction, CommandFactory, Parser};
#[cfg(unix)]
use std::path::PathBuf;

/// Runs test functions embedded in shared objects, each in its own child
/// process, and reports per-suite results.
#[cfg(unix)]
#[derive(Debug, Parser)]
#[command(
    name = "butcher",
    after_help = "Example:\n  butcher -cv -s '^ugly' -t '^important' libfoo.so libbar.so"
)]
struct Cli {
    /// Run only tests in matched suites
    #[arg(short = 's', long = "match-suite", value_name = "regex")]
    match_suite: Option<String>,

    /// Run only matched tests
    #[arg(short = 't', long = "match-test", value_name = "regex")]
    match_test: Option<String>,

    /// Be verbose; repeat for descriptions, messages and environment dumps
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Be quiet (default)
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Enable color output
    #[arg(short = 'c', long = "color", overrides_with = "no_color")]
    color: bool,

    /// Disable color output (default)
    #[arg(short = 'n', long = "no-color", overrides_with = "color")]
    no_color: bool,

    /// Write the report to this descriptor instead of stdout
    #[arg(short = 'd', long = "descriptor", value_name = "fd")]
    descriptor: Option<i32>,

    /// Instead of running tests, dump everything available
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Display the help screen
    #[arg(long = "usage")]
    usage: bool,

    /// Path to the test runner, e.g. /usr/bin/bexec
    #[arg(short = 'b', long = "bexec", value_name = "path")]
    bexec: Option<PathBuf>,

    /// Run the test runner under this debugger command line
    #[arg(short = 'g', long = "debugger", value_name = "cmdline")]
    debugger: Option<String>,

    /// Shorthand for --debugger valgrind
    #[arg(short = 'V', long = "valgrind")]
    valgrind: bool,

    /// Shorthand for --debugger cgdb
    #[arg(short = 'C', long = "cgdb")]
    cgdb: bool,

    /// Shorthand for --debugger gdb
    #[arg(short = 'G', long = "gdb")]
    gdb: bool,

    /// Shared objects to load
    #[arg(value_name = "shared-object")]
    objects: Vec<PathBuf>,
}

#[cfg(unix)]
impl Cli {
    fn flags(&self) -> butcher::Flags {
        let verbose = if self.quiet { 0 } else { self.verbose };
        butcher::Flags {
            verbose: verbose >= 1,
            descriptions: verbose >= 2,
            messages: verbose >= 3,
            envdump: verbose >= 4,
            color: self.color,
        }
    }

    fn debugger_cmdline(&self) -> Option<String> {
        if let Some(cmdline) = &self.debugger {
            return Some(cmdline.clone());
        }
        if self.valgrind {
            Some("valgrind".to_owned())
        } else if self.cgdb {
            Some("cgdb".to_owned())
        } else if self.gdb {
            Some("gdb".to_owned())
        } else {
            None
        }
    }
}

/// Default runner location: a `bexec` next to the current executable.
#[cfg(unix)]
fn default_bexec() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bexec")))
        .unwrap_or_else(|| PathBuf::from("bexec"))
}

#[cfg(unix)]
fn run(cli: Cli) -> anyhow::Result<i32> {
    use std::io::Write;

    if cli.usage || cli.objects.is_empty() {
        Cli::command().print_help()?;
        return Ok(0);
    }

    colored::control::set_override(cli.color);

    let mut sink: Box<dyn Write> = match cli.descriptor {
        // The caller handed us an open descriptor; it is ours from here on.
        Some(fd) => Box::new(unsafe {
            use std::os::fd::FromRawFd;
            std::fs::File::from_raw_fd(fd)
        }),
        None => Box::new(std::io::stdout()),
    };

    use colored::Colorize;
    writeln!(sink, "### The {} unit test ###", "BUTCHER".red().bold())?;
    if cli.match_suite.is_some() || cli.match_test.is_some() {
        writeln!(
            sink,
            "tests matching '{}' in suites matching '{}' are going to be loaded\n",
            cli.match_test.as_deref().unwrap_or(".*"),
            cli.match_suite.as_deref().unwrap_or(".*"),
        )?;
    }

    let bexec = cli.bexec.clone().unwrap_or_else(default_bexec);
    let mut butcher = butcher::Butcher::new(
        bexec,
        sink,
        cli.match_suite.as_deref(),
        cli.match_test.as_deref(),
    )?;
    butcher.tune(cli.flags());

    if let Some(cmdline) = cli.debugger_cmdline() {
        butcher.debugger(&cmdline)?;
    }

    // A broken object aborts its own load, never the other objects'.
    let mut load_failures = 0;
    for path in &cli.objects {
        if let Err(error) = butcher.load(path) {
            eprintln!("butcher: could not load '{}': {error}", path.display());
            load_failures += 1;
        }
    }
    if load_failures == cli.objects.len() {
        anyhow::bail!("none of the given objects could be loaded");
    }

    if cli.list {
        butcher.list()?;
        return Ok(0);
    }

    butcher.chop()?;
    let exit = butcher.report()?;
    if load_failures > 0 && exit == 0 {
        return Ok(1);
    }
    Ok(exit)
}

#[cfg(unix)]
fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("butcher: {error:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(all(unix, test))]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbose_levels_unlock_flags_in_order() {
        let cli = Cli::parse_from(["butcher", "-vvv", "lib.so"]);
        let flags = cli.flags();
        assert!(flags.verbose && flags.descriptions && flags.messages);
        assert!(!flags.envdump);
    }

    #[test]
    fn quiet_resets_verbosity() {
        let cli = Cli::parse_from(["butcher", "-vv", "--quiet", "lib.so"]);
        let flags = cli.flags();
        assert!(!flags.verbose);
    }

    #[test]
    fn later_color_flag_wins() {
        let cli = Cli::parse_from(["butcher", "--color", "--no-color", "lib.so"]);
        assert!(!cli.color);
        let cli = Cli::parse_from(["butcher", "-n", "-c", "lib.so"]);
        assert!(cli.color);
    }

    #[test]
    fn debugger_shortcuts_expand() {
        let cli = Cli::parse_from(["butcher", "-V", "lib.so"]);
        assert_eq!(cli.debugger_cmdline().as_deref(), Some("valgrind"));
        let cli = Cli::parse_from(["butcher", "-g", "gdb --args", "lib.so"]);
        assert_eq!(cli.debugger_cmdline().as_deref(), Some("gdb --args"));
    }

    #[test]
    fn positionals_collect_objects() {
        let cli = Cli::parse_from(["butcher", "-s", "^foo", "a.so", "b.so"]);
        assert_eq!(cli.objects.len(), 2);
        assert_eq!(cli.match_suite.as_deref(), Some("^foo"));
    }
}
