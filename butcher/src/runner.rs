// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `bexec` side of the harness: runs one test inside its own process.
//!
//! The orchestrator passes everything through the environment, so a
//! failing exec or a crashing test never needs argument plumbing. The
//! runner dlopens the object on its own (the parent's handle does not
//! survive exec), drives the phases in order and writes a result record
//! after every phase to the control descriptor it inherited.

use crate::error::{Error, Result};
use crate::record::{Phase, PhaseResult, ResultRecord};
use crate::section::TestObject;
use std::ffi::c_void;
use std::fs::File;
use std::io::Write;
use std::os::fd::{FromRawFd, RawFd};
use std::path::PathBuf;

/// Path of the shared object under test (required).
pub const ENV_ELF_NAME: &str = "butcher_elf_name";
/// Descriptor index of the test callable (required).
pub const ENV_TEST_FUNCTION: &str = "butcher_test_function";
/// Descriptor index of the setup callable.
pub const ENV_TEST_SETUP: &str = "butcher_test_setup";
/// Descriptor index of the teardown callable.
pub const ENV_TEST_TEARDOWN: &str = "butcher_test_teardown";
/// File descriptor the result records go to.
pub const ENV_CONTROL_FD: &str = "butcher_cfd";
pub const ENV_VERBOSE: &str = "butcher_verbose";
pub const ENV_ENVDUMP: &str = "butcher_envdump";
pub const ENV_UNLOAD: &str = "butcher_unload";

/// Everything the runner reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub object: PathBuf,
    pub function: usize,
    pub setup: Option<usize>,
    pub teardown: Option<usize>,
    pub control_fd: Option<RawFd>,
    pub verbose: bool,
    pub envdump: bool,
    pub unload: bool,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        let object = std::env::var_os(ENV_ELF_NAME)
            .ok_or_else(|| Error::InvalidArgument(format!("{ENV_ELF_NAME} not set")))?;
        let function = parse_index(ENV_TEST_FUNCTION)?
            .ok_or_else(|| Error::InvalidArgument(format!("{ENV_TEST_FUNCTION} not set")))?;
        Ok(RunnerConfig {
            object: PathBuf::from(object),
            function,
            setup: parse_index(ENV_TEST_SETUP)?,
            teardown: parse_index(ENV_TEST_TEARDOWN)?,
            control_fd: parse_fd(ENV_CONTROL_FD)?,
            verbose: env_bool(ENV_VERBOSE, false),
            envdump: env_bool(ENV_ENVDUMP, false),
            unload: env_bool(ENV_UNLOAD, true),
        })
    }
}

fn parse_index(name: &str) -> Result<Option<usize>> {
    match std::env::var_os(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .and_then(|v| v.parse::<usize>().ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("{name} is not an index"))),
    }
}

fn parse_fd(name: &str) -> Result<Option<RawFd>> {
    match std::env::var_os(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .and_then(|v| v.parse::<RawFd>().ok())
            .filter(|fd| *fd >= 0)
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("{name} is not a descriptor"))),
    }
}

/// `true`/`false`/`1`/`0`, case-insensitive; anything else keeps the
/// default.
fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Dumps environment and argv to stderr, roughly pasteable as an `env -i`
/// invocation for reproducing a runner by hand.
fn dump_environment() {
    let mut err = std::io::stderr().lock();
    let _ = write!(err, "bexec here ( env -i");
    for (key, value) in std::env::vars_os() {
        let _ = write!(
            err,
            " '{}={}'",
            key.to_string_lossy(),
            value.to_string_lossy()
        );
    }
    for arg in std::env::args_os() {
        let _ = write!(err, " '{}'", arg.to_string_lossy());
    }
    let _ = writeln!(err, " )");
}

struct Tester<'a> {
    object: &'a TestObject,
    control: Option<File>,
    rec: ResultRecord,
    verbose: bool,
}

impl Tester<'_> {
    /// Runs one phase's callable, records its outcome and pushes the
    /// updated record out.
    fn invoke(&mut self, phase: Phase, index: usize, object: &mut *mut c_void) -> Result<PhaseResult> {
        let function = self.object.function_at(index)?;
        if self.verbose {
            eprintln!("running {} (descriptor {index})", phase.label());
        }
        // The callable is whatever the test object put into the section;
        // isolation is the process boundary, not this call.
        let code = unsafe { function(*object, object as *mut *mut c_void) };
        let result = PhaseResult::from_code(code);
        self.rec.set(phase, result);
        self.emit();
        Ok(result)
    }

    /// One whole record per write; short or failed writes are not
    /// retried, the parent treats a missing done record as corruption.
    fn emit(&mut self) {
        if let Some(control) = &mut self.control {
            let _ = control.write_all(&self.rec.encode());
        }
    }
}

/// Runs the configured phases. On success the caller is expected to
/// [`terminate`] without unwinding further.
pub fn run(config: &RunnerConfig) -> Result<()> {
    if config.envdump {
        dump_environment();
    }

    if config.control_fd.is_none() {
        // No control channel: test output belongs on stderr, typically a
        // debugger session on the user's terminal.
        nix::unistd::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO)
            .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e as i32)))?;
    }

    let object = TestObject::open_now(&config.object)?;

    // Fail on a bad index before any phase runs.
    let descriptor_count = object.descriptors()?.len();
    for index in [Some(config.function), config.setup, config.teardown]
        .into_iter()
        .flatten()
    {
        if index >= descriptor_count {
            return Err(Error::InvalidArgument(format!(
                "descriptor index {index} out of range (0..{descriptor_count})"
            )));
        }
    }

    let mut tester = Tester {
        object: &object,
        // The orchestrator owns the descriptor's lifetime in the parent;
        // this end dies with the process.
        control: config
            .control_fd
            .map(|fd| unsafe { File::from_raw_fd(fd) }),
        rec: ResultRecord::default(),
        verbose: config.verbose,
    };

    let mut fixture: *mut c_void = std::ptr::null_mut();

    let mut skip = false;
    if let Some(index) = config.setup {
        let result = tester.invoke(Phase::Setup, index, &mut fixture)?;
        // A setup that did not succeed leaves nothing to test or tear down.
        skip = result > PhaseResult::Succeeded;
    }

    if !skip {
        tester.invoke(Phase::Test, config.function, &mut fixture)?;
        if let Some(index) = config.teardown {
            tester.invoke(Phase::Teardown, index, &mut fixture)?;
        }
    }

    tester.rec.done = true;
    tester.emit();

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    drop(tester);

    if config.unload {
        drop(object);
    } else {
        object.leak();
    }

    Ok(())
}

/// Leaves the process the way the phases left it: no unwinding, no
/// destructors beyond what already ran, exit status zero.
pub fn terminate() -> ! {
    unsafe { libc::pthread_exit(std::ptr::null_mut()) }
}
