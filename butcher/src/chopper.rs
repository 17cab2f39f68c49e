// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-test orchestration: fork a runner, feed it the descriptor indexes
//! through the environment, drain its two pipes without ever blocking,
//! reap it and fold what came back into the test.

use crate::error::{Error, Result};
use crate::model::{ResourceUsage, Test};
use crate::record::{PhaseResult, ResultRecord, PHASE_COUNT, RECORD_SIZE};
use crate::runner;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{fork, pipe2, ForkResult};
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pause between poll rounds while the child runs.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Highest descriptor swept when scrubbing inherited descriptors in the
/// child.
const CHILD_FD_SWEEP: RawFd = 256;

/// Everything a single chop needs from the harness.
pub(crate) struct ChopConfig<'a> {
    pub bexec: &'a Path,
    pub debugger: Option<&'a [String]>,
    pub verbose: bool,
    pub envdump: bool,
}

/// Pre-built argv and environment so the forked child only execs.
///
/// The child between fork and exec must not allocate; every byte it needs
/// is laid out here, in the parent, beforehand.
struct PreparedExec {
    program: CString,
    #[allow(dead_code)]
    args: Vec<CString>,
    arg_ptrs: Vec<*const libc::c_char>,
    #[allow(dead_code)]
    env: Vec<CString>,
    env_ptrs: Vec<*const libc::c_char>,
}

impl PreparedExec {
    fn new(program: &Path, args: &[String], env: &[(String, String)]) -> Result<Self> {
        let program = cstring(program.as_os_str().as_encoded_bytes())?;
        let args = args
            .iter()
            .map(|a| cstring(a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let env = env
            .iter()
            .map(|(k, v)| cstring(format!("{k}={v}").as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        let arg_ptrs = ptr_table(&args);
        let env_ptrs = ptr_table(&env);
        Ok(PreparedExec {
            program,
            args,
            arg_ptrs,
            env_ptrs,
            env,
        })
    }

    /// Replaces the process image; only comes back on failure.
    fn exec(&self) -> Errno {
        unsafe {
            libc::execve(
                self.program.as_ptr(),
                self.arg_ptrs.as_ptr(),
                self.env_ptrs.as_ptr(),
            );
        }
        Errno::last()
    }
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes)
        .map_err(|_| Error::InvalidArgument("NUL byte in argument or environment".into()))
}

fn ptr_table(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Finds a program the way the shell would, so `--debugger valgrind`
/// works without an absolute path.
pub(crate) fn resolve_program(name: &str) -> PathBuf {
    let direct = Path::new(name);
    if name.contains('/') || direct.is_absolute() {
        return direct.to_path_buf();
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    direct.to_path_buf()
}

/// How the runner child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitKind {
    Exited(i32),
    Signaled(i32),
}

/// Runs one test to completion and fills in its results, rusage and log.
pub(crate) fn chop_test(config: &ChopConfig<'_>, object_path: &Path, test: &mut Test) -> Result<()> {
    test.log = crate::model::Log::new();
    test.results = [PhaseResult::None; PHASE_COUNT];
    test.rusage = None;

    // A missing runner would only surface post-fork, as one corrupted
    // test after another; catch it here with a real error instead.
    if !config.bexec.is_file() {
        return Err(Error::ExecFailed {
            program: config.bexec.display().to_string(),
            errno: Errno::ENOENT,
        });
    }

    if let Some(debugger) = config.debugger {
        return chop_interactive(config, debugger, object_path, test);
    }

    let (log_read, log_write) = pipe2(OFlag::O_NONBLOCK).map_err(Error::PipeCreateFailed)?;
    let (control_read, control_write) = pipe2(OFlag::O_NONBLOCK).map_err(Error::PipeCreateFailed)?;

    let mut env = runner_env(config, object_path, test);
    env.push((
        runner::ENV_CONTROL_FD.into(),
        control_write.as_raw_fd().to_string(),
    ));

    let exec = PreparedExec::new(
        config.bexec,
        &[config.bexec.display().to_string()],
        &env,
    )?;

    match unsafe { fork() }.map_err(Error::ForkFailed)? {
        ForkResult::Child => run_runner_child(
            &exec,
            log_write.as_raw_fd(),
            log_read.as_raw_fd(),
            control_write.as_raw_fd(),
            control_read.as_raw_fd(),
        ),
        ForkResult::Parent { child } => {
            // The child owns the write ends now; holding them here would
            // keep the pipes from ever reporting EOF.
            drop(log_write);
            drop(control_write);

            let mut log_buf = Vec::new();
            let mut control_buf = Vec::new();
            let (exit, rusage) = loop {
                std::thread::sleep(POLL_INTERVAL);
                let reaped = try_wait(child.as_raw())?;
                drain(&log_read, &mut log_buf)?;
                drain(&control_read, &mut control_buf)?;
                if let Some(reaped) = reaped {
                    break reaped;
                }
            };
            // Whatever was still in flight when the child died.
            drain(&log_read, &mut log_buf)?;
            drain(&control_read, &mut control_buf)?;

            let configured = [test.setup().is_some(), true, test.teardown().is_some()];
            let (results, synthetic) = reconcile(exit, latest_record(&control_buf), configured);
            test.results = results;
            test.rusage = Some(rusage);
            test.log.extend_from_buffer(&log_buf);
            if let Some(line) = synthetic {
                test.log.push(line.as_str());
            }
            log::debug!(
                "reaped runner {child}: {exit:?}, worst {}",
                test.worst()
            );
            Ok(())
        }
    }
}

/// Debugger mode: the child keeps the terminal, there is no control
/// channel and nothing to reconcile; phase results stay unset.
fn chop_interactive(
    config: &ChopConfig<'_>,
    debugger: &[String],
    object_path: &Path,
    test: &mut Test,
) -> Result<()> {
    let mut env = runner_env(config, object_path, test);
    // Debuggers want the library still mapped at exit for symbol names.
    env.push((runner::ENV_UNLOAD.into(), "false".into()));

    let program = resolve_program(&debugger[0]);
    let mut args: Vec<String> = debugger.to_vec();
    args.push(config.bexec.display().to_string());
    let exec = PreparedExec::new(&program, &args, &env)?;

    match unsafe { fork() }.map_err(Error::ForkFailed)? {
        ForkResult::Child => {
            let _ = exec.exec();
            unsafe { libc::_exit(-1) }
        }
        ForkResult::Parent { child } => {
            // Foreground child: block until the debugger session ends.
            let (exit, rusage) = loop {
                if let Some(reaped) = try_wait(child.as_raw())? {
                    break reaped;
                }
                std::thread::sleep(Duration::from_millis(10));
            };
            test.rusage = Some(rusage);
            log::debug!("debugger session for '{}' ended: {exit:?}", test.name());
            Ok(())
        }
    }
}

/// Builds the environment enumerated in the runner contract.
fn runner_env(config: &ChopConfig<'_>, object_path: &Path, test: &Test) -> Vec<(String, String)> {
    let mut env = vec![
        (
            runner::ENV_ELF_NAME.into(),
            object_path.display().to_string(),
        ),
        (runner::ENV_TEST_FUNCTION.into(), test.function().to_string()),
        (runner::ENV_VERBOSE.into(), bool_str(config.verbose).into()),
        (runner::ENV_ENVDUMP.into(), bool_str(config.envdump).into()),
    ];
    if let Some(index) = test.setup() {
        env.push((runner::ENV_TEST_SETUP.into(), index.to_string()));
    }
    if let Some(index) = test.teardown() {
        env.push((runner::ENV_TEST_TEARDOWN.into(), index.to_string()));
    }
    if let Some(path) = std::env::var_os("LD_LIBRARY_PATH") {
        env.push((
            "LD_LIBRARY_PATH".into(),
            path.to_string_lossy().into_owned(),
        ));
    }
    env
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Child half of the fork. Wires the log pipe over stdout and stderr,
/// scrubs every inherited descriptor that is not part of the contract and
/// execs the runner. Nothing here allocates.
fn run_runner_child(
    exec: &PreparedExec,
    log_write: RawFd,
    log_read: RawFd,
    control_write: RawFd,
    control_read: RawFd,
) -> ! {
    unsafe {
        libc::dup2(log_write, libc::STDOUT_FILENO);
        libc::dup2(log_write, libc::STDERR_FILENO);
        libc::close(libc::STDIN_FILENO);
        libc::close(log_write);
        libc::close(log_read);
        libc::close(control_read);
        for fd in 3..CHILD_FD_SWEEP {
            if fd != control_write {
                libc::close(fd);
            }
        }
    }
    let _ = exec.exec();
    // Exec failed; stderr already points at the log pipe, so the parent
    // will see the reason as a log line of the corrupted test.
    let msg = b"could not execute test runner\n";
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(-1)
    }
}

/// Non-blocking reap, collecting rusage along with the status.
fn try_wait(pid: libc::pid_t) -> Result<Option<(ExitKind, ResourceUsage)>> {
    let mut status: libc::c_int = 0;
    let mut rusage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let reaped =
        unsafe { libc::wait4(pid, &mut status, libc::WNOHANG, rusage.as_mut_ptr()) };
    match reaped {
        0 => Ok(None),
        -1 => match Errno::last() {
            Errno::EINTR => Ok(None),
            errno => Err(Error::Io(std::io::Error::from_raw_os_error(errno as i32))),
        },
        _ => {
            let rusage = unsafe { rusage.assume_init() };
            let kind = if libc::WIFEXITED(status) {
                ExitKind::Exited(libc::WEXITSTATUS(status))
            } else if libc::WIFSIGNALED(status) {
                ExitKind::Signaled(libc::WTERMSIG(status))
            } else {
                return Ok(None);
            };
            Ok(Some((kind, rusage.into())))
        }
    }
}

/// Drains whatever the pipe has right now. Only the byte count `read`
/// reports is consumed; EAGAIN means the child simply has not written
/// more yet.
fn drain(fd: &OwnedFd, buf: &mut Vec<u8>) -> Result<()> {
    let mut chunk = [0u8; 4096];
    loop {
        match nix::unistd::read(fd.as_raw_fd(), &mut chunk) {
            Ok(0) => return Ok(()),
            Ok(count) => buf.extend_from_slice(&chunk[..count]),
            Err(Errno::EAGAIN) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                return Err(Error::Io(std::io::Error::from_raw_os_error(errno as i32)))
            }
        }
    }
}

/// Chops the control stream into record-sized chunks and keeps the last
/// one that decodes; records are cumulative, so the latest wins. A
/// trailing partial chunk is discarded.
fn latest_record(bytes: &[u8]) -> Option<ResultRecord> {
    bytes
        .chunks_exact(RECORD_SIZE)
        .filter_map(|chunk| ResultRecord::decode(chunk).ok())
        .last()
}

/// Folds exit status and the last record into final phase results.
///
/// `configured` says which phases this test actually has; a crash is
/// pinned on the first configured phase the runner never reported, and
/// phases with no callable stay unset.
fn reconcile(
    exit: ExitKind,
    record: Option<ResultRecord>,
    configured: [bool; PHASE_COUNT],
) -> ([PhaseResult; PHASE_COUNT], Option<String>) {
    match exit {
        ExitKind::Exited(_) => match record {
            Some(record) if record.done => (record.results, None),
            // The runner never said it was done: treat the whole run as
            // corrupted no matter how cleanly the process exited.
            _ => (
                [PhaseResult::Corrupted; PHASE_COUNT],
                Some("(test was aborted)".to_owned()),
            ),
        },
        ExitKind::Signaled(signal) => {
            let seen = record.map(|r| r.results).unwrap_or_default();
            let mut results = [PhaseResult::None; PHASE_COUNT];
            for ((slot, result), present) in results.iter_mut().zip(seen).zip(configured) {
                if result.is_run() {
                    *slot = result;
                } else if present {
                    // The first phase the runner should have reported but
                    // never did is where it died; later phases were never
                    // entered.
                    *slot = PhaseResult::Corrupted;
                    break;
                }
            }
            (results, Some(format!("(exited with signal {signal})")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Phase;

    fn record(
        setup: PhaseResult,
        test: PhaseResult,
        teardown: PhaseResult,
        done: bool,
    ) -> ResultRecord {
        let mut rec = ResultRecord::default();
        rec.set(Phase::Setup, setup);
        rec.set(Phase::Test, test);
        rec.set(Phase::Teardown, teardown);
        rec.done = done;
        rec
    }

    #[test]
    fn latest_complete_record_wins() {
        let first = record(
            PhaseResult::Succeeded,
            PhaseResult::None,
            PhaseResult::None,
            false,
        );
        let second = record(
            PhaseResult::Succeeded,
            PhaseResult::Failed,
            PhaseResult::None,
            true,
        );
        let mut stream = Vec::new();
        stream.extend_from_slice(&first.encode());
        stream.extend_from_slice(&second.encode());
        // Partial tail of a third record.
        stream.extend_from_slice(&first.encode()[..4]);
        assert_eq!(latest_record(&stream), Some(second));
    }

    #[test]
    fn garbage_chunks_are_skipped() {
        let good = record(
            PhaseResult::Succeeded,
            PhaseResult::Succeeded,
            PhaseResult::None,
            true,
        );
        let mut stream = good.encode().to_vec();
        stream.extend_from_slice(&[0u8; RECORD_SIZE]);
        assert_eq!(latest_record(&stream), Some(good));
        assert_eq!(latest_record(&[0u8; RECORD_SIZE]), None);
        assert_eq!(latest_record(&[]), None);
    }

    const FIXTURED: [bool; PHASE_COUNT] = [true, true, true];
    const PLAIN: [bool; PHASE_COUNT] = [false, true, false];

    #[test]
    fn clean_exit_with_done_copies_results() {
        let rec = record(
            PhaseResult::Succeeded,
            PhaseResult::Failed,
            PhaseResult::Succeeded,
            true,
        );
        let (results, synthetic) = reconcile(ExitKind::Exited(0), Some(rec), FIXTURED);
        assert_eq!(results, rec.results);
        assert!(synthetic.is_none());
    }

    #[test]
    fn clean_exit_without_done_is_corrupted() {
        let (results, synthetic) = reconcile(ExitKind::Exited(0), None, FIXTURED);
        assert_eq!(results, [PhaseResult::Corrupted; PHASE_COUNT]);
        assert_eq!(synthetic.as_deref(), Some("(test was aborted)"));

        let undone = record(
            PhaseResult::Succeeded,
            PhaseResult::Succeeded,
            PhaseResult::None,
            false,
        );
        let (results, _) = reconcile(ExitKind::Exited(0), Some(undone), FIXTURED);
        assert_eq!(results, [PhaseResult::Corrupted; PHASE_COUNT]);
    }

    #[test]
    fn signal_corrupts_first_unreported_phase() {
        let rec = record(
            PhaseResult::Succeeded,
            PhaseResult::None,
            PhaseResult::None,
            false,
        );
        let (results, synthetic) = reconcile(ExitKind::Signaled(11), Some(rec), FIXTURED);
        assert_eq!(
            results,
            [
                PhaseResult::Succeeded,
                PhaseResult::Corrupted,
                PhaseResult::None
            ]
        );
        assert_eq!(synthetic.as_deref(), Some("(exited with signal 11)"));
    }

    #[test]
    fn signal_in_fixtured_setup_corrupts_setup_only() {
        let (results, _) = reconcile(ExitKind::Signaled(6), None, FIXTURED);
        assert_eq!(
            results,
            [
                PhaseResult::Corrupted,
                PhaseResult::None,
                PhaseResult::None
            ]
        );
    }

    #[test]
    fn signal_in_plain_test_corrupts_the_test_phase() {
        let (results, synthetic) = reconcile(ExitKind::Signaled(11), None, PLAIN);
        assert_eq!(
            results,
            [
                PhaseResult::None,
                PhaseResult::Corrupted,
                PhaseResult::None
            ]
        );
        assert_eq!(synthetic.as_deref(), Some("(exited with signal 11)"));
    }

    #[test]
    fn absolute_and_relative_programs_resolve_as_given() {
        assert_eq!(
            resolve_program("/usr/bin/valgrind"),
            PathBuf::from("/usr/bin/valgrind")
        );
        assert_eq!(resolve_program("./bexec"), PathBuf::from("./bexec"));
    }
}
