// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs of the real `butcher` binary against the sample test
//! object. Each scenario drives one classification path: success,
//! failure, ignore, crash, fixtures and the match filters.

#![cfg(unix)]

use bin_tests::HarnessArtifacts;
use regex::Regex;

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
#[cfg_attr(miri, ignore)]
fn single_passing_test_reports_full_success() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-s", "^foosuite$", "-t", "^empty$"])
        .unwrap();
    let report = stdout(&output);

    assert!(
        report.contains("1/1 tests succeeded (100%), 0 ignored, 0 failed, 0 corrupted"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(0), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn crashing_test_is_corrupted_not_fatal() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-t", "^(empty|sigsegv)$"])
        .unwrap();
    let report = stdout(&output);

    // The harness survives the child's SIGSEGV and keeps counting.
    assert!(report.contains("(exited with signal 11)"), "report was:\n{report}");
    assert!(
        report.contains("test corrupted"),
        "report was:\n{report}"
    );
    assert!(
        report.contains("1/2 tests succeeded (50%), 0 ignored, 0 failed, 1 corrupted"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(3), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn fixtured_test_runs_all_three_phases() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-v", "-t", "^buffered$"])
        .unwrap();
    let report = stdout(&output);

    assert!(
        report.contains("setup succeeded, test succeeded, teardown succeeded"),
        "report was:\n{report}"
    );
    assert!(report.contains("-> [succeeded]"), "report was:\n{report}");
    assert_eq!(output.status.code(), Some(0), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn ignored_setup_skips_test_and_teardown() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts.run_butcher(&["-t", "^skipped$"]).unwrap();
    let report = stdout(&output);

    // Only the setup phase shows up; the test and teardown never ran.
    assert!(report.contains("setup ignored"), "report was:\n{report}");
    assert!(!report.contains("never reached"), "report was:\n{report}");
    assert!(
        report.contains("0/1 tests succeeded (0%), 1 ignored, 0 failed, 0 corrupted"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(2), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn failing_assertion_is_reported_with_its_log() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts.run_butcher(&["-t", "^always_fails$"]).unwrap();
    let report = stdout(&output);

    assert!(report.contains("test failed"), "report was:\n{report}");
    assert!(
        report.contains("assertion 1 + 1 == 3 failed"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(1), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn suite_filter_excludes_other_suites() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-s", "^bar", "-t", "^also_empty$"])
        .unwrap();
    let report = stdout(&output);

    // foosuite tests never run, so they contribute nothing to the counts.
    let summary = Regex::new(r"=> 1/1 tests succeeded \(100%\)").unwrap();
    assert!(summary.is_match(&report), "report was:\n{report}");
    assert!(
        !report.contains("(exited with signal"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(0), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn captured_log_lines_show_up_with_messages_enabled() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-vvv", "-t", "^logging$"])
        .unwrap();
    let report = stdout(&output);

    assert!(
        report.contains("entered the logging test"),
        "report was:\n{report}"
    );
    assert!(
        report.contains("leaving the logging test"),
        "report was:\n{report}"
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn list_mode_dumps_the_tree_without_running() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts.run_butcher(&["--list"]).unwrap();
    let report = stdout(&output);

    assert!(report.contains("name='foosuite'"), "report was:\n{report}");
    assert!(report.contains("name='barsuite'"), "report was:\n{report}");
    assert!(report.contains("name='sigsegv'"), "report was:\n{report}");
    // Fixture indexes are attached to the fixtured test.
    let fixtured = Regex::new(r"name='buffered', function=\d+, setup=\d+, teardown=\d+").unwrap();
    assert!(fixtured.is_match(&report), "report was:\n{report}");
    // Listing runs nothing, so the crashing test cannot have crashed.
    assert!(
        !report.contains("exited with signal"),
        "report was:\n{report}"
    );
    assert_eq!(output.status.code(), Some(0), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn verbose_report_includes_resource_usage() {
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = artifacts
        .run_butcher(&["-v", "-t", "^longtest$"])
        .unwrap();
    let report = stdout(&output);

    let rusage = Regex::new(r"-> rusage: user \d+\.\d{3}s, system \d+\.\d{3}s, maxrss \d+ KiB")
        .unwrap();
    assert!(rusage.is_match(&report), "report was:\n{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn runner_without_environment_reports_its_own_error() {
    // bexec started by hand, with no contract in the environment, must
    // fail fast rather than run anything.
    let artifacts = HarnessArtifacts::build().unwrap();
    let output = std::process::Command::new(&artifacts.bexec)
        .env_remove("butcher_elf_name")
        .env_remove("butcher_test_function")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(255));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("butcher_elf_name"), "stderr was:\n{stderr}");
}
