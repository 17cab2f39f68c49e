// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs a single test from a shared object, configured entirely through
//! the environment by the parent harness. Not meant to be invoked by
//! hand; see the harness for the variables it wants.

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() {
    use butcher::runner;

    let config = match runner::RunnerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("bexec: {error}");
            std::process::exit(-1);
        }
    };

    match runner::run(&config) {
        Ok(()) => runner::terminate(),
        Err(error) => {
            eprintln!("bexec: {error}");
            std::process::exit(-1);
        }
    }
}
