// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unit tests for native shared objects, butchered one at a time.
//!
//! A test object declares its tests as fixed-layout descriptor records
//! placed in a dedicated `bexec` section at link time (see [`section`] and
//! the declaration macros). The harness works in three stages:
//!
//! 1. **Discovery** dlopens each object, walks the descriptor array
//!    bracketed by `__start_bexec`/`__stop_bexec` and builds an
//!    object → suite → test tree.
//! 2. **Execution** forks one `bexec` runner process per selected test.
//!    The runner dlopens the object on its own, drives
//!    setup → test → teardown by descriptor index (passed through the
//!    environment) and reports per-phase results over a dedicated control
//!    pipe while test output is captured over a second pipe. A crashing
//!    test kills its runner, never the harness.
//! 3. **Reporting** classifies every test by its worst phase outcome and
//!    renders per-suite and overall tallies.
//!
//! The parent never blocks on a child: exit-status collection and pipe
//! drains are interleaved in a non-blocking poll loop.

#[cfg(unix)]
mod chopper;
#[cfg(unix)]
mod discovery;
#[cfg(unix)]
mod error;
#[cfg(unix)]
mod harness;
#[cfg(unix)]
mod macros;
#[cfg(unix)]
mod model;
#[cfg(unix)]
mod record;
#[cfg(unix)]
mod report;
#[cfg(unix)]
pub mod runner;
#[cfg(unix)]
pub mod section;

#[cfg(unix)]
pub use error::{Error, Result};
#[cfg(unix)]
pub use harness::{Butcher, Flags};
#[cfg(unix)]
pub use model::{LoadedObject, Log, LogLine, ResourceUsage, Suite, Test};
#[cfg(unix)]
pub use record::{Phase, PhaseResult, ResultRecord, PHASE_COUNT, RECORD_SIZE};
#[cfg(unix)]
pub use section::{FnDescriptor, FnKind, BT_RESULT_FAIL, BT_RESULT_IGNORE, BT_RESULT_OK};
