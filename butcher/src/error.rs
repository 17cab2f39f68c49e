// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::section::FnKind;
use nix::errno::Errno;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not load shared object: {0}")]
    LoadFailed(String),
    #[error("no descriptor section: missing symbol {0}")]
    NoDescriptors(&'static str),
    #[error("{kind} already bound for test '{suite}:{test}'")]
    DuplicateBinding {
        kind: FnKind,
        suite: String,
        test: String,
    },
    #[error("could not create pipe: {0}")]
    PipeCreateFailed(#[source] Errno),
    #[error("could not fork test runner: {0}")]
    ForkFailed(#[source] Errno),
    #[error("could not execute '{program}': {errno}")]
    ExecFailed { program: String, errno: Errno },
    #[error("malformed result record")]
    MalformedRecord,
    #[error("could not compile match pattern: {0}")]
    RegexCompileFailed(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
