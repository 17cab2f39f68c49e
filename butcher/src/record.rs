// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fixed-layout result record exchanged on the control pipe.
//!
//! The runner writes one record per completed phase plus a final record
//! with the done marker set; each record carries the results of every
//! phase seen so far, so the latest record always supersedes the earlier
//! ones. A record is written with a single `write` call and is smaller
//! than PIPE_BUF, so the reader only ever sees whole frames and may chop
//! the stream into record-sized chunks.

use crate::error::{Error, Result};

/// Sentinel prefix of every record: four magic bytes and a NUL.
pub const RECORD_MAGIC: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x00];

/// Number of phases a test run goes through.
pub const PHASE_COUNT: usize = 3;

/// Size of an encoded [`ResultRecord`]: magic, one byte per phase, done.
pub const RECORD_SIZE: usize = RECORD_MAGIC.len() + PHASE_COUNT + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Setup = 0,
    Test = 1,
    Teardown = 2,
}

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [Phase::Setup, Phase::Test, Phase::Teardown];

    pub fn label(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Test => "test",
            Phase::Teardown => "teardown",
        }
    }
}

/// Outcome of a single phase.
///
/// The declaration order is the badness order: the worst-phase result of a
/// test is simply the `max` of its phase vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PhaseResult {
    /// The phase was never entered.
    #[default]
    None,
    Succeeded,
    Failed,
    Ignored,
    Corrupted,
}

impl PhaseResult {
    /// Maps a test callable's return code to a phase result.
    pub fn from_code(code: std::ffi::c_int) -> Self {
        match code {
            crate::section::BT_RESULT_OK => PhaseResult::Succeeded,
            crate::section::BT_RESULT_IGNORE => PhaseResult::Ignored,
            crate::section::BT_RESULT_FAIL => PhaseResult::Failed,
            _ => PhaseResult::Corrupted,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            PhaseResult::None => 0xff,
            PhaseResult::Succeeded => 0,
            PhaseResult::Failed => 1,
            PhaseResult::Ignored => 2,
            PhaseResult::Corrupted => 3,
        }
    }

    pub(crate) fn from_wire(byte: u8) -> Self {
        match byte {
            0 => PhaseResult::Succeeded,
            1 => PhaseResult::Failed,
            2 => PhaseResult::Ignored,
            3 => PhaseResult::Corrupted,
            _ => PhaseResult::None,
        }
    }

    /// True once the phase actually ran (or was ruled corrupted).
    pub fn is_run(self) -> bool {
        self != PhaseResult::None
    }

    pub fn label(self) -> &'static str {
        match self {
            PhaseResult::None => "none",
            PhaseResult::Succeeded => "succeeded",
            PhaseResult::Failed => "failed",
            PhaseResult::Ignored => "ignored",
            PhaseResult::Corrupted => "corrupted",
        }
    }
}

impl std::fmt::Display for PhaseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One frame on the control channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultRecord {
    pub results: [PhaseResult; PHASE_COUNT],
    pub done: bool,
}

impl ResultRecord {
    pub fn set(&mut self, phase: Phase, result: PhaseResult) {
        self.results[phase as usize] = result;
    }

    pub fn get(&self, phase: Phase) -> PhaseResult {
        self.results[phase as usize]
    }

    /// Worst result across all phases.
    pub fn worst(&self) -> PhaseResult {
        self.results.iter().copied().max().unwrap_or_default()
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[..RECORD_MAGIC.len()].copy_from_slice(&RECORD_MAGIC);
        for (slot, result) in buf[RECORD_MAGIC.len()..][..PHASE_COUNT]
            .iter_mut()
            .zip(self.results)
        {
            *slot = result.to_wire();
        }
        buf[RECORD_SIZE - 1] = u8::from(self.done);
        buf
    }

    /// Decodes one frame; anything but a whole, magic-prefixed record fails.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE || bytes[..RECORD_MAGIC.len()] != RECORD_MAGIC {
            return Err(Error::MalformedRecord);
        }
        let mut results = [PhaseResult::None; PHASE_COUNT];
        for (result, byte) in results.iter_mut().zip(&bytes[RECORD_MAGIC.len()..]) {
            *result = PhaseResult::from_wire(*byte);
        }
        Ok(ResultRecord {
            results,
            done: bytes[RECORD_SIZE - 1] != 0,
        })
    }
}
