/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::time::Duration;

use thiserror::Error;

use crate::device::Serial;

/// Errors surfaced by the public [`crate::manager::AllocationManager`] API.
///
/// This is deliberately a small, closed set: everything that can be handled
/// locally (a flappy probe, a failed alt-mode poll, exhausted connect
/// retries) is logged and swallowed inside the component that owns it, per
/// the error handling design — nothing in the allocation core bubbles up
/// "device behaved badly", that's the test-device wrapper's domain.
#[derive(Debug, Error)]
pub enum Error {
    /// A method other than `init` was called before `init` completed.
    #[error("device pool used before init()")]
    NotInitialized,

    /// `init` was called more than once.
    #[error("device pool already initialized")]
    AlreadyInitialized,

    /// An `aborted` recovery strategy, installed by `terminate_hard`, was
    /// invoked.
    #[error("aborted test session")]
    AbortedSession,

    /// The underlying device reported itself unavailable mid-operation.
    #[error("device {serial} is not available: {reason}")]
    DeviceNotAvailable { serial: Serial, reason: String },

    #[error(transparent)]
    Bridge(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a call into the blocking-conditioned queue (§4.1) ended without a
/// value. Distinguished from [`Error`] because neither case is exceptional:
/// callers treat both as "no device for you right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    /// The configured timeout elapsed with no matching element.
    TimedOut(Duration),
    /// The queue was halted (manager terminating) while the caller waited.
    Cancelled,
}
