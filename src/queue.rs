/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::device::DeviceHandle;
use crate::error::TakeOutcome;

/// Lifecycle of the queue itself, mirroring the `Running`/`Aborted`/`Done`
/// three-state model this codebase already uses for its other blocking
/// queues (see the `unordered_element_queue` in the sibling `sync`
/// primitives): `Halted` is the terminal state reached once, entered by
/// `halt()` and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Running,
    Halted,
}

struct Inner {
    items: VecDeque<DeviceHandle>,
    state: QueueState,
}

/// A thread-safe, FIFO, unbounded queue of device handles whose
/// distinguishing operation is `take`/`poll` *under a predicate*: the
/// oldest element satisfying an arbitrary closure is returned and removed,
/// blocking the caller until one exists or a timeout elapses (§4.1).
///
/// Backed by a mutex protecting a `VecDeque` plus a condvar, exactly as
/// described in the design: `add` always broadcasts (not `notify_one`)
/// because waiters hold non-overlapping predicates and any of them might be
/// the one unblocked by the new element. Waiters re-scan from the head on
/// every wake; there is no fairness guarantee beyond FIFO-among-matches.
pub struct PriorityConditionedQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl PriorityConditionedQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: QueueState::Running,
            }),
            cv: Condvar::new(),
        })
    }

    /// Appends to the tail. Never blocks. No-op (device dropped) once
    /// halted.
    pub fn add(&self, device: DeviceHandle) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.state != QueueState::Running {
            return;
        }
        inner.items.push_back(device);
        self.cv.notify_all();
    }

    /// Removes by identity (matching serial), returning whether it was
    /// present.
    pub fn remove(&self, serial: &crate::device::Serial) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let before = inner.items.len();
        inner.items.retain(|d| d.serial() != serial);
        inner.items.len() != before
    }

    /// A snapshot consistent at call time; diagnostics only (§4.1).
    pub fn iterate(&self) -> Vec<DeviceHandle> {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.items.iter().cloned().collect()
    }

    /// Blocks indefinitely until an element matching `pred` is available,
    /// or the queue is halted.
    pub fn take(
        &self,
        pred: impl Fn(&DeviceHandle) -> bool,
    ) -> Result<DeviceHandle, TakeOutcome> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            if let Some(pos) = inner.items.iter().position(&pred) {
                return Ok(inner.items.remove(pos).expect("position just located"));
            }
            if inner.state != QueueState::Running {
                return Err(TakeOutcome::Cancelled);
            }
            inner = self.cv.wait(inner).expect("queue mutex poisoned");
        }
    }

    /// As `take`, but gives up after `timeout` elapses.
    pub fn poll(
        &self,
        pred: impl Fn(&DeviceHandle) -> bool,
        timeout: Duration,
    ) -> Result<DeviceHandle, TakeOutcome> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            if let Some(pos) = inner.items.iter().position(&pred) {
                return Ok(inner.items.remove(pos).expect("position just located"));
            }
            if inner.state != QueueState::Running {
                return Err(TakeOutcome::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TakeOutcome::TimedOut(timeout));
            }
            let (guard, result) = self
                .cv
                .wait_timeout(inner, deadline - now)
                .expect("queue mutex poisoned");
            inner = guard;
            if result.timed_out() && inner.state == QueueState::Running {
                // Re-check the predicate once more before declaring a
                // timeout: the wakeup may have raced the deadline.
                if let Some(pos) = inner.items.iter().position(&pred) {
                    return Ok(inner.items.remove(pos).expect("position just located"));
                }
                return Err(TakeOutcome::TimedOut(timeout));
            }
        }
    }

    /// Stops the queue: further `add`s are dropped, and every blocked (or
    /// future) waiter observes [`TakeOutcome::Cancelled`] instead of
    /// hanging.
    pub fn halt(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.state = QueueState::Halted;
        self.cv.notify_all();
    }
}
