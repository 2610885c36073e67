/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use slog::debug;
use slog::warn;
use slog::Logger;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::device::DeviceState;
use crate::device::Serial;
use crate::pool::Pool;
use crate::runner::CommandRunner;

/// Default alt-mode command timeout (§6).
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Default interval between poll cycles (§6).
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Parses alt-mode device listing output into the set of serials currently
/// in alt-mode (§4.4 step 3, §6 grammar): one-or-more word characters, then
/// one-or-more whitespace, then the literal `fastboot`, then zero-or-more
/// whitespace, repeated as many times as it occurs in the output.
fn parse_alt_mode_serials(output: &str) -> HashSet<Serial> {
    // Built once per process; a static would require extra plumbing for no
    // real benefit at this call frequency (every POLL_INTERVAL).
    let pattern = Regex::new(r"(\w+)\s+fastboot\s*").expect("static pattern is valid");
    pattern
        .captures_iter(output)
        .map(|cap| Serial::new(cap[1].to_string()))
        .collect()
}

/// Reconciles allocated devices' recorded state against the current
/// alt-mode membership (§4.4 steps 4-5). Iterates `allocated` under its
/// lock while reading/writing state, as required by §5 to avoid
/// callback-into-manager deadlocks; nothing here calls back out to
/// listener code.
fn reconcile_allocated(pool: &Pool, in_alt_mode: &HashSet<Serial>, log: &Logger) {
    let allocated = pool.allocated.lock().expect("allocated map poisoned");
    for (serial, device) in allocated.iter() {
        let now_alt = in_alt_mode.contains(serial);
        let state = device.state();
        if now_alt && !state.is_alt_mode() {
            debug!(log, "device entered alt-mode"; "serial" => serial.as_str());
            device.set_state(DeviceState::Fastboot);
        } else if !now_alt && state.is_alt_mode() {
            debug!(log, "device left alt-mode"; "serial" => serial.as_str());
            device.set_state(DeviceState::NotAvailable);
        }
    }
}

/// Background loop (C7) reconciling devices entering/leaving alt-mode.
/// Gated on listener presence (§9: "Alt-mode polling is gated on listener
/// presence") to avoid invoking the external command when nobody cares.
pub struct AltModeMonitor {
    pool: Arc<Pool>,
    runner: Arc<dyn CommandRunner>,
    binary: String,
    poll_interval: Duration,
    command_timeout: Duration,
    log: Logger,
    stop: Arc<Notify>,
    // `Notify::notify_waiters` only wakes waiters already parked on
    // `notified()`; a call arriving while the loop is inside
    // `run_cycle_if_listeners_present` (up to `command_timeout` away from
    // the next `notified()` call) would otherwise be silently dropped and
    // the task would keep polling forever. This flag is checked both before
    // and after each cycle so the loop always notices a pending stop.
    stopped: AtomicBool,
}

impl AltModeMonitor {
    pub fn new(
        pool: Arc<Pool>,
        runner: Arc<dyn CommandRunner>,
        binary: impl Into<String>,
        poll_interval: Duration,
        command_timeout: Duration,
        log: Logger,
    ) -> Self {
        Self {
            pool,
            runner,
            binary: binary.into(),
            poll_interval,
            command_timeout,
            log,
            stop: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Probes whether the alt-mode tool is present by running `help`.
    /// Success, or a usage banner on stderr, both count as "available,
    /// possibly an old version" per `init`'s contract (§4.6); this is a
    /// heuristic, not a strict contract of the external tool.
    pub async fn is_available(&self) -> bool {
        match self
            .runner
            .run(self.command_timeout, &[&self.binary, "help"])
            .await
        {
            Ok(output) => {
                if output.success() {
                    true
                } else if !output.stderr.trim().is_empty() {
                    warn!(
                        self.log,
                        "alt-mode tool returned nonzero on `help`, assuming old version"
                    );
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(self.log, "alt-mode tool not runnable: {}", e);
                false
            }
        }
    }

    /// Spawns the monitor's background task. Cancellation is cooperative:
    /// `stop()` both sets a flag checked immediately before and after every
    /// cycle and wakes the task if it's parked in the inter-cycle sleep, so
    /// it exits within one in-flight cycle plus one poll interval at most
    /// (§5, cancellation) even if `stop()` lands while the external command
    /// is running.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if self.stopped.load(Ordering::Acquire) {
                    break;
                }
                self.run_cycle_if_listeners_present().await;
                if self.stopped.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = self.stop.notified() => break,
                    _ = self.runner.sleep(self.poll_interval) => {}
                }
            }
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }

    async fn run_cycle_if_listeners_present(&self) {
        if !self.pool.has_alt_mode_listeners() {
            return;
        }
        let output = match self
            .runner
            .run(self.command_timeout, &[&self.binary, "devices"])
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(self.log, "alt-mode devices command failed: {}", e);
                return;
            }
        };
        if !output.success() {
            warn!(self.log, "alt-mode devices command exited nonzero");
            return;
        }

        let in_alt_mode = parse_alt_mode_serials(&output.stdout);
        reconcile_allocated(&self.pool, &in_alt_mode, &self.log);

        let listeners = self
            .pool
            .alt_mode_listeners
            .lock()
            .expect("listeners poisoned")
            .clone();
        for listener in listeners {
            listener.on_cycle(&in_alt_mode);
        }
    }
}
