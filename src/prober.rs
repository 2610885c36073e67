/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::time::Duration;

use slog::debug;
use slog::Logger;

use crate::device::DeviceHandle;
use crate::device::DeviceState;
use crate::filter::SelectionFilter;
use crate::monitor::DeviceStateMonitor;
use crate::pool::Pool;

/// Default stability window (§6): a newly-observed ONLINE device must stay
/// continuously online for this long before being admitted to `available`.
pub const STABILITY_WINDOW: Duration = Duration::from_secs(5);

/// Entry point for C6: called by the bridge listener whenever an unknown
/// ONLINE serial appears. Rejects devices that don't match the global
/// filter immediately; otherwise installs a `checking` entry (guarding
/// against duplicate probes for the same serial) and spawns a fire-and-
/// forget probe task that decides, after `stability_window`, whether to
/// admit the device to `available`.
///
/// The `checking` entry is removed on every exit path of the spawned task —
/// admitted, discarded, or the pool shutting down underneath it — so a
/// probe can never leak an entry (§4.3, finally-semantics).
pub fn probe_new_device(
    pool: Arc<Pool>,
    device: DeviceHandle,
    filter: &SelectionFilter,
    stability_window: Duration,
    log: Logger,
) {
    if !filter.matches(&device) {
        debug!(log, "rejecting newly seen device: does not match global filter";
            "serial" => device.serial().as_str());
        return;
    }

    let serial = device.serial().clone();
    let monitor = DeviceStateMonitor::new(device.state());

    {
        let mut checking = pool.checking.lock().expect("checking map poisoned");
        if checking.contains_key(&serial) {
            debug!(log, "already probing device, ignoring duplicate sighting";
                "serial" => serial.as_str());
            return;
        }
        checking.insert(serial.clone(), monitor.clone());
    }

    tokio::spawn(async move {
        let dropped_offline = tokio::time::timeout(
            stability_window,
            monitor.wait_for_not(DeviceState::Online),
        )
        .await
        .is_ok();

        // finally: always remove the checking entry before returning.
        pool.checking.lock().expect("checking map poisoned").remove(&serial);

        if dropped_offline {
            debug!(log, "device dropped offline during stability window, discarding";
                "serial" => serial.as_str());
        } else {
            debug!(log, "device passed stability window, admitting";
                "serial" => serial.as_str());
            pool.available.add(device);
        }
    });
}
