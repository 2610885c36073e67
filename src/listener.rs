/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use slog::debug;
use slog::Logger;

use crate::bridge::BridgeEvent;
use crate::bridge::ChangeMask;
use crate::bridge::EventListener;
use crate::device::DeviceHandle;
use crate::device::DeviceState;
use crate::device::Serial;
use crate::filter::SelectionFilter;
use crate::pool::Pool;
use crate::prober;

/// Routes connect/disconnect/change events from the bridge to the pool's
/// structures (§4.5, C8).
///
/// The bridge's contract only promises serial delivery of callbacks *for a
/// single device*; it does not promise every event arrives on the same
/// thread. This listener therefore serializes its own handlers behind a
/// lock so the disjointness invariant (§3 invariant 1) cannot be observed
/// violated, even transiently, by a diagnostics read on another thread
/// (§4.5, expanded note).
pub struct BridgeListenerImpl {
    pool: Arc<Pool>,
    filter: SelectionFilter,
    stability_window: Duration,
    log: Logger,
    serialize: Mutex<()>,
}

impl BridgeListenerImpl {
    pub fn new(
        pool: Arc<Pool>,
        filter: SelectionFilter,
        stability_window: Duration,
        log: Logger,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            filter,
            stability_window,
            log,
            serialize: Mutex::new(()),
        })
    }

    fn handle_connected(&self, handle: DeviceHandle) {
        let serial = handle.serial().clone();

        if let Some(device) = self.pool.allocated.lock().expect("allocated poisoned").get(&serial)
        {
            debug!(self.log, "bridge re-issued handle for allocated device";
                "serial" => serial.as_str());
            device.replace_handle(handle);
            return;
        }

        if serial.is_valid() && handle.state() == DeviceState::Online {
            prober::probe_new_device(
                Arc::clone(&self.pool),
                handle,
                &self.filter,
                self.stability_window,
                self.log.clone(),
            );
            return;
        }

        let checking = self.pool.checking.lock().expect("checking poisoned");
        if let Some(monitor) = checking.get(&serial) {
            monitor.set_state(handle.state());
        }
    }

    fn handle_changed(&self, handle: DeviceHandle, mask: ChangeMask) {
        if !mask.contains(ChangeMask::STATE_CHANGED) {
            return;
        }
        let serial = handle.serial().clone();

        if let Some(device) = self.pool.allocated.lock().expect("allocated poisoned").get(&serial)
        {
            device.monitor().set_state(handle.state());
            return;
        }

        {
            let checking = self.pool.checking.lock().expect("checking poisoned");
            if let Some(monitor) = checking.get(&serial) {
                monitor.set_state(handle.state());
                return;
            }
        }

        if !self.pool.is_available(&serial) && handle.state() == DeviceState::Online {
            prober::probe_new_device(
                Arc::clone(&self.pool),
                handle,
                &self.filter,
                self.stability_window,
                self.log.clone(),
            );
        }
    }

    fn handle_disconnected(&self, serial: Serial) {
        if self.pool.available.remove(&serial) {
            debug!(self.log, "removed disconnected device from available pool";
                "serial" => serial.as_str());
        }

        if let Some(device) = self.pool.allocated.lock().expect("allocated poisoned").get(&serial)
        {
            device.monitor().set_state(DeviceState::NotAvailable);
        }

        let checking = self.pool.checking.lock().expect("checking poisoned");
        if let Some(monitor) = checking.get(&serial) {
            monitor.set_state(DeviceState::NotAvailable);
        }
    }
}

impl EventListener for BridgeListenerImpl {
    fn on_event(&self, event: BridgeEvent) {
        let _guard = self.serialize.lock().expect("listener lock poisoned");
        match event {
            BridgeEvent::Connected(handle) => self.handle_connected(handle),
            BridgeEvent::Changed(handle, mask) => self.handle_changed(handle, mask),
            BridgeEvent::Disconnected(serial) => self.handle_disconnected(serial),
        }
    }
}
