/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::device::Serial;
use crate::monitor::DeviceStateMonitor;
use crate::queue::PriorityConditionedQueue;
use crate::test_device::TestDevice;

/// Notified once per alt-mode poll cycle with the full set of serials
/// currently observed in alt-mode (§4.4 step 6).
pub trait AltModeListener: Send + Sync {
    fn on_cycle(&self, in_alt_mode: &HashSet<Serial>);
}

/// The process-wide pool state (§3): `allocated`, `available`, `checking`,
/// and the alt-mode listener set, each individually thread-safe. Built once
/// at `init()`, torn down at `terminate()`. Shared (via `Arc`) between the
/// manager, the bridge listener, the prober's spawned tasks, and the
/// alt-mode monitor — none of which ever holds a lock across more than one
/// of these structures at a time (§5, shared-resource policy).
pub struct Pool {
    pub allocated: Mutex<HashMap<Serial, Arc<TestDevice>>>,
    pub available: Arc<PriorityConditionedQueue>,
    pub checking: Mutex<HashMap<Serial, DeviceStateMonitor>>,
    pub alt_mode_listeners: Mutex<Vec<Arc<dyn AltModeListener>>>,
}

impl Pool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            allocated: Mutex::new(HashMap::new()),
            available: PriorityConditionedQueue::new(),
            checking: Mutex::new(HashMap::new()),
            alt_mode_listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn is_checking(&self, serial: &Serial) -> bool {
        self.checking.lock().expect("checking map poisoned").contains_key(serial)
    }

    pub fn is_allocated(&self, serial: &Serial) -> bool {
        self.allocated.lock().expect("allocated map poisoned").contains_key(serial)
    }

    pub fn is_available(&self, serial: &Serial) -> bool {
        self.available
            .iterate()
            .iter()
            .any(|d| d.serial() == serial)
    }

    pub fn has_alt_mode_listeners(&self) -> bool {
        !self
            .alt_mode_listeners
            .lock()
            .expect("listeners poisoned")
            .is_empty()
    }
}
