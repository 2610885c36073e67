/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::DeviceHandle;
use crate::device::Serial;

/// Which bits of a device's reported info changed, as delivered alongside
/// a [`BridgeEvent::Changed`] event (§6). Only the "state changed" bit is
/// significant to this crate; other bits are carried through for
/// completeness but otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeMask(u32);

impl ChangeMask {
    pub const STATE_CHANGED: ChangeMask = ChangeMask(1 << 0);
    pub const PROPERTIES_CHANGED: ChangeMask = ChangeMask(1 << 1);

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: ChangeMask) -> bool {
        self.0 & other.0 == other.0
    }
}

/// An event delivered from the bridge, or synthesized while enumerating
/// already-visible devices at `start()` time. Not an exhaustive list of
/// everything a real bridge might report; add variants as needed.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Connected(DeviceHandle),
    Disconnected(Serial),
    Changed(DeviceHandle, ChangeMask),
}

/// Receives events from a [`Bridge`]. Implemented by
/// [`crate::listener::BridgeListenerImpl`] (C8); the bridge's contract is
/// to deliver callbacks for a single serial in order, but is not required
/// to deliver callbacks for *different* serials on the same thread, so
/// implementations must not assume exclusive access across calls.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: BridgeEvent);
}

/// Capability interface for the external debug-bridge service (§6, C1).
/// Specified only as the surface this crate consumes: discovery and shell
/// execution live in the bridge client itself, out of scope per §1.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Registers a listener. Must be called before `start()`, otherwise the
    /// initial discovery burst can race listener installation and lose
    /// devices (§4.5).
    fn add_listener(&self, listener: Arc<dyn EventListener>);

    fn remove_listener(&self, listener: &Arc<dyn EventListener>);

    /// Begins discovery and event delivery.
    async fn start(&self) -> anyhow::Result<()>;

    /// A snapshot of every serial currently visible to the bridge,
    /// regardless of pool membership. Used by `getUnavailableDevices`.
    async fn get_devices(&self) -> anyhow::Result<Vec<DeviceHandle>>;

    /// Graceful shutdown: stop delivering events, release resources.
    async fn terminate(&self);

    /// Abrupt shutdown used by `terminateHard`: severs the connection
    /// without waiting for in-flight work.
    fn disconnect(&self);
}

/// Default bridge operation timeout (§6).
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);
