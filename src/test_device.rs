/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use async_trait::async_trait;
use slog::debug;
use slog::Logger;

use crate::device::DeviceHandle;
use crate::device::DeviceState;
use crate::device::Serial;
use crate::error::Error;
use crate::error::Result;
use crate::monitor::DeviceStateMonitor;

/// Pluggable behavior invoked by a [`TestDevice`] when its underlying
/// connection is deemed broken, producing either a restored device or a
/// terminal error (§9, glossary: "Recovery strategy").
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    async fn recover(&self, device: &TestDevice) -> Result<()>;
}

/// The default strategy installed on a freshly-allocated device: recovery
/// is a no-op success. A real implementation would live in the test-device
/// wrapper's own crate (out of scope per §1); this crate only needs
/// somewhere to hang the *pluggable* part of the interface.
#[derive(Debug, Default)]
pub struct NoopRecoveryStrategy;

#[async_trait]
impl RecoveryStrategy for NoopRecoveryStrategy {
    async fn recover(&self, _device: &TestDevice) -> Result<()> {
        Ok(())
    }
}

/// Installed by `terminateHard` (§4.6, invariant 5): its sole behavior is
/// to raise an aborted-session error on the next recovery attempt.
#[derive(Debug, Default)]
pub struct AbortRecoveryStrategy;

#[async_trait]
impl RecoveryStrategy for AbortRecoveryStrategy {
    async fn recover(&self, _device: &TestDevice) -> Result<()> {
        Err(Error::AbortedSession)
    }
}

/// Installed by `connectToTcpDevice` (§4.6): recovery just means waiting
/// for the device's monitor to report it back online, since a TCP device
/// that drops and re-appears under the same address typically just needs
/// time to resume its connection.
pub struct WaitForOnlineRecoveryStrategy;

#[async_trait]
impl RecoveryStrategy for WaitForOnlineRecoveryStrategy {
    async fn recover(&self, device: &TestDevice) -> Result<()> {
        device.monitor().wait_for(DeviceState::Online).await;
        Ok(())
    }
}

/// A narrow capability the manager exposes back to a [`TestDevice`], to
/// avoid the test-device holding (and needing to lock around) the whole
/// manager (§9, "Cyclic references").
pub trait ManagerCapability: Send + Sync {
    fn mark_unavailable(&self, serial: &Serial);
}

/// Pluggable behavior for asking a device to switch its active transport,
/// invoked by `reconnectDeviceToTcp`/`disconnectFromTcpDevice` (§4.6). Real
/// implementations live in the test-device wrapper's own crate (a shell
/// command against the device, out of scope per §1); this crate only needs
/// somewhere to hang the *pluggable* part of the interface, the same role
/// [`RecoveryStrategy`] plays for recovery.
#[async_trait]
pub trait TransportSwitch: Send + Sync {
    /// Asks the device to switch onto its secondary (TCP) transport,
    /// returning the `addr:port` it can now be reached at.
    async fn switch_to_secondary(&self, device: &TestDevice) -> Result<String>;
    /// Asks the device to switch back onto its primary (USB) transport.
    async fn switch_to_primary(&self, device: &TestDevice) -> Result<()>;
}

/// Installed on every freshly-allocated device: neither direction is
/// supported, matching [`NoopRecoveryStrategy`]'s role as a stand-in for the
/// out-of-scope wrapper until a caller installs a real one.
#[derive(Debug, Default)]
pub struct UnsupportedTransportSwitch;

#[async_trait]
impl TransportSwitch for UnsupportedTransportSwitch {
    async fn switch_to_secondary(&self, device: &TestDevice) -> Result<String> {
        Err(Error::DeviceNotAvailable {
            serial: device.serial(),
            reason: "device does not support switching to a secondary transport".to_string(),
        })
    }

    async fn switch_to_primary(&self, device: &TestDevice) -> Result<()> {
        Err(Error::DeviceNotAvailable {
            serial: device.serial(),
            reason: "device does not support switching to a primary transport".to_string(),
        })
    }
}

/// Wraps a [`DeviceHandle`] together with a state monitor, a pluggable
/// recovery strategy, a log-capture toggle, and a fastboot-enabled flag
/// (§3). Created by the allocation manager on a successful `allocate`;
/// destroyed (log capture stopped) on `free`.
pub struct TestDevice {
    handle: Mutex<DeviceHandle>,
    monitor: DeviceStateMonitor,
    recovery: Mutex<Arc<dyn RecoveryStrategy>>,
    transport: Mutex<Arc<dyn TransportSwitch>>,
    log_capture_active: Mutex<bool>,
    fastboot_enabled: bool,
    manager: Option<Weak<dyn ManagerCapability>>,
    log: Logger,
}

impl TestDevice {
    pub fn new(
        handle: DeviceHandle,
        fastboot_enabled: bool,
        manager: Option<Weak<dyn ManagerCapability>>,
        log: Logger,
    ) -> Arc<Self> {
        let monitor = DeviceStateMonitor::new(handle.state());
        Arc::new(Self {
            handle: Mutex::new(handle),
            monitor,
            recovery: Mutex::new(Arc::new(NoopRecoveryStrategy)),
            transport: Mutex::new(Arc::new(UnsupportedTransportSwitch)),
            log_capture_active: Mutex::new(false),
            fastboot_enabled,
            manager,
            log,
        })
    }

    pub fn serial(&self) -> Serial {
        self.handle.lock().expect("handle poisoned").serial().clone()
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle.lock().expect("handle poisoned").clone()
    }

    /// Replaces the underlying bridge handle reference without reprobing
    /// (used when a `Connected` event re-issues the handle for an already
    /// allocated serial, §4.5).
    pub fn replace_handle(&self, new_handle: DeviceHandle) {
        self.monitor.set_state(new_handle.state());
        *self.handle.lock().expect("handle poisoned") = new_handle;
    }

    pub fn monitor(&self) -> &DeviceStateMonitor {
        &self.monitor
    }

    pub fn state(&self) -> DeviceState {
        self.monitor.state()
    }

    pub fn set_state(&self, state: DeviceState) {
        self.monitor.set_state(state);
        self.handle.lock().expect("handle poisoned").set_state(state);
    }

    pub fn fastboot_enabled(&self) -> bool {
        self.fastboot_enabled
    }

    pub fn set_recovery_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        *self.recovery.lock().expect("recovery poisoned") = strategy;
    }

    pub async fn recover_device(&self) -> Result<()> {
        let strategy = self.recovery.lock().expect("recovery poisoned").clone();
        strategy.recover(self).await
    }

    pub fn set_transport_switch(&self, switch: Arc<dyn TransportSwitch>) {
        *self.transport.lock().expect("transport poisoned") = switch;
    }

    /// Asks the device to switch onto its secondary (TCP) transport,
    /// returning the `addr:port` it can now be reached at (§4.6
    /// `reconnectDeviceToTcp`).
    pub async fn switch_to_secondary(&self) -> Result<String> {
        let switch = self.transport.lock().expect("transport poisoned").clone();
        switch.switch_to_secondary(self).await
    }

    /// Asks the device to switch back onto its primary (USB) transport
    /// (§4.6 `disconnectFromTcpDevice`).
    pub async fn switch_to_primary(&self) -> Result<()> {
        let switch = self.transport.lock().expect("transport poisoned").clone();
        switch.switch_to_primary(self).await
    }

    pub fn start_log_capture(&self) {
        *self.log_capture_active.lock().expect("log capture poisoned") = true;
        debug!(self.log, "started log capture"; "serial" => self.serial().as_str());
    }

    pub fn stop_log_capture(&self) {
        let mut active = self.log_capture_active.lock().expect("log capture poisoned");
        if *active {
            *active = false;
            debug!(self.log, "stopped log capture"; "serial" => self.serial().as_str());
        }
    }

    pub fn log_capture_active(&self) -> bool {
        *self.log_capture_active.lock().expect("log capture poisoned")
    }

    /// Lets a future recovery strategy report the device permanently gone
    /// without holding onto the whole manager.
    pub fn mark_unavailable(&self) {
        self.set_state(DeviceState::NotAvailable);
        if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade) {
            manager.mark_unavailable(&self.serial());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    fn handle(serial: &str) -> DeviceHandle {
        DeviceHandle::new(Serial::new(serial), DeviceKind::Real, DeviceState::Online)
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn default_recovery_succeeds() {
        let device = TestDevice::new(handle("A"), false, None, test_logger());
        assert!(device.recover_device().await.is_ok());
    }

    #[tokio::test]
    async fn abort_recovery_surfaces_aborted_session() {
        let device = TestDevice::new(handle("A"), false, None, test_logger());
        device.set_recovery_strategy(Arc::new(AbortRecoveryStrategy));
        let err = device.recover_device().await.unwrap_err();
        assert!(matches!(err, Error::AbortedSession));
        assert!(err.to_string().contains("aborted"));
    }

    #[tokio::test]
    async fn default_transport_switch_is_unsupported() {
        let device = TestDevice::new(handle("A"), false, None, test_logger());
        assert!(device.switch_to_secondary().await.is_err());
        assert!(device.switch_to_primary().await.is_err());
    }

    #[tokio::test]
    async fn installed_transport_switch_is_used() {
        struct Fixed;
        #[async_trait::async_trait]
        impl TransportSwitch for Fixed {
            async fn switch_to_secondary(&self, _device: &TestDevice) -> Result<String> {
                Ok("1.2.3.4:5555".to_string())
            }
            async fn switch_to_primary(&self, _device: &TestDevice) -> Result<()> {
                Ok(())
            }
        }

        let device = TestDevice::new(handle("A"), false, None, test_logger());
        device.set_transport_switch(Arc::new(Fixed));
        assert_eq!(device.switch_to_secondary().await.unwrap(), "1.2.3.4:5555");
        assert!(device.switch_to_primary().await.is_ok());
    }

    #[tokio::test]
    async fn replace_handle_updates_monitor_state() {
        let device = TestDevice::new(handle("A"), false, None, test_logger());
        assert_eq!(device.state(), DeviceState::Online);
        device.replace_handle(DeviceHandle::new(
            Serial::new("A"),
            DeviceKind::Real,
            DeviceState::Offline,
        ));
        assert_eq!(device.state(), DeviceState::Offline);
    }
}
