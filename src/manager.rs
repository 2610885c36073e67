/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::altmode::AltModeMonitor;
use crate::altmode::COMMAND_TIMEOUT as DEFAULT_COMMAND_TIMEOUT;
use crate::altmode::POLL_INTERVAL as DEFAULT_POLL_INTERVAL;
use crate::bridge::Bridge;
use crate::bridge::DEFAULT_BRIDGE_TIMEOUT;
use crate::device::emulator_placeholder_serial;
use crate::device::null_placeholder_serial;
use crate::device::DeviceHandle;
use crate::device::DeviceKind;
use crate::device::DeviceState;
use crate::device::Serial;
use crate::error::Error;
use crate::error::Result;
use crate::error::TakeOutcome;
use crate::filter::SelectionFilter;
use crate::listener::BridgeListenerImpl;
use crate::pool::Pool;
use crate::prober::STABILITY_WINDOW as DEFAULT_STABILITY_WINDOW;
use crate::runner::CommandRunner;
use crate::test_device::ManagerCapability;
use crate::test_device::TestDevice;
use crate::test_device::WaitForOnlineRecoveryStrategy;

/// How a consumer wants to leave a device when calling `free` (§4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeState {
    /// Healthy: return the underlying handle to `available`.
    Available,
    /// Broken: do not re-add; the bridge must re-announce it.
    Unavailable,
    /// Flaky but not condemned: return to `available` anyway.
    Unresponsive,
    /// Caller takes responsibility; do not re-add (used mid secondary-
    /// transport connect).
    Ignore,
}

/// Construction-time configuration for an [`AllocationManager`] (§4.6
/// `init`). Durations default to the constants named in §6; callers should
/// rarely need to override them outside tests.
#[derive(Clone)]
pub struct ManagerConfig {
    pub num_emulators: u32,
    pub num_null_devices: u32,
    pub global_filter: SelectionFilter,
    pub alt_mode_binary: String,
    pub stability_window: Duration,
    pub alt_mode_poll_interval: Duration,
    pub alt_mode_command_timeout: Duration,
    pub bridge_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            num_emulators: 0,
            num_null_devices: 0,
            global_filter: SelectionFilter::matches_any(),
            alt_mode_binary: "alt-mode".to_string(),
            stability_window: DEFAULT_STABILITY_WINDOW,
            alt_mode_poll_interval: DEFAULT_POLL_INTERVAL,
            alt_mode_command_timeout: DEFAULT_COMMAND_TIMEOUT,
            bridge_timeout: DEFAULT_BRIDGE_TIMEOUT,
        }
    }
}

struct Started {
    bridge: Arc<dyn Bridge>,
    listener: Arc<BridgeListenerImpl>,
    alt_mode: Option<Arc<AltModeMonitor>>,
}

/// Public façade (§4.6, C9): the only type consumers of this crate
/// construct directly. Everything else (`Pool`, the prober, the bridge
/// listener, the alt-mode monitor) is an implementation detail reachable
/// only through this type's methods.
pub struct AllocationManager {
    pool: Arc<Pool>,
    config: ManagerConfig,
    runner: Arc<dyn CommandRunner>,
    log: Logger,
    started: Mutex<Option<Started>>,
}

impl ManagerCapability for AllocationManager {
    fn mark_unavailable(&self, serial: &Serial) {
        if let Some(device) = self.pool.allocated.lock().expect("allocated poisoned").get(serial) {
            device.set_state(DeviceState::NotAvailable);
        }
    }
}

impl AllocationManager {
    /// Constructs (but does not `init`) a manager around injected
    /// collaborators, matching the "singleton must be constructible in
    /// tests" design note (§9): production call sites build a real bridge
    /// and a [`crate::runner::ProcessCommandRunner`]; tests substitute
    /// fakes.
    pub fn new(config: ManagerConfig, runner: Arc<dyn CommandRunner>, log: Logger) -> Arc<Self> {
        Arc::new(Self {
            pool: Pool::new(),
            config,
            runner,
            log,
            started: Mutex::new(None),
        })
    }

    /// §4.6 `init`: builds placeholders, probes alt-mode availability,
    /// registers the listener *before* starting the bridge, and starts the
    /// alt-mode monitor if the tool is usable. Fails with
    /// [`Error::AlreadyInitialized`] if called twice.
    pub async fn init(self: &Arc<Self>, bridge: Arc<dyn Bridge>) -> Result<()> {
        {
            let started = self.started.lock().expect("started poisoned");
            if started.is_some() {
                return Err(Error::AlreadyInitialized);
            }
        }

        for i in 0..self.config.num_emulators {
            self.pool.available.add(DeviceHandle::placeholder(
                emulator_placeholder_serial(i),
                DeviceKind::EmulatorPlaceholder,
            ));
        }
        for i in 0..self.config.num_null_devices {
            self.pool.available.add(DeviceHandle::placeholder(
                null_placeholder_serial(i),
                DeviceKind::NullPlaceholder,
            ));
        }

        let listener = BridgeListenerImpl::new(
            Arc::clone(&self.pool),
            self.config.global_filter.clone(),
            self.config.stability_window,
            self.log.clone(),
        );
        bridge.add_listener(listener.clone() as Arc<dyn crate::bridge::EventListener>);
        bridge.start().await.map_err(Error::Bridge)?;

        let alt_mode_monitor = AltModeMonitor::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.runner),
            self.config.alt_mode_binary.clone(),
            self.config.alt_mode_poll_interval,
            self.config.alt_mode_command_timeout,
            self.log.clone(),
        );
        let alt_mode = if alt_mode_monitor.is_available().await {
            let monitor = Arc::new(alt_mode_monitor);
            monitor.clone().spawn();
            Some(monitor)
        } else {
            info!(self.log, "alt-mode tool unavailable, alt-mode monitor disabled");
            None
        };

        *self.started.lock().expect("started poisoned") = Some(Started {
            bridge,
            listener,
            alt_mode,
        });
        Ok(())
    }

    fn require_started(&self) -> Result<()> {
        if self.started.lock().expect("started poisoned").is_none() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Blocks indefinitely for a device matching `filter`. Per §7,
    /// cancellation (the queue being halted by `terminate`) is a normal
    /// outcome, not an error: it surfaces as `Ok(None)`, exactly like a
    /// timed-out `allocate_with_timeout`.
    pub async fn allocate(self: &Arc<Self>, filter: &SelectionFilter) -> Result<Option<Arc<TestDevice>>> {
        self.require_started()?;
        let pool = Arc::clone(&self.pool);
        let filter = filter.clone();
        let handle = tokio::task::spawn_blocking(move || pool.available.take(move |d| filter.matches(d)))
            .await
            .expect("take task panicked");
        match handle {
            Ok(handle) => Ok(Some(self.admit(handle))),
            // `take()` only ever fails with `Cancelled`; `TimedOut` is
            // `poll()`'s variant, kept here only to satisfy exhaustiveness.
            Err(TakeOutcome::Cancelled) | Err(TakeOutcome::TimedOut(_)) => Ok(None),
        }
    }

    /// Blocks up to `timeout` for a device matching `filter`; `None` on
    /// expiry, matching §7 ("no-device-available is normal, signalled by
    /// returning none").
    pub async fn allocate_with_timeout(
        self: &Arc<Self>,
        timeout: Duration,
        filter: &SelectionFilter,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.require_started()?;
        let pool = Arc::clone(&self.pool);
        let filter = filter.clone();
        let handle =
            tokio::task::spawn_blocking(move || pool.available.poll(move |d| filter.matches(d), timeout))
                .await
                .expect("poll task panicked");
        match handle {
            Ok(handle) => Ok(Some(self.admit(handle))),
            Err(TakeOutcome::TimedOut(_)) => Ok(None),
            Err(TakeOutcome::Cancelled) => Ok(None),
        }
    }

    fn admit(self: &Arc<Self>, handle: DeviceHandle) -> Arc<TestDevice> {
        let serial = handle.serial().clone();
        let fastboot_enabled = handle.kind() == DeviceKind::Real;
        let manager: Weak<dyn ManagerCapability> = Arc::downgrade(self) as Weak<dyn ManagerCapability>;
        let device = TestDevice::new(handle, fastboot_enabled, Some(manager), self.log.clone());
        device.start_log_capture();
        self.pool
            .allocated
            .lock()
            .expect("allocated poisoned")
            .insert(serial, Arc::clone(&device));
        device
    }

    /// §4.6 `free`: idempotent-tolerant (logs, does not error, if the
    /// serial was already gone).
    pub fn free(&self, device: &Arc<TestDevice>, post_state: FreeState) -> Result<()> {
        self.require_started()?;
        device.stop_log_capture();
        let serial = device.serial();
        let removed = self
            .pool
            .allocated
            .lock()
            .expect("allocated poisoned")
            .remove(&serial)
            .is_some();
        if !removed {
            warn!(self.log, "freed device was not in allocated map"; "serial" => serial.as_str());
        }

        match post_state {
            FreeState::Available | FreeState::Unresponsive => {
                self.pool.available.add(device.handle());
            }
            FreeState::Unavailable | FreeState::Ignore => {}
        }
        Ok(())
    }

    /// §4.6 `connectToTcpDevice`: pre-registers a stub in `allocated` under
    /// the address so a later bridge notification for that serial doesn't
    /// trigger a reprobe, then retries `connect addr:port` up to 3 times
    /// with 5s sleeps (§6 constants).
    pub async fn connect_to_tcp_device(self: &Arc<Self>, addr_port: &str) -> Result<Option<Arc<TestDevice>>> {
        self.require_started()?;
        let serial = Serial::new(addr_port);
        let handle = DeviceHandle::new(serial.clone(), DeviceKind::RemoteStub, DeviceState::Offline);
        let stub = TestDevice::new(
            handle,
            false,
            Some(Arc::downgrade(self) as Weak<dyn ManagerCapability>),
            self.log.clone(),
        );
        self.pool
            .allocated
            .lock()
            .expect("allocated poisoned")
            .insert(serial.clone(), Arc::clone(&stub));

        const ATTEMPTS: u32 = 3;
        const RETRY_SLEEP: Duration = Duration::from_secs(5);
        let expected_prefix = format!("connected to {}", addr_port);
        let mut connected = false;
        for attempt in 0..ATTEMPTS {
            let result = self
                .runner
                .run(self.config.bridge_timeout, &["connect", addr_port])
                .await;
            match result {
                Ok(output) if output.stdout.starts_with(&expected_prefix) => {
                    connected = true;
                    break;
                }
                Ok(_) => {
                    debug!(self.log, "tcp connect attempt did not succeed"; "attempt" => attempt);
                }
                Err(e) => {
                    warn!(self.log, "tcp connect attempt failed: {}", e);
                }
            }
            if attempt + 1 < ATTEMPTS {
                self.runner.sleep(RETRY_SLEEP).await;
            }
        }

        if !connected {
            warn!(self.log, "exhausted tcp connect retries"; "addr" => addr_port);
            self.free(&stub, FreeState::Ignore)?;
            return Ok(None);
        }

        stub.set_recovery_strategy(Arc::new(WaitForOnlineRecoveryStrategy));
        stub.monitor().wait_for(DeviceState::Online).await;
        Ok(Some(stub))
    }

    /// §4.6 `reconnectDeviceToTcp`: asks `usb_device` to switch onto its
    /// secondary (TCP) transport via [`TestDevice::switch_to_secondary`],
    /// then delegates to [`Self::connect_to_tcp_device`] with the address it
    /// reports. On failure (either the switch itself, or the subsequent
    /// connect), attempts to recover the original transport.
    pub async fn reconnect_device_to_tcp(
        self: &Arc<Self>,
        usb_device: &Arc<TestDevice>,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.require_started()?;
        let addr_port = match usb_device.switch_to_secondary().await {
            Ok(addr_port) => addr_port,
            Err(e) => {
                warn!(self.log, "failed to switch to secondary transport: {}", e);
                return Ok(None);
            }
        };
        match self.connect_to_tcp_device(&addr_port).await? {
            Some(device) => Ok(Some(device)),
            None => {
                if let Err(e) = usb_device.recover_device().await {
                    warn!(self.log, "failed to recover original transport: {}", e);
                }
                Ok(None)
            }
        }
    }

    /// §4.6 `disconnectFromTcpDevice`: asks `tcp_device` to switch the
    /// underlying device back onto its primary (USB) transport via
    /// [`TestDevice::switch_to_primary`] (logged, not fatal, on failure),
    /// then frees with `Ignore` regardless of that outcome.
    pub async fn disconnect_from_tcp_device(&self, tcp_device: &Arc<TestDevice>) -> Result<()> {
        self.require_started()?;
        if let Err(e) = tcp_device.switch_to_primary().await {
            warn!(self.log, "failed to switch back to primary transport: {}", e);
        }
        self.free(tcp_device, FreeState::Ignore)
    }

    /// §4.6 `terminate`: idempotent. Unregisters the listener, stops the
    /// bridge, halts the queue (unblocking any waiter with `Cancelled`),
    /// and cancels the alt-mode monitor.
    pub async fn terminate(&self) {
        let started = self.started.lock().expect("started poisoned").take();
        let Some(started) = started else {
            return;
        };
        started
            .bridge
            .remove_listener(&(started.listener.clone() as Arc<dyn crate::bridge::EventListener>));
        started.bridge.terminate().await;
        self.pool.available.halt();
        if let Some(alt_mode) = started.alt_mode {
            alt_mode.stop();
        }
    }

    /// §4.6 `terminateHard`: poisons every currently-allocated device with
    /// the abort recovery strategy before tearing down (§3 invariant 5).
    pub async fn terminate_hard(&self) -> Result<()> {
        self.require_started()?;
        {
            let allocated = self.pool.allocated.lock().expect("allocated poisoned");
            for device in allocated.values() {
                device.set_recovery_strategy(Arc::new(crate::test_device::AbortRecoveryStrategy));
            }
        }
        if let Some(started) = self.started.lock().expect("started poisoned").as_ref() {
            started.bridge.disconnect();
        }
        self.terminate().await;
        Ok(())
    }

    pub fn get_allocated_devices(&self) -> Result<Vec<Arc<TestDevice>>> {
        self.require_started()?;
        Ok(self
            .pool
            .allocated
            .lock()
            .expect("allocated poisoned")
            .values()
            .cloned()
            .collect())
    }

    /// Excludes placeholders (§4.6).
    pub fn get_available_devices(&self) -> Result<Vec<DeviceHandle>> {
        self.require_started()?;
        Ok(self
            .pool
            .available
            .iterate()
            .into_iter()
            .filter(|d| !d.kind().is_placeholder())
            .collect())
    }

    /// Serials visible to the bridge minus (available ∪ allocated) (§4.6).
    pub async fn get_unavailable_devices(&self) -> Result<Vec<DeviceHandle>> {
        let started = self.started.lock().expect("started poisoned");
        let Some(started) = started.as_ref() else {
            return Err(Error::NotInitialized);
        };
        let all = started.bridge.get_devices().await.map_err(Error::Bridge)?;
        let present: HashSet<Serial> = self
            .pool
            .available
            .iterate()
            .into_iter()
            .map(|d| d.serial().clone())
            .chain(
                self.pool
                    .allocated
                    .lock()
                    .expect("allocated poisoned")
                    .keys()
                    .cloned(),
            )
            .collect();
        Ok(all
            .into_iter()
            .filter(|d| !present.contains(d.serial()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::fake::FakeBridge;
    use crate::bridge::BridgeEvent;
    use crate::bridge::ChangeMask;
    use crate::pool::AltModeListener;
    use crate::runner::fake::FakeCommandRunner;
    use crate::test_device::TransportSwitch;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn online(serial: &str) -> DeviceHandle {
        DeviceHandle::new(Serial::new(serial), DeviceKind::Real, DeviceState::Online)
    }

    async fn manager_with(
        config: ManagerConfig,
        script: Vec<BridgeEvent>,
    ) -> (Arc<AllocationManager>, Arc<FakeBridge>, Arc<FakeCommandRunner>) {
        let runner = Arc::new(FakeCommandRunner::new());
        runner
            .push(Err(crate::runner::RunError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no alt-mode binary in tests",
            ))))
            .await;
        let runner_arc: Arc<dyn CommandRunner> = runner.clone();
        let manager = AllocationManager::new(config, runner_arc, test_logger());
        let bridge = FakeBridge::new(script);
        manager.init(bridge.clone() as Arc<dyn Bridge>).await.unwrap();
        (manager, bridge, runner)
    }

    #[tokio::test]
    async fn cold_start_discovery_admits_stable_device() {
        let config = ManagerConfig {
            num_emulators: 1,
            num_null_devices: 1,
            stability_window: Duration::from_millis(20),
            ..Default::default()
        };
        let (manager, _bridge, _runner) =
            manager_with(config, vec![BridgeEvent::Connected(online("SERIAL_A"))]).await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let available = manager.get_available_devices().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].serial().as_str(), "SERIAL_A");
        assert!(manager.get_allocated_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flappy_device_is_not_admitted() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(60),
            ..Default::default()
        };
        let (manager, bridge, _runner) =
            manager_with(config, vec![BridgeEvent::Connected(online("SERIAL_B"))]).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut offline = online("SERIAL_B");
        offline.set_state(DeviceState::Offline);
        bridge.fire(BridgeEvent::Changed(offline, ChangeMask::STATE_CHANGED));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(manager.get_available_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fifo_allocation_preserves_admission_order() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(5),
            ..Default::default()
        };
        let (manager, _bridge, _runner) = manager_with(
            config,
            vec![
                BridgeEvent::Connected(online("D1")),
                BridgeEvent::Connected(online("D2")),
                BridgeEvent::Connected(online("D3")),
            ],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let filter = SelectionFilter::matches_any();
        let d1 = manager.allocate(&filter).await.unwrap().unwrap();
        let d2 = manager.allocate(&filter).await.unwrap().unwrap();
        let d3 = manager.allocate(&filter).await.unwrap().unwrap();

        assert_eq!(d1.serial().as_str(), "D1");
        assert_eq!(d2.serial().as_str(), "D2");
        assert_eq!(d3.serial().as_str(), "D3");
    }

    #[tokio::test]
    async fn free_unallocated_device_does_not_panic() {
        let config = ManagerConfig::default();
        let (manager, _bridge, _runner) = manager_with(config, vec![]).await;

        let orphan = TestDevice::new(online("GHOST"), false, None, test_logger());
        manager.free(&orphan, FreeState::Available).unwrap();
        assert!(manager.get_allocated_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn connect_to_tcp_device_succeeds_after_retry() {
        let (manager, bridge, runner) = manager_with(ManagerConfig::default(), vec![]).await;

        runner.push(Ok(FakeCommandRunner::success("not yet\n"))).await;
        runner
            .push(Ok(FakeCommandRunner::success("connected to 1.2.3.4:5555\n")))
            .await;

        let manager_clone = Arc::clone(&manager);
        let connect_task = tokio::spawn(async move {
            manager_clone
                .connect_to_tcp_device("1.2.3.4:5555")
                .await
                .expect("connect_to_tcp_device should not error")
                .expect("connect should succeed on second attempt")
        });

        // The stub only becomes Online once the bridge reports it connected,
        // routed through the listener's `replace_handle` path for an
        // already-allocated serial (§4.5); the retry loop alone never flips
        // the state.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut connected = online("1.2.3.4:5555");
        connected.set_state(DeviceState::Online);
        bridge.fire(BridgeEvent::Connected(connected));

        let device = tokio::time::timeout(Duration::from_secs(1), connect_task)
            .await
            .expect("connect_to_tcp_device timed out")
            .expect("connect task panicked");
        assert_eq!(device.serial().as_str(), "1.2.3.4:5555");
        assert!(manager
            .get_allocated_devices()
            .unwrap()
            .iter()
            .any(|d| d.serial().as_str() == "1.2.3.4:5555"));
    }

    struct FixedTransportSwitch {
        secondary_addr: String,
    }

    #[async_trait::async_trait]
    impl TransportSwitch for FixedTransportSwitch {
        async fn switch_to_secondary(&self, _device: &TestDevice) -> Result<String> {
            Ok(self.secondary_addr.clone())
        }
        async fn switch_to_primary(&self, _device: &TestDevice) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reconnect_device_to_tcp_switches_and_connects() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(5),
            ..Default::default()
        };
        let (manager, bridge, runner) =
            manager_with(config, vec![BridgeEvent::Connected(online("USB1"))]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let usb_device = manager.allocate(&SelectionFilter::matches_any()).await.unwrap().unwrap();
        usb_device.set_transport_switch(Arc::new(FixedTransportSwitch {
            secondary_addr: "5.6.7.8:9999".to_string(),
        }));

        runner
            .push(Ok(FakeCommandRunner::success("connected to 5.6.7.8:9999\n")))
            .await;

        let manager_clone = Arc::clone(&manager);
        let usb_clone = Arc::clone(&usb_device);
        let reconnect_task = tokio::spawn(async move {
            manager_clone
                .reconnect_device_to_tcp(&usb_clone)
                .await
                .expect("reconnect should not error")
                .expect("reconnect should succeed")
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut connected = online("5.6.7.8:9999");
        connected.set_state(DeviceState::Online);
        bridge.fire(BridgeEvent::Connected(connected));

        let tcp_device = tokio::time::timeout(Duration::from_secs(1), reconnect_task)
            .await
            .expect("reconnect_device_to_tcp timed out")
            .expect("reconnect task panicked");
        assert_eq!(tcp_device.serial().as_str(), "5.6.7.8:9999");

        manager.disconnect_from_tcp_device(&tcp_device).await.unwrap();
        assert!(!manager
            .get_allocated_devices()
            .unwrap()
            .iter()
            .any(|d| d.serial().as_str() == "5.6.7.8:9999"));
    }

    #[tokio::test]
    async fn reconnect_device_to_tcp_recovers_original_when_switch_unsupported() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(5),
            ..Default::default()
        };
        let (manager, _bridge, _runner) =
            manager_with(config, vec![BridgeEvent::Connected(online("USB2"))]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let usb_device = manager.allocate(&SelectionFilter::matches_any()).await.unwrap().unwrap();

        let result = manager.reconnect_device_to_tcp(&usb_device).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn terminate_hard_poisons_allocated_devices() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(5),
            ..Default::default()
        };
        let (manager, _bridge, _runner) =
            manager_with(config, vec![BridgeEvent::Connected(online("SERIAL_D"))]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let device = manager.allocate(&SelectionFilter::matches_any()).await.unwrap().unwrap();
        manager.terminate_hard().await.unwrap();

        let err = device.recover_device().await.unwrap_err();
        assert!(err.to_string().contains("aborted"));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let config = ManagerConfig::default();
        let (manager, bridge, _runner) = manager_with(config, vec![]).await;
        manager.terminate().await;
        manager.terminate().await;
        assert!(bridge.was_terminated());
    }

    #[tokio::test]
    async fn methods_before_init_return_not_initialized() {
        let runner: Arc<dyn CommandRunner> = Arc::new(FakeCommandRunner::new());
        let manager = AllocationManager::new(ManagerConfig::default(), runner, test_logger());
        let orphan = TestDevice::new(online("GHOST"), false, None, test_logger());

        assert!(matches!(
            manager.allocate(&SelectionFilter::matches_any()).await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager
                .allocate_with_timeout(Duration::from_millis(1), &SelectionFilter::matches_any())
                .await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.free(&orphan, FreeState::Ignore),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.connect_to_tcp_device("1.2.3.4:5555").await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.reconnect_device_to_tcp(&orphan).await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            manager.disconnect_from_tcp_device(&orphan).await,
            Err(Error::NotInitialized)
        ));
        assert!(matches!(manager.terminate_hard().await, Err(Error::NotInitialized)));
        assert!(matches!(manager.get_allocated_devices(), Err(Error::NotInitialized)));
        assert!(matches!(manager.get_available_devices(), Err(Error::NotInitialized)));
        assert!(matches!(
            manager.get_unavailable_devices().await,
            Err(Error::NotInitialized)
        ));
    }

    struct NoopAltModeListener;
    impl AltModeListener for NoopAltModeListener {
        fn on_cycle(&self, _in_alt_mode: &HashSet<Serial>) {}
    }

    #[tokio::test]
    async fn alt_mode_transition_updates_allocated_device_state() {
        let config = ManagerConfig {
            stability_window: Duration::from_millis(5),
            alt_mode_poll_interval: Duration::from_millis(10),
            ..Default::default()
        };

        let runner = Arc::new(FakeCommandRunner::new());
        runner.push(Ok(FakeCommandRunner::success("help text\n"))).await;
        let runner_arc: Arc<dyn CommandRunner> = runner.clone();
        let manager = AllocationManager::new(config, runner_arc, test_logger());
        let bridge = FakeBridge::new(vec![BridgeEvent::Connected(online("SERIAL_C"))]);
        manager.init(bridge.clone() as Arc<dyn Bridge>).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let device = manager.allocate(&SelectionFilter::matches_any()).await.unwrap().unwrap();
        manager
            .pool
            .alt_mode_listeners
            .lock()
            .unwrap()
            .push(Arc::new(NoopAltModeListener));

        runner
            .push(Ok(FakeCommandRunner::success("SERIAL_C  fastboot\n")))
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(device.state(), DeviceState::Fastboot);

        runner.push(Ok(FakeCommandRunner::success(""))).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(device.state(), DeviceState::NotAvailable);

        manager.terminate().await;
    }
}
