/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use tokio::sync::watch;

use crate::device::DeviceState;

/// Per-device observer of state transitions (§4.8, C3). One monitor exists
/// per serial while it is in `checking` or `allocated`; the bridge listener
/// is the sole writer for a given serial (§5, ordering guarantees).
///
/// Backed by `tokio::sync::watch` rather than polling: `wait_for_not` and
/// `wait_for` resolve as soon as a value arrives that does/doesn't match the
/// target, which is how both the prober's stability window and the
/// TCP-connect path's wait-for-online are expressed.
#[derive(Debug, Clone)]
pub struct DeviceStateMonitor {
    tx: watch::Sender<DeviceState>,
}

impl DeviceStateMonitor {
    pub fn new(initial: DeviceState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn state(&self) -> DeviceState {
        *self.tx.borrow()
    }

    pub fn set_state(&self, state: DeviceState) {
        // A closed receiver (nobody currently watching) is not an error:
        // the monitor keeps the last value for the next subscriber.
        let _ = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Blocks (asynchronously) until the state is anything other than
    /// `target`, or returns immediately if it already is.
    pub async fn wait_for_not(&self, target: DeviceState) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() != target {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() != target {
                return;
            }
        }
    }

    /// Blocks (asynchronously) until the state becomes `target`, or returns
    /// immediately if it already is.
    pub async fn wait_for(&self, target: DeviceState) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() == target {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() == target {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn wait_for_not_returns_immediately_if_already_different() {
        let monitor = DeviceStateMonitor::new(DeviceState::Online);
        timeout(
            Duration::from_millis(50),
            monitor.wait_for_not(DeviceState::Offline),
        )
        .await
        .expect("should not block");
    }

    #[tokio::test]
    async fn wait_for_not_unblocks_on_transition() {
        let monitor = DeviceStateMonitor::new(DeviceState::Online);
        let waiter = monitor.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_not(DeviceState::Online).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.set_state(DeviceState::Offline);
        timeout(Duration::from_millis(100), handle)
            .await
            .expect("should unblock after transition")
            .unwrap();
    }
}
