/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

pub mod altmode;
pub mod bridge;
pub mod device;
pub mod error;
pub mod filter;
pub mod listener;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod prober;
pub mod queue;
pub mod runner;
pub mod test_device;

pub use altmode::AltModeMonitor;
pub use bridge::Bridge;
pub use bridge::BridgeEvent;
pub use bridge::ChangeMask;
pub use bridge::EventListener;
pub use device::DeviceHandle;
pub use device::DeviceKind;
pub use device::DeviceProperties;
pub use device::DeviceState;
pub use device::Serial;
pub use error::Error;
pub use error::Result;
pub use error::TakeOutcome;
pub use filter::KindRestriction;
pub use filter::SelectionFilter;
pub use manager::AllocationManager;
pub use manager::FreeState;
pub use manager::ManagerConfig;
pub use runner::CommandRunner;
pub use runner::ProcessCommandRunner;
pub use test_device::ManagerCapability;
pub use test_device::RecoveryStrategy;
pub use test_device::TestDevice;
pub use test_device::TransportSwitch;
