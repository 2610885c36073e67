/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;

/// Stable identity of a device, as reported by the bridge (or synthesized
/// for placeholders and transport stubs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(String);

impl Serial {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Valid iff length > 1 and does not contain `?` (§6).
    pub fn is_valid(&self) -> bool {
        self.0.len() > 1 && !self.0.contains('?')
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Serial {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Serial {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Device connectivity state (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Online,
    Offline,
    Recovery,
    /// Alternative ("fastboot") firmware-flashing mode.
    Fastboot,
    NotAvailable,
}

impl DeviceState {
    pub fn is_alt_mode(&self) -> bool {
        matches!(self, Self::Fastboot)
    }
}

/// Identifies what kind of slot a [`DeviceHandle`] occupies in the pool
/// (§3). Real devices and transport stubs are admitted by the readiness
/// prober or an explicit connect; placeholders exist purely to bound
/// concurrent emulator/no-device allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Real,
    EmulatorPlaceholder,
    NullPlaceholder,
    RemoteStub,
}

impl DeviceKind {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::EmulatorPlaceholder | Self::NullPlaceholder)
    }
}

/// Known device properties, populated opportunistically by the bridge.
/// Missing entries mean "unknown", not "absent" — the selection filter
/// (§4.2) must treat the two the same way (reject rather than guess).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    pub product_type: Option<String>,
    pub product_variant: Option<String>,
    pub sdk_level: Option<u32>,
    pub battery_level: Option<u8>,
}

/// An opaque device identifier as tracked by the pool (§3). This is
/// intentionally thin: everything that requires talking to the device
/// (shell commands, log capture) lives on the test-device wrapper that is
/// built from a `DeviceHandle` once it's allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    serial: Serial,
    kind: DeviceKind,
    state: DeviceState,
    properties: DeviceProperties,
}

impl DeviceHandle {
    pub fn new(serial: Serial, kind: DeviceKind, state: DeviceState) -> Self {
        Self {
            serial,
            kind,
            state,
            properties: DeviceProperties::default(),
        }
    }

    pub fn placeholder(serial: Serial, kind: DeviceKind) -> Self {
        debug_assert!(kind.is_placeholder());
        Self::new(serial, kind, DeviceState::NotAvailable)
    }

    pub fn with_properties(mut self, properties: DeviceProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn set_state(&mut self, state: DeviceState) {
        self.state = state;
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }
}

/// Deterministic emulator/no-device placeholder serials (§9: "Emulator
/// placeholder identity"). Real emulators announced by the bridge are
/// assumed to share these serials one-to-one; see DESIGN.md for the
/// consequence of that assumption.
pub fn emulator_placeholder_serial(index: u32) -> Serial {
    Serial::new(format!("emulator-{}", 5554 + index * 2))
}

pub fn null_placeholder_serial(index: u32) -> Serial {
    Serial::new(format!("null-device-{}", index))
}
