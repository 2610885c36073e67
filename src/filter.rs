/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;

use crate::device::DeviceHandle;
use crate::device::DeviceKind;
use crate::device::Serial;

/// Restricts which [`DeviceKind`]s a filter will consider (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindRestriction {
    Any,
    EmulatorOnly,
    RealOnly,
    NullOnly,
}

impl KindRestriction {
    fn accepts(&self, kind: DeviceKind) -> bool {
        match self {
            Self::Any => true,
            Self::EmulatorOnly => kind == DeviceKind::EmulatorPlaceholder,
            Self::RealOnly => kind == DeviceKind::Real || kind == DeviceKind::RemoteStub,
            Self::NullOnly => kind == DeviceKind::NullPlaceholder,
        }
    }
}

/// A stateless predicate over a [`DeviceHandle`], matching the global
/// selection policy a consumer asked for (§4.2). Evaluation never blocks on
/// device I/O: every field it inspects is either the handle itself or the
/// opportunistically-populated [`crate::device::DeviceProperties`] already
/// attached to it; a property that hasn't been observed yet is treated as
/// "does not match" rather than stalling the caller.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    serial: Option<Serial>,
    exclude_serial: HashSet<Serial>,
    product_type: Option<String>,
    product_variant: Option<String>,
    sdk_level: Option<u32>,
    kind: Option<KindRestriction>,
    min_battery: Option<u8>,
}

impl SelectionFilter {
    /// The sentinel filter: accepts every device (`matchesAny`).
    pub fn matches_any() -> Self {
        Self::default()
    }

    pub fn with_serial(mut self, serial: Serial) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn excluding_serial(mut self, serial: Serial) -> Self {
        self.exclude_serial.insert(serial);
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_product_variant(mut self, product_variant: impl Into<String>) -> Self {
        self.product_variant = Some(product_variant.into());
        self
    }

    pub fn with_min_sdk_level(mut self, sdk_level: u32) -> Self {
        self.sdk_level = Some(sdk_level);
        self
    }

    pub fn with_kind(mut self, kind: KindRestriction) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_min_battery(mut self, percent: u8) -> Self {
        self.min_battery = Some(percent);
        self
    }

    pub fn matches(&self, device: &DeviceHandle) -> bool {
        if let Some(serial) = &self.serial {
            if device.serial() != serial {
                return false;
            }
        }
        if self.exclude_serial.contains(device.serial()) {
            return false;
        }
        if let Some(kind) = self.kind {
            if !kind.accepts(device.kind()) {
                return false;
            }
        }

        let props = device.properties();
        if let Some(want) = &self.product_type {
            match &props.product_type {
                Some(have) if have == want => {}
                _ => return false,
            }
        }
        if let Some(want) = &self.product_variant {
            match &props.product_variant {
                Some(have) if have == want => {}
                _ => return false,
            }
        }
        if let Some(want) = self.sdk_level {
            match props.sdk_level {
                Some(have) if have >= want => {}
                _ => return false,
            }
        }
        if let Some(want) = self.min_battery {
            match props.battery_level {
                Some(have) if have >= want => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProperties;
    use crate::device::DeviceState;

    fn device(serial: &str, kind: DeviceKind) -> DeviceHandle {
        DeviceHandle::new(Serial::new(serial), kind, DeviceState::Online)
    }

    #[test]
    fn matches_any_accepts_everything() {
        let filter = SelectionFilter::matches_any();
        assert!(filter.matches(&device("A", DeviceKind::Real)));
        assert!(filter.matches(&device("emulator-5554", DeviceKind::EmulatorPlaceholder)));
    }

    #[test]
    fn serial_filter_is_exact() {
        let filter = SelectionFilter::matches_any().with_serial(Serial::new("A"));
        assert!(filter.matches(&device("A", DeviceKind::Real)));
        assert!(!filter.matches(&device("B", DeviceKind::Real)));
    }

    #[test]
    fn exclude_serial_rejects_named_device() {
        let filter = SelectionFilter::matches_any().excluding_serial(Serial::new("A"));
        assert!(!filter.matches(&device("A", DeviceKind::Real)));
        assert!(filter.matches(&device("B", DeviceKind::Real)));
    }

    #[test]
    fn kind_restriction() {
        let filter = SelectionFilter::matches_any().with_kind(KindRestriction::EmulatorOnly);
        assert!(!filter.matches(&device("A", DeviceKind::Real)));
        assert!(filter.matches(&device("emulator-5554", DeviceKind::EmulatorPlaceholder)));
    }

    #[test]
    fn unknown_property_rejects_rather_than_blocks() {
        let filter = SelectionFilter::matches_any().with_product_type("widget");
        let dev = device("A", DeviceKind::Real);
        assert!(!filter.matches(&dev));

        let dev = dev.with_properties(DeviceProperties {
            product_type: Some("widget".to_string()),
            ..Default::default()
        });
        assert!(filter.matches(&dev));
    }

    #[test]
    fn min_battery_requires_known_level() {
        let filter = SelectionFilter::matches_any().with_min_battery(50);
        let dev = device("A", DeviceKind::Real);
        assert!(!filter.matches(&dev));
        let dev = dev.with_properties(DeviceProperties {
            battery_level: Some(40),
            ..Default::default()
        });
        assert!(!filter.matches(&dev));
        let dev = DeviceHandle::new(Serial::new("A"), DeviceKind::Real, DeviceState::Online)
            .with_properties(DeviceProperties {
                battery_level: Some(80),
                ..Default::default()
            });
        assert!(filter.matches(&dev));
    }
}
