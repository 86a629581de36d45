//! Per-device row thresholds for lumo compositing.
//!
//! Every capture device in a patient recording has a calibrated `y_limit`:
//! pixel rows at or below that row show the treatment table and are never
//! treated as foreground. The table is fixed at build time.

use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Directory prefix placed before the device id in a patient tree.
pub const DEVICE_DIR_PREFIX: &str = "camera_";

/// Capture hardware family; also the top-level directory name in a
/// patient tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceGroup {
    Huawei,
    Vivo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationEntry {
    pub group: DeviceGroup,
    pub device_id: &'static str,
    pub y_limit: u32,
}

const fn entry(group: DeviceGroup, device_id: &'static str, y_limit: u32) -> CalibrationEntry {
    CalibrationEntry {
        group,
        device_id,
        y_limit,
    }
}

static TABLE: [CalibrationEntry; 4] = [
    entry(DeviceGroup::Huawei, "SED0221715004838", 255),
    entry(DeviceGroup::Huawei, "SED0221923019262", 430),
    entry(DeviceGroup::Vivo, "9a11d441", 255),
    entry(DeviceGroup::Vivo, "48e19edf", 330),
];

impl DeviceGroup {
    /// Groups in the order a patient tree is walked.
    pub const ALL: [DeviceGroup; 2] = [DeviceGroup::Huawei, DeviceGroup::Vivo];

    pub fn name(self) -> &'static str {
        match self {
            DeviceGroup::Huawei => "huawei",
            DeviceGroup::Vivo => "vivo",
        }
    }

    /// Registered devices of this group, in table order.
    pub fn devices(self) -> impl Iterator<Item = &'static CalibrationEntry> {
        TABLE.iter().filter(move |e| e.group == self)
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceGroup::ALL
            .into_iter()
            .find(|g| g.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown device group {s:?}"))
    }
}

/// Subdirectory name of a device under its group directory.
pub fn device_dir_name(device_id: &str) -> String {
    format!("{DEVICE_DIR_PREFIX}{device_id}")
}

/// Parse a `<group>/<device_id>` selector such as `huawei/SED0221715004838`.
///
/// Only the syntax and the group are checked here; an unregistered device
/// id is reported by [`lookup`].
pub fn parse_device_selector(s: &str) -> anyhow::Result<(DeviceGroup, String)> {
    let (group, device_id) = s
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("expected <group>/<device_id>, got {s:?}"))?;
    anyhow::ensure!(!device_id.is_empty(), "device id is empty in {s:?}");
    Ok((group.parse()?, device_id.to_string()))
}

/// Row threshold of `device_id` within `group`.
pub fn lookup(group: DeviceGroup, device_id: &str) -> Result<u32, PipelineError> {
    group
        .devices()
        .find(|e| e.device_id == device_id)
        .map(|e| e.y_limit)
        .ok_or_else(|| PipelineError::UnknownDevice {
            group,
            device_id: device_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_devices_resolve() {
        assert_eq!(lookup(DeviceGroup::Huawei, "SED0221715004838").unwrap(), 255);
        assert_eq!(lookup(DeviceGroup::Huawei, "SED0221923019262").unwrap(), 430);
        assert_eq!(lookup(DeviceGroup::Vivo, "9a11d441").unwrap(), 255);
        assert_eq!(lookup(DeviceGroup::Vivo, "48e19edf").unwrap(), 330);
    }

    #[test]
    fn lookup_is_stable() {
        let first = lookup(DeviceGroup::Vivo, "48e19edf").unwrap();
        for _ in 0..10 {
            assert_eq!(lookup(DeviceGroup::Vivo, "48e19edf").unwrap(), first);
        }
    }

    #[test]
    fn device_of_other_group_is_unknown() {
        let err = lookup(DeviceGroup::Vivo, "SED0221715004838").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownDevice { group: DeviceGroup::Vivo, ref device_id }
                if device_id == "SED0221715004838"
        ));
        // same miss, same answer
        let again = lookup(DeviceGroup::Vivo, "SED0221715004838").unwrap_err();
        assert_eq!(err.to_string(), again.to_string());
    }

    #[test]
    fn groups_round_trip_through_names() {
        for group in DeviceGroup::ALL {
            assert_eq!(group.name().parse::<DeviceGroup>().unwrap(), group);
        }
        assert!("samsung".parse::<DeviceGroup>().is_err());
    }

    #[test]
    fn selectors_parse_group_and_id() {
        let (group, id) = parse_device_selector("vivo/48e19edf").unwrap();
        assert_eq!(group, DeviceGroup::Vivo);
        assert_eq!(id, "48e19edf");

        // unregistered ids still parse, lookup rejects them later
        assert!(parse_device_selector("huawei/unknown").is_ok());
        assert!(parse_device_selector("huawei").is_err());
        assert!(parse_device_selector("huawei/").is_err());
        assert!(parse_device_selector("lg/123").is_err());
    }

    #[test]
    fn each_group_has_two_devices() {
        let huawei: Vec<_> = DeviceGroup::Huawei.devices().map(|e| e.device_id).collect();
        assert_eq!(huawei, ["SED0221715004838", "SED0221923019262"]);
        assert_eq!(DeviceGroup::Vivo.devices().count(), 2);
        assert_eq!(
            device_dir_name(DeviceGroup::Vivo.devices().next().unwrap().device_id),
            "camera_9a11d441"
        );
    }
}
