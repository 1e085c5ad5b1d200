// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection by feature mask.

use std::ffi::CStr;

use ash::vk;
use tracing::{info, warn};

use crate::error::{NegotiationError, Result};
use crate::features::FeatureMask;

/// The selected accelerator.
///
/// Not `Clone`: exactly one descriptor exists per selection and it moves into
/// the [`ExecutionContext`](crate::ExecutionContext) that is built from it.
/// `features` is the record that will be enabled on the logical device, i.e.
/// the requested mask, not everything the hardware offers.
pub struct PhysicalDeviceDescriptor {
    handle: vk::PhysicalDevice,
    features: vk::PhysicalDeviceFeatures,
    properties: vk::PhysicalDeviceProperties,
}

impl PhysicalDeviceDescriptor {
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn feature_mask(&self) -> FeatureMask {
        FeatureMask::from_features(&self.features)
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn name(&self) -> String {
        device_name(&self.properties)
    }
}

impl std::fmt::Debug for PhysicalDeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceDescriptor")
            .field("handle", &self.handle)
            .field("name", &self.name())
            .field("features", &self.feature_mask())
            .finish_non_exhaustive()
    }
}

/// What the driver reports for one enumerated device.
pub struct Candidate {
    pub handle: vk::PhysicalDevice,
    pub features: vk::PhysicalDeviceFeatures,
    pub properties: vk::PhysicalDeviceProperties,
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    // device_name is a fixed array; stop at the first NUL or its end.
    let bytes: Vec<u8> = props
        .device_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// First candidate (in driver order) whose features are a superset of
/// `desired`. The winner's feature record is overwritten with exactly
/// `desired`, dropping anything else the hardware supports.
pub fn select_candidate(
    candidates: impl IntoIterator<Item = Candidate>,
    desired: FeatureMask,
) -> Result<PhysicalDeviceDescriptor> {
    let mut seen = 0usize;
    for candidate in candidates {
        seen += 1;
        let supported = FeatureMask::from_features(&candidate.features);
        let name = device_name(&candidate.properties);

        if !supported.contains(desired) {
            let missing = FeatureMask(desired.0 & !supported.0);
            warn!("skipping {name}: missing features {missing:?}");
            continue;
        }

        let api = candidate.properties.api_version;
        info!(
            "selected {name} (api {}.{}.{}, type {:?})",
            vk::api_version_major(api),
            vk::api_version_minor(api),
            vk::api_version_patch(api),
            candidate.properties.device_type,
        );
        return Ok(PhysicalDeviceDescriptor {
            handle: candidate.handle,
            features: desired.to_features(),
            properties: candidate.properties,
        });
    }

    if seen == 0 {
        Err(NegotiationError::NoPhysicalDevices)
    } else {
        Err(NegotiationError::NoQualifyingDevice { desired: desired.0 })
    }
}

/// Enumerate the instance's devices and pick one with [`select_candidate`].
///
/// # Safety
/// `instance` must be a live instance.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    desired: FeatureMask,
) -> Result<PhysicalDeviceDescriptor> {
    let handles = unsafe { instance.enumerate_physical_devices() }
        .map_err(NegotiationError::vk("vkEnumeratePhysicalDevices"))?;
    if handles.is_empty() {
        return Err(NegotiationError::NoPhysicalDevices);
    }

    let candidates = handles.into_iter().map(|handle| unsafe {
        Candidate {
            handle,
            features: instance.get_physical_device_features(handle),
            properties: instance.get_physical_device_properties(handle),
        }
    });
    select_candidate(candidates, desired)
}

/// `true` when `name` is among `available`.
pub(crate) fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available.iter().any(|e| {
        // SAFETY: the driver NUL-terminates extension_name.
        unsafe { CStr::from_ptr(e.extension_name.as_ptr()) == name }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;
    use ash::vk::Handle;

    fn candidate(raw: u64, name: &str, supported: FeatureMask) -> Candidate {
        let mut properties = vk::PhysicalDeviceProperties::default();
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as _;
        }
        Candidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            features: supported.to_features(),
            properties,
        }
    }

    #[test]
    fn enabled_features_are_exactly_the_request() {
        let desired = FeatureMask(0b1111);
        let everything = FeatureMask((1u64 << Feature::COUNT) - 1);
        let picked = select_candidate([candidate(1, "big", everything)], desired).unwrap();

        for &f in Feature::ALL {
            assert_eq!(picked.feature_mask().has(f), (desired.0 >> f.bit()) & 1 == 1, "{f}");
        }
        assert_eq!(picked.features().geometry_shader, vk::FALSE);
        assert_eq!(picked.name(), "big");
    }

    #[test]
    fn first_qualifying_device_wins() {
        let desired: FeatureMask = [Feature::GeometryShader].into_iter().collect();
        let picked = select_candidate(
            [
                candidate(1, "igpu", FeatureMask::EMPTY),
                candidate(2, "dgpu", desired.with(Feature::WideLines)),
                candidate(3, "other", desired),
            ],
            desired,
        )
        .unwrap();
        assert_eq!(picked.handle().as_raw(), 2);
    }

    #[test]
    fn no_superset_is_fatal() {
        let err = select_candidate(
            [candidate(1, "a", FeatureMask(0b0111)), candidate(2, "b", FeatureMask(0b1110))],
            FeatureMask(0b1111),
        )
        .unwrap_err();
        assert!(matches!(err, NegotiationError::NoQualifyingDevice { desired: 0b1111 }));
    }

    #[test]
    fn bits_past_the_table_are_never_satisfied() {
        let everything = FeatureMask((1u64 << Feature::COUNT) - 1);
        let err = select_candidate(
            [candidate(1, "full", everything)],
            FeatureMask(1u64 << 60 | 1),
        )
        .unwrap_err();
        assert!(matches!(err, NegotiationError::NoQualifyingDevice { .. }));
    }

    #[test]
    fn no_devices_is_fatal() {
        let err = select_candidate(std::iter::empty(), FeatureMask::EMPTY).unwrap_err();
        assert!(matches!(err, NegotiationError::NoPhysicalDevices));
    }

    #[test]
    fn empty_request_enables_nothing() {
        let picked =
            select_candidate([candidate(7, "any", FeatureMask(0b101))], FeatureMask::EMPTY).unwrap();
        assert!(picked.feature_mask().is_empty());
    }

    #[test]
    fn extension_lookup() {
        let mut ext = vk::ExtensionProperties::default();
        for (dst, src) in ext.extension_name.iter_mut().zip(b"VK_KHR_swapchain") {
            *dst = *src as _;
        }
        assert!(has_extension(&[ext], ash::khr::swapchain::NAME));
        assert!(!has_extension(&[ext], ash::khr::maintenance1::NAME));
        assert!(!has_extension(&[], ash::khr::swapchain::NAME));
    }
}
