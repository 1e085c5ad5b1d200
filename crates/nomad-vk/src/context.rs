// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::error::{NegotiationError, Result};
use crate::features::FeatureMask;
use crate::physical_device::{has_extension, select_physical_device, PhysicalDeviceDescriptor};
use crate::queue::{resolve_queue_families, QueueFamilyAssignment, QueueKind};

/// Everything needed to build an [`ExecutionContext`].
#[derive(Clone, Debug)]
pub struct ContextRequest<'a> {
    pub features: FeatureMask,
    pub queues: vk::QueueFlags,
    pub extensions: &'a [&'a CStr],
}

/// Logical device plus the accelerator and queue families it was built from.
///
/// One per selection; neither `Clone` nor shared through globals. Anything
/// created from it (e.g. an [`ImageChain`](crate::ImageChain)) must be
/// dropped first.
pub struct ExecutionContext {
    instance: ash::Instance,
    device: ash::Device,
    physical: PhysicalDeviceDescriptor,
    assignment: QueueFamilyAssignment,
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        debug!("destroying device {:?}", self.device.handle());
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device.handle())
            .field("physical", &self.physical)
            .field("assignment", &self.assignment)
            .finish()
    }
}

/// Names from `desired` that are not in `available`, in request order.
pub fn missing_extensions(available: &[vk::ExtensionProperties], desired: &[&CStr]) -> Vec<String> {
    desired
        .iter()
        .filter(|name| !has_extension(available, name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// One single-queue, priority 1.0 entry per distinct resolved family.
pub fn queue_create_infos<'a>(
    assignment: &QueueFamilyAssignment,
    priorities: &'a [f32; 1],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    assignment
        .distinct_families()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect()
}

impl ExecutionContext {
    /// Select a device, resolve its queue families and create the logical
    /// device in one go.
    ///
    /// # Safety
    /// `instance` must be live and outlive the returned context.
    pub unsafe fn new(instance: &ash::Instance, request: &ContextRequest<'_>) -> Result<Self> {
        let physical = unsafe { select_physical_device(instance, request.features)? };
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical.handle()) };
        let assignment = resolve_queue_families(&families, request.queues)?;
        unsafe { Self::build(instance, physical, assignment, request.extensions) }
    }

    /// Create the logical device for an already selected accelerator.
    ///
    /// Every entry in `extensions` must be offered by the device; there is
    /// no substitution. The descriptor's feature record is enabled as is.
    ///
    /// # Safety
    /// `instance` must be the live instance `physical` was enumerated from.
    pub unsafe fn build(
        instance: &ash::Instance,
        physical: PhysicalDeviceDescriptor,
        assignment: QueueFamilyAssignment,
        extensions: &[&CStr],
    ) -> Result<Self> {
        let available = unsafe { instance.enumerate_device_extension_properties(physical.handle()) }
            .map_err(NegotiationError::vk("vkEnumerateDeviceExtensionProperties"))?;
        if let Some(name) = missing_extensions(&available, extensions).into_iter().next() {
            return Err(NegotiationError::MissingDeviceExtension(name));
        }

        let priorities = [1.0_f32];
        let qinfos = queue_create_infos(&assignment, &priorities);
        let ext_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|e| e.as_ptr()).collect();

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: qinfos.len() as u32,
            p_queue_create_infos: qinfos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: physical.features(),
            ..Default::default()
        };

        let device = unsafe { instance.create_device(physical.handle(), &dinfo, None) }
            .map_err(NegotiationError::vk("vkCreateDevice"))?;
        if device.handle() == vk::Device::null() {
            return Err(NegotiationError::NullHandle("vkCreateDevice"));
        }

        info!(
            "logical device ready on {} ({} queue(s), {} extension(s))",
            physical.name(),
            qinfos.len(),
            extensions.len()
        );

        Ok(Self {
            instance: instance.clone(),
            device,
            physical,
            assignment,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical.handle()
    }

    pub fn descriptor(&self) -> &PhysicalDeviceDescriptor {
        &self.physical
    }

    pub fn assignment(&self) -> &QueueFamilyAssignment {
        &self.assignment
    }

    pub fn queue_family(&self, kind: QueueKind) -> Result<u32> {
        self.assignment
            .index(kind)
            .ok_or(NegotiationError::QueueNotRequested(kind))
    }

    /// Queue 0 of the family resolved for `kind`.
    pub fn queue(&self, kind: QueueKind) -> Result<vk::Queue> {
        let family = self.queue_family(kind)?;
        Ok(unsafe { self.device.get_device_queue(family, 0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(name: &CStr) -> vk::ExtensionProperties {
        let mut e = vk::ExtensionProperties::default();
        for (dst, src) in e.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as _;
        }
        e
    }

    #[test]
    fn every_missing_extension_is_reported() {
        let available = [ext(ash::khr::swapchain::NAME)];
        let missing = missing_extensions(
            &available,
            &[
                ash::khr::swapchain::NAME,
                ash::khr::dynamic_rendering::NAME,
                ash::ext::hdr_metadata::NAME,
            ],
        );
        assert_eq!(missing, vec!["VK_KHR_dynamic_rendering", "VK_EXT_hdr_metadata"]);
        assert!(missing_extensions(&available, &[ash::khr::swapchain::NAME]).is_empty());
        assert!(missing_extensions(&[], &[]).is_empty());
    }

    #[test]
    fn one_queue_per_distinct_family() {
        let priorities = [1.0_f32];
        let same = QueueFamilyAssignment::new(0, 0, 0);
        let infos = queue_create_infos(&same, &priorities);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].queue_family_index, 0);
        assert_eq!(infos[0].queue_count, 1);

        let split = QueueFamilyAssignment::new(0, 2, 1);
        let infos = queue_create_infos(&split, &priorities);
        let families: Vec<u32> = infos.iter().map(|i| i.queue_family_index).collect();
        assert_eq!(families, vec![0, 2, 1]);
        for info in &infos {
            assert_eq!(info.queue_count, 1);
            // SAFETY: points at `priorities`, still in scope.
            assert_eq!(unsafe { *info.p_queue_priorities }, 1.0);
        }
    }

    #[test]
    fn unrequested_kinds_create_no_queue() {
        let priorities = [1.0_f32];
        let unresolved = QueueFamilyAssignment::UNRESOLVED;
        let graphics_only = QueueFamilyAssignment::new(1, unresolved, unresolved);
        assert_eq!(queue_create_infos(&graphics_only, &priorities).len(), 1);
    }
}
