// SPDX-License-Identifier: CEPL-1.0
//! Instance and surface ownership.
//!
//! STRICT ORDER: instance, then surface from this instance, then device
//! selection against that surface. Teardown runs the other way round, so
//! drop the [`Surface`] (and every context) before the [`Instance`].

use std::ffi::{c_char, c_void, CStr};

use ash::ext::debug_utils as ext_debug;
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use crate::context::missing_extensions;
use crate::error::{NegotiationError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct InstanceRequest<'a> {
    pub app_name: &'a CStr,
    pub api_version: u32,
    /// Window-system integration extensions are added on top of these.
    pub extensions: &'a [&'a CStr],
    pub validation: bool,
}

impl Default for InstanceRequest<'_> {
    fn default() -> Self {
        Self {
            app_name: c"Nomad",
            api_version: vk::API_VERSION_1_1,
            extensions: &[],
            validation: cfg!(debug_assertions),
        }
    }
}

pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "{msg}");
    } else {
        tracing::trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

impl Instance {
    /// Load the Vulkan library and create an instance able to present to
    /// `display`. Every required extension must be available.
    ///
    /// # Safety
    /// `display` must stay valid for the lifetime of the instance.
    pub unsafe fn new(display: RawDisplayHandle, request: &InstanceRequest<'_>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let wsi = ash_window::enumerate_required_extensions(display)
            .map_err(NegotiationError::vk("enumerate_required_extensions"))?;
        let mut required: Vec<&CStr> = wsi
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        required.extend_from_slice(request.extensions);

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(NegotiationError::vk("vkEnumerateInstanceExtensionProperties"))?;
        if let Some(name) = missing_extensions(&available, &required).into_iter().next() {
            return Err(NegotiationError::MissingInstanceExtension(name));
        }

        let mut layers: Vec<*const c_char> = Vec::new();
        let mut with_debug = false;
        if request.validation {
            let layer_props = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(NegotiationError::vk("vkEnumerateInstanceLayerProperties"))?;
            let has_layer = layer_props.iter().any(|l| unsafe {
                CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER
            });
            if has_layer {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
            }
            with_debug = missing_extensions(&available, &[ext_debug::NAME]).is_empty();
            if with_debug {
                required.push(ext_debug::NAME);
            }
        }
        let ext_ptrs: Vec<*const c_char> = required.iter().map(|e| e.as_ptr()).collect();

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: request.app_name.as_ptr(),
            application_version: 0,
            p_engine_name: request.app_name.as_ptr(),
            engine_version: 0,
            api_version: request.api_version,
            ..Default::default()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(NegotiationError::vk("vkCreateInstance"))?;
        info!(
            "instance created ({} extension(s), validation={})",
            ext_ptrs.len(),
            !layers.is_empty()
        );

        let mut this = Self {
            entry,
            instance,
            debug: None,
        };

        if with_debug {
            let loader = ext_debug::Instance::new(&this.entry, &this.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            // `this` already owns the instance, so an error here still tears it down.
            let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
                .map_err(NegotiationError::vk("vkCreateDebugUtilsMessengerEXT"))?;
            this.debug = Some((loader, messenger));
        }

        Ok(this)
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }
}

/// A presentation surface and the loader for its queries.
pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Drop for Surface {
    fn drop(&mut self) {
        debug!("destroying surface {:?}", self.handle);
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

impl Surface {
    /// # Safety
    /// Both handles must outlive the surface; `instance` must outlive it too.
    pub unsafe fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let handle = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .map_err(NegotiationError::vk("ash_window::create_surface"))?;
        let loader = surface::Instance::new(&instance.entry, &instance.instance);
        Ok(Self { loader, handle })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    /// Whether `family` on `physical` can present to this surface.
    pub fn supports_present(&self, physical: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical, family, self.handle)
        }
        .map_err(NegotiationError::vk("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }
}
