// SPDX-License-Identifier: CEPL-1.0
//! Swapchain negotiation against a surface's reported capabilities.
//!
//! Each `choose_*` function applies one rule and is independent of the
//! others; [`negotiate`] runs them in order. [`ImageChain`] wraps the
//! result in an owned swapchain and tracks when it needs rebuilding.

use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::{AcquireError, NegotiationError, Result};
use crate::instance::Surface;

/// What the caller would like; every field may be overridden by the surface.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainRequest {
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub usage: vk::ImageUsageFlags,
    pub transform: vk::SurfaceTransformFlagsKHR,
    pub format: vk::SurfaceFormatKHR,
}

impl Default for SwapchainRequest {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        }
    }
}

/// The agreed swapchain parameters.
#[derive(Clone, Copy, Debug)]
pub struct NegotiatedChain {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    /// Requested minimum; the driver may create more images.
    pub image_count: u32,
    pub usage: vk::ImageUsageFlags,
    pub transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

/// FIFO is the only mode every surface must support.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if desired == vk::PresentModeKHR::FIFO {
        return desired;
    }
    if available.contains(&desired) {
        desired
    } else {
        warn!("present mode {} unavailable, using FIFO", pm_name(desired));
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    desired: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR> {
    let first = *available.first().ok_or(NegotiationError::NoSurfaceFormats)?;

    // A lone UNDEFINED entry means the surface takes any format.
    if available.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(desired);
    }

    let exact = available
        .iter()
        .copied()
        .find(|f| f.format == desired.format && f.color_space == desired.color_space);
    Ok(exact.unwrap_or_else(|| {
        warn!(
            "format {} / {} unavailable, using {} / {}",
            fmt_name(desired.format),
            cs_name(desired.color_space),
            fmt_name(first.format),
            cs_name(first.color_space)
        );
        first
    }))
}

/// `current_extent.width == u32::MAX` means the caller picks the size within
/// the reported bounds; otherwise the surface dictates it.
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> Result<vk::Extent2D> {
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            // Not clamp(): that panics if a driver reports min > max.
            width: desired
                .width
                .max(caps.min_image_extent.width)
                .min(caps.max_image_extent.width),
            height: desired
                .height
                .max(caps.min_image_extent.height)
                .min(caps.max_image_extent.height),
        }
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(NegotiationError::ZeroExtent);
    }
    Ok(extent)
}

/// One more than the minimum, capped by the maximum (0 == "no max").
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// All of `desired` must be supported; nothing is silently dropped.
pub fn choose_usage(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::ImageUsageFlags,
) -> Result<vk::ImageUsageFlags> {
    let usage = desired & caps.supported_usage_flags;
    if usage != desired {
        return Err(NegotiationError::UnsupportedUsage {
            desired,
            supported: caps.supported_usage_flags,
        });
    }
    Ok(usage)
}

pub fn choose_transform(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired: vk::SurfaceTransformFlagsKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if !desired.is_empty() && caps.supported_transforms.contains(desired) {
        desired
    } else {
        caps.current_transform
    }
}

/// Run every rule, in order, against what the surface reported.
pub fn negotiate(
    request: &SwapchainRequest,
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    present_modes: &[vk::PresentModeKHR],
) -> Result<NegotiatedChain> {
    let present_mode = choose_present_mode(present_modes, request.present_mode);
    let format = choose_surface_format(formats, request.format)?;
    let extent = choose_extent(caps, request.extent)?;
    let image_count = choose_image_count(caps);
    let usage = choose_usage(caps, request.usage)?;
    let transform = choose_transform(caps, request.transform);

    Ok(NegotiatedChain {
        format: format.format,
        color_space: format.color_space,
        extent,
        present_mode,
        image_count,
        usage,
        transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
    })
}

/// Map the driver's acquire result onto [`AcquireError`].
pub fn classify_acquire(
    result: VkResult<(u32, bool)>,
    image_count: usize,
) -> std::result::Result<u32, AcquireError> {
    match result {
        Ok((index, _)) if index as usize >= image_count => Err(AcquireError::IndexOutOfRange {
            index,
            count: image_count,
        }),
        Ok((index, false)) => Ok(index),
        Ok((index, true)) => Err(AcquireError::Suboptimal { image_index: index }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(AcquireError::OutOfDate),
        Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => Err(AcquireError::NotReady),
        Err(e) => Err(AcquireError::Device(e)),
    }
}

/// Where an [`ImageChain`] is in its rebuild cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainState {
    Ready,
    /// Surface changed (resize, out-of-date, suboptimal); rebuild before use.
    Stale,
    Rebuilding,
}

impl ChainState {
    /// Only a ready chain goes to the driver for an image.
    pub fn can_acquire(self) -> bool {
        self == ChainState::Ready
    }

    pub fn after_acquire(self, outcome: &std::result::Result<u32, AcquireError>) -> Self {
        match outcome {
            Err(e) if e.needs_rebuild() => ChainState::Stale,
            _ => self,
        }
    }

    /// Ready becomes Stale; a chain already stale or rebuilding stays put.
    pub fn after_mark_stale(self) -> Self {
        match self {
            ChainState::Ready => ChainState::Stale,
            other => other,
        }
    }

    pub fn after_rebuild<T>(outcome: &Result<T>) -> Self {
        if outcome.is_ok() {
            ChainState::Ready
        } else {
            ChainState::Stale
        }
    }
}

/// One acquire attempt from `state`. `driver` runs only when the state
/// allows it; a chain that is not ready reports `OutOfDate` instead.
pub fn step_acquire(
    state: ChainState,
    image_count: usize,
    driver: impl FnOnce() -> VkResult<(u32, bool)>,
) -> (ChainState, std::result::Result<u32, AcquireError>) {
    if !state.can_acquire() {
        return (state, Err(AcquireError::OutOfDate));
    }
    let outcome = classify_acquire(driver(), image_count);
    (state.after_acquire(&outcome), outcome)
}

/// An owned swapchain and its images.
///
/// The images belong to the driver and die with the chain. The chain keeps
/// clones of the device and surface loaders, not the owners; see
/// [`ImageChain::new`] for the lifetime contract.
pub struct ImageChain {
    loader: swapchain::Device,
    device: ash::Device,
    physical: vk::PhysicalDevice,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    request: SwapchainRequest,
    config: NegotiatedChain,
    images: Vec<vk::Image>,
    state: ChainState,
}

impl Drop for ImageChain {
    fn drop(&mut self) {
        debug!("destroying swapchain {:?}", self.handle);
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
    }
}

impl std::fmt::Debug for ImageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageChain")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("images", &self.images.len())
            .field("state", &self.state)
            .finish()
    }
}

struct Created {
    handle: vk::SwapchainKHR,
    config: NegotiatedChain,
    images: Vec<vk::Image>,
}

impl ImageChain {
    /// Negotiate against `surface` and create the swapchain.
    ///
    /// # Safety
    /// `ctx` and `surface` must outlive the returned chain: it destroys its
    /// swapchain through `ctx`'s device and rebuilds against `surface`.
    pub unsafe fn new(
        ctx: &ExecutionContext,
        surface: &Surface,
        request: SwapchainRequest,
    ) -> Result<Self> {
        let mut chain = Self {
            loader: swapchain::Device::new(ctx.instance(), ctx.device()),
            device: ctx.device().clone(),
            physical: ctx.physical_device(),
            surface_loader: surface.loader().clone(),
            surface: surface.handle(),
            handle: vk::SwapchainKHR::null(),
            request,
            config: NegotiatedChain {
                format: vk::Format::UNDEFINED,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                extent: request.extent,
                present_mode: request.present_mode,
                image_count: 0,
                usage: request.usage,
                transform: request.transform,
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            },
            images: Vec::new(),
            state: ChainState::Rebuilding,
        };
        // Dropping a half-built chain destroys a null handle, which is a no-op.
        let created = chain.create(vk::SwapchainKHR::null())?;
        chain.install(created);
        chain.state = ChainState::Ready;
        Ok(chain)
    }

    fn create(&self, old_swapchain: vk::SwapchainKHR) -> Result<Created> {
        let (caps, formats, modes) = unsafe {
            let surf_i = &self.surface_loader;
            (
                surf_i
                    .get_physical_device_surface_capabilities(self.physical, self.surface)
                    .map_err(NegotiationError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                surf_i
                    .get_physical_device_surface_formats(self.physical, self.surface)
                    .map_err(NegotiationError::vk("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                surf_i
                    .get_physical_device_surface_present_modes(self.physical, self.surface)
                    .map_err(NegotiationError::vk("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            )
        };

        let config = negotiate(&self.request, &caps, &formats, &modes)?;

        info!(
            "format: {} / {}, present_mode: {}, extent: {}x{}, images(min={} → requested={})",
            fmt_name(config.format),
            cs_name(config.color_space),
            pm_name(config.present_mode),
            config.extent.width,
            config.extent.height,
            caps.min_image_count,
            config.image_count,
        );

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: config.image_count,
            image_format: config.format,
            image_color_space: config.color_space,
            image_extent: config.extent,
            image_array_layers: 1,
            image_usage: config.usage,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: config.transform,
            composite_alpha: config.composite_alpha,
            present_mode: config.present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        let handle = unsafe { self.loader.create_swapchain(&swap_info, None) }
            .map_err(NegotiationError::vk("vkCreateSwapchainKHR"))?;
        if handle == vk::SwapchainKHR::null() {
            return Err(NegotiationError::NullHandle("vkCreateSwapchainKHR"));
        }

        // The driver may hand back more images than requested.
        let images = match unsafe { self.loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { self.loader.destroy_swapchain(handle, None) };
                return Err(NegotiationError::Vulkan {
                    call: "vkGetSwapchainImagesKHR",
                    result,
                });
            }
        };
        debug!("swapchain {:?} holds {} image(s)", handle, images.len());

        Ok(Created {
            handle,
            config,
            images,
        })
    }

    fn install(&mut self, created: Created) {
        self.handle = created.handle;
        self.config = created.config;
        self.images = created.images;
    }

    /// Index of the next image to render into.
    ///
    /// `timeout` is in nanoseconds; `u64::MAX` waits indefinitely and a
    /// finite timeout that expires yields [`AcquireError::NotReady`].
    /// Out-of-date and suboptimal results leave the chain [`ChainState::Stale`].
    /// A suboptimal result still acquired the image and signals `fence`/`semaphore`.
    pub fn acquire_next(
        &mut self,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> std::result::Result<u32, AcquireError> {
        let (loader, handle) = (&self.loader, self.handle);
        let (state, outcome) = step_acquire(self.state, self.images.len(), || unsafe {
            loader.acquire_next_image(handle, timeout, semaphore, fence)
        });
        if state != self.state {
            if let Err(e) = &outcome {
                warn!("swapchain stale: {e}");
            }
        }
        self.state = state;
        outcome
    }

    /// Flag the chain for rebuilding, e.g. after a window resize.
    pub fn mark_stale(&mut self) {
        self.state = self.state.after_mark_stale();
    }

    /// Re-run the whole negotiation for `extent` and replace the swapchain.
    /// On failure the chain stays [`ChainState::Stale`].
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.state = ChainState::Rebuilding;
        self.request.extent = extent;

        let outcome = unsafe { self.device.device_wait_idle() }
            .map_err(NegotiationError::vk("vkDeviceWaitIdle"))
            .and_then(|()| self.create(self.handle));
        self.state = ChainState::after_rebuild(&outcome);
        let created = outcome?;

        unsafe { self.loader.destroy_swapchain(self.handle, None) };
        self.install(created);
        info!(
            "swapchain rebuilt at {}x{}",
            self.config.extent.width, self.config.extent.height
        );
        Ok(())
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn config(&self) -> &NegotiatedChain {
        &self.config
    }

    pub fn request(&self) -> &SwapchainRequest {
        &self.request
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn format(&self) -> vk::Format {
        self.config.format
    }
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        vk::Format::A2R10G10B10_UNORM_PACK32 => "A2R10G10B10_UNORM",
        vk::Format::R16G16B16A16_SFLOAT => "R16G16B16A16_SFLOAT",
        vk::Format::UNDEFINED => "UNDEFINED",
        _ => "OTHER",
    }
}
fn cs_name(cs: vk::ColorSpaceKHR) -> &'static str {
    match cs {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => "SRGB_NONLINEAR",
        vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT => "DISPLAY_P3_NONLINEAR",
        vk::ColorSpaceKHR::HDR10_ST2084_EXT => "HDR10_ST2084",
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => "EXTENDED_SRGB_LINEAR",
        _ => "OTHER",
    }
}
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}
