// SPDX-License-Identifier: CEPL-1.0
//! Vulkan device and swapchain negotiation.
//!
//! The flow is [`Instance`] → [`Surface`] → [`ExecutionContext`] →
//! [`ImageChain`]. Every rule that decides *what* to ask the driver for is a
//! plain function over `ash::vk` structs so it can be exercised without a GPU.
#![deny(unsafe_op_in_unsafe_fn)]

mod context;
mod error;
mod features;
mod instance;
mod physical_device;
mod queue;
mod swapchain;

pub use ash;

pub use context::{missing_extensions, queue_create_infos, ContextRequest, ExecutionContext};
pub use error::{AcquireError, NegotiationError, Result};
pub use features::{Feature, FeatureMask};
pub use instance::{Instance, InstanceRequest, Surface};
pub use physical_device::{
    select_candidate, select_physical_device, Candidate, PhysicalDeviceDescriptor,
};
pub use queue::{
    resolve_family, resolve_present_family, resolve_queue_families, QueueFamilyAssignment,
    QueueKind,
};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    choose_transform, choose_usage, classify_acquire, negotiate, step_acquire, ChainState,
    ImageChain, NegotiatedChain, SwapchainRequest,
};
