// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::queue::QueueKind;

/// Failures that cannot be fixed at runtime: the machine, driver or
/// configuration does not provide what was asked for.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("instance exposes no physical devices")]
    NoPhysicalDevices,

    #[error("no physical device supports the desired feature mask {desired:#018x}")]
    NoQualifyingDevice { desired: u64 },

    #[error("no queue family can serve {0} work")]
    NoQueueFamily(QueueKind),

    #[error("{0} queue family was not requested for this context")]
    QueueNotRequested(QueueKind),

    #[error("device extension {0} is not available")]
    MissingDeviceExtension(String),

    #[error("instance extension {0} is not available")]
    MissingInstanceExtension(String),

    #[error("surface does not support image usage {desired:?} (supported: {supported:?})")]
    UnsupportedUsage {
        desired: vk::ImageUsageFlags,
        supported: vk::ImageUsageFlags,
    },

    #[error("surface reports no formats")]
    NoSurfaceFormats,

    #[error("surface extent is 0x0")]
    ZeroExtent,

    #[error("no resolved queue family can present to the surface")]
    NoPresentFamily,

    #[error("{0} returned a null handle")]
    NullHandle(&'static str),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
}

impl NegotiationError {
    /// Adapter for `map_err` on raw driver calls.
    pub(crate) fn vk(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { call, result }
    }
}

/// Outcome of a failed [`ImageChain::acquire_next`](crate::ImageChain::acquire_next).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("image chain is out of date and must be rebuilt")]
    OutOfDate,

    #[error("image {image_index} acquired but the chain no longer matches the surface")]
    Suboptimal { image_index: u32 },

    #[error("no image became available before the timeout")]
    NotReady,

    #[error("driver returned image index {index} for a chain of {count} images")]
    IndexOutOfRange { index: u32, count: usize },

    #[error("acquire_next_image failed: {0}")]
    Device(vk::Result),
}

impl AcquireError {
    /// `true` for transient conditions: retry (`NotReady`) or rebuild the
    /// chain (`OutOfDate`, `Suboptimal`) instead of giving up.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OutOfDate | Self::Suboptimal { .. } | Self::NotReady
        )
    }

    /// `true` when the chain has to be rebuilt before the next acquire.
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Self::OutOfDate | Self::Suboptimal { .. })
    }

    /// The image the driver handed out despite the error. Its semaphore or
    /// fence is signaled, so the caller still has to wait on it.
    pub fn acquired_image(&self) -> Option<u32> {
        match self {
            Self::Suboptimal { image_index } => Some(*image_index),
            _ => None,
        }
    }
}

pub type Result<T, E = NegotiationError> = std::result::Result<T, E>;
