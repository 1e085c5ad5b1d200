// SPDX-License-Identifier: CEPL-1.0
//! `nomad.toml`: what to ask the device and the surface for.

use std::ffi::{CStr, CString};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use nomad_vk::ash::{khr, vk};
use nomad_vk::{Feature, FeatureMask, QueueKind, SwapchainRequest};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub device: DeviceCfg,
    pub swapchain: SwapchainCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceCfg {
    /// Field names of `VkPhysicalDeviceFeatures`, e.g. `"geometry_shader"`.
    pub features: Vec<String>,
    pub queues: Vec<QueueCfg>,
    pub extensions: Vec<String>,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        DeviceCfg {
            features: [
                Feature::RobustBufferAccess,
                Feature::FullDrawIndexUint32,
                Feature::ImageCubeArray,
                Feature::IndependentBlend,
            ]
            .iter()
            .map(|f| f.name().to_owned())
            .collect(),
            queues: vec![QueueCfg::Graphics, QueueCfg::Compute, QueueCfg::Transfer],
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueCfg {
    Graphics,
    Compute,
    Transfer,
}

impl From<QueueCfg> for QueueKind {
    fn from(q: QueueCfg) -> Self {
        match q {
            QueueCfg::Graphics => QueueKind::Graphics,
            QueueCfg::Compute => QueueKind::Compute,
            QueueCfg::Transfer => QueueKind::Transfer,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainCfg {
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentModeCfg,
    pub format: FormatCfg,
    pub color_space: ColorSpaceCfg,
    pub usage: Vec<UsageCfg>,
    pub transform: TransformCfg,
    /// Absent means wait indefinitely.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for SwapchainCfg {
    fn default() -> Self {
        SwapchainCfg {
            width: 1280,
            height: 720,
            present_mode: PresentModeCfg::Mailbox,
            format: FormatCfg::R8g8b8a8Unorm,
            color_space: ColorSpaceCfg::SrgbNonlinear,
            usage: vec![UsageCfg::ColorAttachment],
            transform: TransformCfg::Identity,
            acquire_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCfg {
    B8g8r8a8Srgb,
    B8g8r8a8Unorm,
    R8g8b8a8Srgb,
    R8g8b8a8Unorm,
    A2b10g10r10Unorm,
    R16g16b16a16Sfloat,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpaceCfg {
    SrgbNonlinear,
    DisplayP3Nonlinear,
    ExtendedSrgbLinear,
    Hdr10St2084,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCfg {
    ColorAttachment,
    TransferSrc,
    TransferDst,
    Storage,
    Sampled,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformCfg {
    Identity,
    #[serde(rename = "rotate_90")]
    Rotate90,
    #[serde(rename = "rotate_180")]
    Rotate180,
    #[serde(rename = "rotate_270")]
    Rotate270,
    /// Keep whatever the surface currently uses.
    Inherit,
}

impl PresentModeCfg {
    fn vk(self) -> vk::PresentModeKHR {
        match self {
            PresentModeCfg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeCfg::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            PresentModeCfg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeCfg::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

impl FormatCfg {
    fn vk(self) -> vk::Format {
        match self {
            FormatCfg::B8g8r8a8Srgb => vk::Format::B8G8R8A8_SRGB,
            FormatCfg::B8g8r8a8Unorm => vk::Format::B8G8R8A8_UNORM,
            FormatCfg::R8g8b8a8Srgb => vk::Format::R8G8B8A8_SRGB,
            FormatCfg::R8g8b8a8Unorm => vk::Format::R8G8B8A8_UNORM,
            FormatCfg::A2b10g10r10Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
            FormatCfg::R16g16b16a16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        }
    }
}

impl ColorSpaceCfg {
    fn vk(self) -> vk::ColorSpaceKHR {
        match self {
            ColorSpaceCfg::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
            ColorSpaceCfg::DisplayP3Nonlinear => vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            ColorSpaceCfg::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ColorSpaceCfg::Hdr10St2084 => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        }
    }
}

impl UsageCfg {
    fn vk(self) -> vk::ImageUsageFlags {
        match self {
            UsageCfg::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            UsageCfg::TransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
            UsageCfg::TransferDst => vk::ImageUsageFlags::TRANSFER_DST,
            UsageCfg::Storage => vk::ImageUsageFlags::STORAGE,
            UsageCfg::Sampled => vk::ImageUsageFlags::SAMPLED,
        }
    }
}

impl TransformCfg {
    // Inherit is an empty request, which the negotiator answers with the
    // surface's current transform.
    fn vk(self) -> vk::SurfaceTransformFlagsKHR {
        match self {
            TransformCfg::Identity => vk::SurfaceTransformFlagsKHR::IDENTITY,
            TransformCfg::Rotate90 => vk::SurfaceTransformFlagsKHR::ROTATE_90,
            TransformCfg::Rotate180 => vk::SurfaceTransformFlagsKHR::ROTATE_180,
            TransformCfg::Rotate270 => vk::SurfaceTransformFlagsKHR::ROTATE_270,
            TransformCfg::Inherit => vk::SurfaceTransformFlagsKHR::empty(),
        }
    }
}

impl DeviceCfg {
    pub fn feature_mask(&self) -> Result<FeatureMask> {
        self.features
            .iter()
            .map(|name| match Feature::from_name(name) {
                Some(f) => Ok(f),
                None => bail!("unknown device feature `{name}` (see --list-features)"),
            })
            .collect::<Result<Vec<_>>>()
            .map(|features| features.into_iter().collect())
    }

    pub fn queue_flags(&self) -> vk::QueueFlags {
        self.queues
            .iter()
            .fold(vk::QueueFlags::empty(), |acc, &q| acc | QueueKind::from(q).flag())
    }

    /// Requested device extensions, with `VK_KHR_swapchain` appended once.
    pub fn extension_names(&self) -> Result<Vec<CString>> {
        let mut names = self
            .extensions
            .iter()
            .map(|e| CString::new(e.as_str()).with_context(|| format!("extension name {e:?}")))
            .collect::<Result<Vec<_>>>()?;
        let swapchain: &CStr = khr::swapchain::NAME;
        if !names.iter().any(|n| n.as_c_str() == swapchain) {
            names.push(swapchain.to_owned());
        }
        Ok(names)
    }
}

impl SwapchainCfg {
    pub fn request(&self, extent: vk::Extent2D) -> SwapchainRequest {
        SwapchainRequest {
            extent,
            present_mode: self.present_mode.vk(),
            usage: self
                .usage
                .iter()
                .fold(vk::ImageUsageFlags::empty(), |acc, u| acc | u.vk()),
            transform: self.transform.vk(),
            format: vk::SurfaceFormatKHR {
                format: self.format.vk(),
                color_space: self.color_space.vk(),
            },
        }
    }

    /// Acquire timeout in nanoseconds; `u64::MAX` waits forever.
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

/// Missing file or bad TOML both fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("loaded {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e:#}", path.display());
                AppCfg::default()
            }
        },
        Err(_) => {
            info!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ask_for_the_classic_four_features() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.device.feature_mask().unwrap(), FeatureMask(0b1111));
        assert_eq!(
            cfg.device.queue_flags(),
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
        );
        assert_eq!(cfg.swapchain.acquire_timeout_ns(), u64::MAX);
    }

    #[test]
    fn full_file_parses() {
        let cfg = parse_cfg(
            r#"
            [device]
            features = ["geometry_shader", "sampler_anisotropy"]
            queues = ["graphics", "transfer"]
            extensions = ["VK_KHR_maintenance1"]

            [swapchain]
            width = 800
            height = 600
            present_mode = "fifo_relaxed"
            format = "b8g8r8a8_unorm"
            color_space = "display_p3_nonlinear"
            usage = ["color_attachment", "transfer_dst"]
            transform = "rotate_90"
            acquire_timeout_ms = 16
            "#,
        )
        .unwrap();

        let mask = cfg.device.feature_mask().unwrap();
        assert!(mask.has(Feature::GeometryShader));
        assert!(mask.has(Feature::SamplerAnisotropy));
        assert_eq!(mask.iter().count(), 2);
        assert_eq!(
            cfg.device.queue_flags(),
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER
        );

        let req = cfg.swapchain.request(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(req.present_mode, vk::PresentModeKHR::FIFO_RELAXED);
        assert_eq!(req.format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(req.format.color_space, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);
        assert_eq!(
            req.usage,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );
        assert_eq!(req.transform, vk::SurfaceTransformFlagsKHR::ROTATE_90);
        assert_eq!(cfg.swapchain.acquire_timeout_ns(), 16_000_000);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg = parse_cfg("[swapchain]\nwidth = 300\n").unwrap();
        assert_eq!(cfg.swapchain.width, 300);
        assert_eq!(cfg.swapchain.height, 720);
        assert_eq!(cfg.device.features.len(), 4);
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let cfg = parse_cfg("[device]\nfeatures = [\"warp_drive\"]\n").unwrap();
        let err = cfg.device.feature_mask().unwrap_err();
        assert!(err.to_string().contains("warp_drive"));
    }

    #[test]
    fn bad_enum_value_fails_to_parse() {
        assert!(parse_cfg("[swapchain]\npresent_mode = \"vsync\"\n").is_err());
    }

    #[test]
    fn swapchain_extension_is_appended_once() {
        let mut device = DeviceCfg::default();
        let names = device.extension_names().unwrap();
        assert_eq!(names, vec![khr::swapchain::NAME.to_owned()]);

        device.extensions = vec!["VK_KHR_swapchain".into(), "VK_KHR_maintenance1".into()];
        let names = device.extension_names().unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].as_c_str(), khr::swapchain::NAME);
    }

    #[test]
    fn inherit_transform_is_an_empty_request() {
        let cfg = SwapchainCfg {
            transform: TransformCfg::Inherit,
            ..Default::default()
        };
        assert!(cfg
            .request(vk::Extent2D { width: 1, height: 1 })
            .transform
            .is_empty());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_cfg(Path::new("/nonexistent/nomad.toml"));
        assert_eq!(cfg.swapchain.width, 1280);
    }
}
