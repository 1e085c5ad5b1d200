// SPDX-License-Identifier: CEPL-1.0
//! Named, ordered view of `VkPhysicalDeviceFeatures`.
//!
//! Bit `i` of a [`FeatureMask`] is the `i`-th field of the Vulkan 1.0 feature
//! record in declaration order. The table below is the only place that order
//! lives; if the record grows (or this list is reordered) every persisted or
//! hard-coded mask changes meaning. Masks are therefore tied to the 1.0
//! layout and carry at most [`Feature::COUNT`] significant bits.

use std::fmt;

use ash::vk;

macro_rules! feature_table {
    ($($variant:ident => $field:ident,)+) => {
        /// One boolean capability of `VkPhysicalDeviceFeatures`.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Feature {
            $($variant,)+
        }

        impl Feature {
            /// Every feature, in bit order.
            pub const ALL: &'static [Feature] = &[$(Feature::$variant,)+];

            /// The snake_case field name, also used in config files.
            pub fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => stringify!($field),)+
                }
            }

            pub fn from_name(name: &str) -> Option<Feature> {
                match name {
                    $(stringify!($field) => Some(Feature::$variant),)+
                    _ => None,
                }
            }

            fn read(self, features: &vk::PhysicalDeviceFeatures) -> bool {
                match self {
                    $(Feature::$variant => features.$field != vk::FALSE,)+
                }
            }

            fn write(self, features: &mut vk::PhysicalDeviceFeatures, on: bool) {
                let value = if on { vk::TRUE } else { vk::FALSE };
                match self {
                    $(Feature::$variant => features.$field = value,)+
                }
            }
        }
    };
}

feature_table! {
    RobustBufferAccess => robust_buffer_access,
    FullDrawIndexUint32 => full_draw_index_uint32,
    ImageCubeArray => image_cube_array,
    IndependentBlend => independent_blend,
    GeometryShader => geometry_shader,
    TessellationShader => tessellation_shader,
    SampleRateShading => sample_rate_shading,
    DualSrcBlend => dual_src_blend,
    LogicOp => logic_op,
    MultiDrawIndirect => multi_draw_indirect,
    DrawIndirectFirstInstance => draw_indirect_first_instance,
    DepthClamp => depth_clamp,
    DepthBiasClamp => depth_bias_clamp,
    FillModeNonSolid => fill_mode_non_solid,
    DepthBounds => depth_bounds,
    WideLines => wide_lines,
    LargePoints => large_points,
    AlphaToOne => alpha_to_one,
    MultiViewport => multi_viewport,
    SamplerAnisotropy => sampler_anisotropy,
    TextureCompressionEtc2 => texture_compression_etc2,
    TextureCompressionAstcLdr => texture_compression_astc_ldr,
    TextureCompressionBc => texture_compression_bc,
    OcclusionQueryPrecise => occlusion_query_precise,
    PipelineStatisticsQuery => pipeline_statistics_query,
    VertexPipelineStoresAndAtomics => vertex_pipeline_stores_and_atomics,
    FragmentStoresAndAtomics => fragment_stores_and_atomics,
    ShaderTessellationAndGeometryPointSize => shader_tessellation_and_geometry_point_size,
    ShaderImageGatherExtended => shader_image_gather_extended,
    ShaderStorageImageExtendedFormats => shader_storage_image_extended_formats,
    ShaderStorageImageMultisample => shader_storage_image_multisample,
    ShaderStorageImageReadWithoutFormat => shader_storage_image_read_without_format,
    ShaderStorageImageWriteWithoutFormat => shader_storage_image_write_without_format,
    ShaderUniformBufferArrayDynamicIndexing => shader_uniform_buffer_array_dynamic_indexing,
    ShaderSampledImageArrayDynamicIndexing => shader_sampled_image_array_dynamic_indexing,
    ShaderStorageBufferArrayDynamicIndexing => shader_storage_buffer_array_dynamic_indexing,
    ShaderStorageImageArrayDynamicIndexing => shader_storage_image_array_dynamic_indexing,
    ShaderClipDistance => shader_clip_distance,
    ShaderCullDistance => shader_cull_distance,
    ShaderFloat64 => shader_float64,
    ShaderInt64 => shader_int64,
    ShaderInt16 => shader_int16,
    ShaderResourceResidency => shader_resource_residency,
    ShaderResourceMinLod => shader_resource_min_lod,
    SparseBinding => sparse_binding,
    SparseResidencyBuffer => sparse_residency_buffer,
    SparseResidencyImage2D => sparse_residency_image2_d,
    SparseResidencyImage3D => sparse_residency_image3_d,
    SparseResidency2Samples => sparse_residency2_samples,
    SparseResidency4Samples => sparse_residency4_samples,
    SparseResidency8Samples => sparse_residency8_samples,
    SparseResidency16Samples => sparse_residency16_samples,
    SparseResidencyAliased => sparse_residency_aliased,
    VariableMultisampleRate => variable_multisample_rate,
    InheritedQueries => inherited_queries,
}

impl Feature {
    /// Number of flags in the 1.0 record: `size_of::<VkPhysicalDeviceFeatures>() / 4`.
    pub const COUNT: usize = std::mem::size_of::<vk::PhysicalDeviceFeatures>()
        / std::mem::size_of::<vk::Bool32>();

    pub fn bit(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// The table must cover the record exactly, or bit positions drift.
const _: () = assert!(Feature::COUNT == 55);
const _: () = assert!(Feature::COUNT <= u64::BITS as usize);

/// 64-bit feature set; bit `i` is [`Feature::ALL`]`[i]`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureMask(pub u64);

impl FeatureMask {
    pub const EMPTY: FeatureMask = FeatureMask(0);

    pub fn from_features(features: &vk::PhysicalDeviceFeatures) -> Self {
        Feature::ALL
            .iter()
            .filter(|f| f.read(features))
            .fold(Self::EMPTY, |mask, &f| mask.with(f))
    }

    /// Expand into a feature record where field `i` is exactly bit `i`.
    /// Bits at or above [`Feature::COUNT`] have no field and are dropped.
    pub fn to_features(self) -> vk::PhysicalDeviceFeatures {
        let mut out = vk::PhysicalDeviceFeatures::default();
        for &f in Feature::ALL {
            f.write(&mut out, (self.0 >> f.bit()) & 1 == 1);
        }
        out
    }

    pub fn with(self, feature: Feature) -> Self {
        FeatureMask(self.0 | 1 << feature.bit())
    }

    pub fn has(self, feature: Feature) -> bool {
        self.0 & (1 << feature.bit()) != 0
    }

    /// Subset test: every bit of `other` is also set here.
    pub fn contains(self, other: FeatureMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.iter().copied().filter(move |&f| self.has(f))
    }
}

impl FromIterator<Feature> for FeatureMask {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, FeatureMask::with)
    }
}

impl From<u64> for FeatureMask {
    fn from(bits: u64) -> Self {
        FeatureMask(bits)
    }
}

impl fmt::Debug for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureMask({:#x}: ", self.0)?;
        f.debug_list().entries(self.iter().map(Feature::name)).finish()?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_record() {
        assert_eq!(Feature::ALL.len(), Feature::COUNT);
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(f.bit() as usize, i, "{f} out of place");
        }
        assert_eq!(Feature::RobustBufferAccess.bit(), 0);
        assert_eq!(Feature::SamplerAnisotropy.bit(), 19);
        assert_eq!(Feature::InheritedQueries.bit(), 54);
    }

    // Reads the record as raw flags, independent of the table.
    fn raw_flags(features: &vk::PhysicalDeviceFeatures) -> Vec<vk::Bool32> {
        let ptr = features as *const vk::PhysicalDeviceFeatures as *const vk::Bool32;
        // SAFETY: the record is COUNT consecutive Bool32 fields.
        unsafe { std::slice::from_raw_parts(ptr, Feature::COUNT) }.to_vec()
    }

    #[test]
    fn interior_bits_land_on_their_fields() {
        let pinned = [
            (13, Feature::FillModeNonSolid),
            (27, Feature::ShaderTessellationAndGeometryPointSize),
            (39, Feature::ShaderFloat64),
            (54, Feature::InheritedQueries),
        ];
        for (bit, feature) in pinned {
            assert_eq!(feature.bit(), bit, "{feature}");
            let flags = raw_flags(&FeatureMask(1u64 << bit).to_features());
            for (i, &flag) in flags.iter().enumerate() {
                let expected = if i == bit as usize { vk::TRUE } else { vk::FALSE };
                assert_eq!(flag, expected, "bit {bit} set field {i}");
            }
        }

        let record = FeatureMask(1u64 << 27).to_features();
        assert_eq!(record.shader_tessellation_and_geometry_point_size, vk::TRUE);
        assert_eq!(record.shader_image_gather_extended, vk::FALSE);
    }

    #[test]
    fn names_resolve_back() {
        for &f in Feature::ALL {
            assert_eq!(Feature::from_name(f.name()), Some(f));
        }
        assert_eq!(Feature::from_name("geometry_shader"), Some(Feature::GeometryShader));
        assert_eq!(Feature::from_name("raytracing"), None);
    }

    #[test]
    fn mask_reflects_record_fields() {
        let features = vk::PhysicalDeviceFeatures {
            robust_buffer_access: vk::TRUE,
            geometry_shader: vk::TRUE,
            inherited_queries: vk::TRUE,
            ..Default::default()
        };
        let mask = FeatureMask::from_features(&features);
        assert_eq!(mask.0, 1u64 | 1 << 4 | 1 << 54);
        assert!(mask.has(Feature::GeometryShader));
        assert!(!mask.has(Feature::TessellationShader));
    }

    #[test]
    fn to_features_sets_exactly_the_mask() {
        let mask = FeatureMask(0b1011);
        let features = mask.to_features();
        assert_eq!(features.robust_buffer_access, vk::TRUE);
        assert_eq!(features.full_draw_index_uint32, vk::TRUE);
        assert_eq!(features.image_cube_array, vk::FALSE);
        assert_eq!(features.independent_blend, vk::TRUE);
        assert_eq!(features.geometry_shader, vk::FALSE);
        assert_eq!(FeatureMask::from_features(&features), mask);
    }

    #[test]
    fn bits_past_the_record_are_dropped() {
        let mask = FeatureMask(1 << 3 | 1 << 60);
        assert_eq!(FeatureMask::from_features(&mask.to_features()).0, 1u64 << 3);
    }

    #[test]
    fn subset_not_equality() {
        let supported = FeatureMask(0b1111);
        assert!(supported.contains(FeatureMask(0b0101)));
        assert!(supported.contains(FeatureMask::EMPTY));
        assert!(!supported.contains(FeatureMask(0b1_0000)));
    }

    #[test]
    fn collects_from_features() {
        let mask: FeatureMask = [Feature::SamplerAnisotropy, Feature::FillModeNonSolid]
            .into_iter()
            .collect();
        assert_eq!(mask.0, 1u64 << 19 | 1 << 13);
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![Feature::FillModeNonSolid, Feature::SamplerAnisotropy]
        );
    }
}
