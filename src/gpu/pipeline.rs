use std::sync::Arc;

#[cfg(feature = "dashi-serde")]
use serde::{Deserialize, Serialize};

use super::backend::{Capabilities, Features};
use super::driver::types::{Handle, NativeId};
use super::error::{GPUError, Result};
use super::render_pass::{RenderPass, RenderPassSignature};
use super::structs::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineLayoutInfo<'a> {
    pub debug_name: &'a str,
    /// Number of descriptor sets the layout binds.
    pub set_count: u32,
    pub push_constants: &'a [PushConstantRange],
}

#[derive(Debug, Clone)]
pub struct PipelineLayout {
    pub debug_name: String,
    pub set_count: u32,
    pub push_constants: Vec<PushConstantRange>,
}

impl PipelineLayout {
    pub fn new(info: &PipelineLayoutInfo, caps: &Capabilities) -> Result<Self> {
        for range in info.push_constants {
            if range.offset % 4 != 0 || range.size % 4 != 0 || range.size == 0 {
                return Err(GPUError::Validation(
                    "push constant ranges must be non-empty and 4-byte aligned".into(),
                ));
            }
            let end = u64::from(range.offset) + u64::from(range.size);
            if end > u64::from(caps.max_push_constant_size) {
                return Err(GPUError::Validation(format!(
                    "push constant range ends at {end}, backend allows {}",
                    caps.max_push_constant_size
                )));
            }
        }
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            set_count: info.set_count,
            push_constants: info.push_constants.to_vec(),
        })
    }

    /// Whether `[offset, offset + len)` is covered by ranges visible to
    /// `stages`.
    pub fn covers_push_constants(&self, stages: ShaderStages, offset: u32, len: u64) -> bool {
        let end = u64::from(offset) + len;
        self.push_constants
            .iter()
            .filter(|r| r.stages.intersects(stages))
            .any(|r| r.offset <= offset && end <= u64::from(r.offset) + u64::from(r.size))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineInfo<'a> {
    pub debug_name: &'a str,
    pub layout: Handle<PipelineLayout>,
    /// Linked backend program.
    pub program: NativeId,
    pub stages: ShaderStages,
    pub topology: Topology,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub raster: RasterState,
    pub render_pass: Handle<RenderPass>,
    pub subpass: u32,
}

impl Default for GraphicsPipelineInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            layout: Handle::default(),
            program: NativeId::NONE,
            stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            topology: Topology::TriangleList,
            blend: BlendState::default(),
            depth_stencil: DepthStencilState::default(),
            raster: RasterState::default(),
            render_pass: Handle::default(),
            subpass: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsPipeline {
    pub debug_name: String,
    pub layout: Handle<PipelineLayout>,
    pub program: NativeId,
    pub topology: Topology,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub raster: RasterState,
    pub signature: RenderPassSignature,
    pub subpass: u32,
}

impl GraphicsPipeline {
    /// Capability checks happen here rather than at draw time.
    pub fn new(
        info: &GraphicsPipelineInfo,
        render_pass: &Arc<RenderPass>,
        caps: &Capabilities,
    ) -> Result<Self> {
        if info.stages.intersects(
            ShaderStages::TESSELLATION_CONTROL | ShaderStages::TESSELLATION_EVALUATION,
        ) || info.topology == Topology::PatchList
        {
            if !caps.supports(Features::TESSELLATION) {
                return Err(GPUError::FeatureNotPresent("tessellation"));
            }
        }
        if info.stages.contains(ShaderStages::GEOMETRY) && !caps.supports(Features::GEOMETRY_SHADER)
        {
            return Err(GPUError::FeatureNotPresent("geometry shaders"));
        }
        if info.stages.contains(ShaderStages::COMPUTE) {
            return Err(GPUError::Validation(
                "graphics pipeline cannot include a compute stage".into(),
            ));
        }
        if info.raster.depth_clamp && !caps.supports(Features::DEPTH_BIAS_CLAMP) {
            return Err(GPUError::FeatureNotPresent("depth clamp"));
        }
        if info.subpass as usize >= render_pass.subpasses().len() {
            return Err(GPUError::Validation(format!(
                "pipeline targets subpass {} of a {}-subpass render pass",
                info.subpass,
                render_pass.subpasses().len()
            )));
        }
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            layout: info.layout,
            program: info.program,
            topology: info.topology,
            blend: info.blend,
            depth_stencil: info.depth_stencil,
            raster: info.raster,
            signature: render_pass.signature().clone(),
            subpass: info.subpass,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComputePipelineInfo<'a> {
    pub debug_name: &'a str,
    pub layout: Handle<PipelineLayout>,
    pub program: NativeId,
}

#[derive(Debug, Clone)]
pub struct ComputePipeline {
    pub debug_name: String,
    pub layout: Handle<PipelineLayout>,
    pub program: NativeId,
}

impl ComputePipeline {
    pub fn new(info: &ComputePipelineInfo, caps: &Capabilities) -> Result<Self> {
        if !caps.supports(Features::COMPUTE) {
            return Err(GPUError::FeatureNotPresent("compute"));
        }
        Ok(Self {
            debug_name: info.debug_name.to_string(),
            layout: info.layout,
            program: info.program,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_coverage() {
        let layout = PipelineLayout::new(
            &PipelineLayoutInfo {
                push_constants: &[PushConstantRange {
                    stages: ShaderStages::VERTEX,
                    offset: 0,
                    size: 64,
                }],
                ..Default::default()
            },
            &Capabilities::default(),
        )
        .unwrap();
        assert!(layout.covers_push_constants(ShaderStages::VERTEX, 16, 16));
        assert!(!layout.covers_push_constants(ShaderStages::FRAGMENT, 0, 4));
        assert!(!layout.covers_push_constants(ShaderStages::VERTEX, 60, 8));
    }

    #[test]
    fn compute_needs_the_feature() {
        let mut caps = Capabilities::default();
        caps.features.remove(Features::COMPUTE);
        assert_eq!(
            ComputePipeline::new(&ComputePipelineInfo::default(), &caps).unwrap_err(),
            GPUError::FeatureNotPresent("compute")
        );
    }
}
