//! Pipeline state shared by the builder and the patch passes.
//!
//! A [`PipelineState`] describes one pipeline being compiled: the target, the
//! stages present, the user-data layout and per-stage modes. Lowering fills
//! in per-stage [`ResourceUsage`], and entry-point mutation records the
//! resulting [`InterfaceData`].

mod error;
mod interface;
mod layout;
mod modes;
mod resource;
mod target;
mod usage;

pub use error::StateError;
pub use interface::{EntryArgInfo, InterfaceData, SpillTable, UserDataMapping};
pub use layout::{
    AutoLayout, ColorTarget, DeclaredKind, DeclaredResource, Format, NumericFormat,
    OFFSET_STRIDE_IN_DWORDS, VERTEX_STRIDE, VertexAttribute,
    default_color_targets,
};
pub use modes::{FpDenormMode, ShaderModes};
pub use resource::{ResourceNode, ResourceNodeType, find_resource_node, find_root_node_by_type};
pub use target::{BUFFER_DWORD3_GFX9, BUFFER_DWORD3_GFX10, GfxIp, TargetInfo};
pub use usage::{
    BasicType, BuiltInOutputUsage, FsOutputType, InterpUsage, MAX_COLOR_TARGETS, ResourceUsage,
    XfbUsage,
};

use wavefront_ir::{ShaderStage, StageMask};

/// Pipeline-wide options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Each view renders to its own array layer.
    pub multiview: bool,
    /// Auto layout places inner nodes at a fixed stride per binding.
    pub auto_layout_compatible: bool,
}

/// State of one pipeline under compilation.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    pub target: TargetInfo,
    pub stage_mask: StageMask,
    pub options: PipelineOptions,
    /// Root user-data nodes in user-data order.
    pub user_data_nodes: Vec<ResourceNode>,
    pub color_targets: [Option<ColorTarget>; MAX_COLOR_TARGETS],
    pub vertex_inputs: Vec<VertexAttribute>,
    shader_modes: [ShaderModes; 6],
    resource_usage: [ResourceUsage; 6],
    interface_data: [InterfaceData; 6],
}

impl PipelineState {
    pub fn new(target: TargetInfo) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// Adds `stage` to the pipeline.
    pub fn add_stage(&mut self, stage: ShaderStage) {
        self.stage_mask |= stage.mask();
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stage_mask.contains_stage(stage)
    }

    /// Whether the pipeline has tessellation.
    pub fn has_ts(&self) -> bool {
        self.stage_mask
            .intersects(StageMask::TESS_CONTROL | StageMask::TESS_EVAL)
    }

    pub fn has_gs(&self) -> bool {
        self.has_stage(ShaderStage::Geometry)
    }

    pub fn wave_size(&self, stage: ShaderStage) -> u32 {
        self.target.wave_size(stage)
    }

    pub fn shader_modes(&self, stage: ShaderStage) -> &ShaderModes {
        &self.shader_modes[stage.index()]
    }

    pub fn shader_modes_mut(&mut self, stage: ShaderStage) -> &mut ShaderModes {
        &mut self.shader_modes[stage.index()]
    }

    pub fn resource_usage(&self, stage: ShaderStage) -> &ResourceUsage {
        &self.resource_usage[stage.index()]
    }

    pub fn resource_usage_mut(&mut self, stage: ShaderStage) -> &mut ResourceUsage {
        &mut self.resource_usage[stage.index()]
    }

    pub fn interface_data(&self, stage: ShaderStage) -> &InterfaceData {
        &self.interface_data[stage.index()]
    }

    pub fn interface_data_mut(&mut self, stage: ShaderStage) -> &mut InterfaceData {
        &mut self.interface_data[stage.index()]
    }

    /// Finds the user-data node for a descriptor lookup.
    pub fn find_resource_node(
        &self,
        ty: ResourceNodeType,
        set: u32,
        binding: u32,
    ) -> Option<(usize, &ResourceNode)> {
        find_resource_node(&self.user_data_nodes, ty, set, binding)
    }

    /// The push-constant root node, if any.
    pub fn find_push_constant_node(&self) -> Option<(usize, &ResourceNode)> {
        find_root_node_by_type(&self.user_data_nodes, ResourceNodeType::PushConst)
    }

    /// Replaces the user data with `layout` and adopts its stages and
    /// vertex inputs.
    pub fn apply_auto_layout(&mut self, layout: &AutoLayout) {
        self.stage_mask |= layout.stages();
        self.user_data_nodes = layout.build();
        self.vertex_inputs = layout.vertex_attributes();
    }

    /// Fills unset colour targets from the fragment output types recorded
    /// while lowering.
    pub fn set_default_color_targets(&mut self) {
        let defaults = default_color_targets(
            &self.resource_usage(ShaderStage::Fragment).fs_output_types,
        );
        for (target, default) in self.color_targets.iter_mut().zip(defaults) {
            if target.is_none() {
                *target = default;
            }
        }
    }
}
