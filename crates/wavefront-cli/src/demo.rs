//! Demonstration shaders built through the lowering builder.

use clap::ValueEnum;
use wavefront_builder::{BuildError, Builder, GroupArithOp, InOutInfo};
use wavefront_ir::{BinaryOp, BuiltInKind, Expression, Handle, Module, Scalar, ShaderStage};
use wavefront_state::{PipelineState, ResourceNode, ResourceNodeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// fmod, refract and clamp over lane-dependent floats
    Arith,
    /// Clustered reduction and scans of the lane index
    Subgroup,
    /// Descriptor table, compact root descriptor and push-constant reads
    Descriptors,
    /// A waterfall loop over a lane-dependent operand
    Waterfall,
}

/// A value computed by a demo.
#[derive(Clone, Copy, Debug)]
pub struct Output {
    pub label: &'static str,
    pub value: Handle<Expression>,
}

/// Builds `demo` into the `stage` entry point of `module`.
///
/// Every output is stored to a local so that it survives dead code
/// elimination.
pub fn build(
    demo: Demo,
    module: &mut Module,
    state: &mut PipelineState,
    stage: ShaderStage,
) -> Result<Vec<Output>, BuildError> {
    if demo == Demo::Descriptors {
        state.user_data_nodes = descriptor_nodes();
    }
    let mut b = Builder::for_stage(module, state, stage);
    let outputs = match demo {
        Demo::Arith => arith(&mut b)?,
        Demo::Subgroup => subgroup(&mut b)?,
        Demo::Descriptors => descriptors(&mut b)?,
        Demo::Waterfall => waterfall(&mut b)?,
    };
    for output in &outputs {
        let ty = b.type_of(output.value);
        let local = b.add_local(output.label, ty);
        b.store(local, output.value);
    }
    Ok(outputs)
}

/// User data of the descriptor demo: a table with one buffer, an inline
/// compact buffer and four dwords of push constants.
pub fn descriptor_nodes() -> Vec<ResourceNode> {
    vec![
        ResourceNode::table(
            0,
            vec![ResourceNode::descriptor(ResourceNodeType::DescriptorBuffer, 0, 0, 0, 1)],
        ),
        ResourceNode::descriptor(ResourceNodeType::DescriptorBufferCompact, 1, 0, 1, 1),
        ResourceNode::root(ResourceNodeType::PushConst, 3, 4),
    ]
}

fn lane_index(b: &mut Builder<'_>) -> Result<Handle<Expression>, BuildError> {
    b.create_read_builtin_input(
        BuiltInKind::SubgroupLocalInvocationId,
        InOutInfo::default(),
        None,
        None,
    )
}

fn arith(b: &mut Builder<'_>) -> Result<Vec<Output>, BuildError> {
    let lane = lane_index(b)?;
    let x = b.convert(lane, Scalar::F32);
    let three = b.const_f32(3.0);
    let shifted = b.sub(x, three);
    let divisor = b.const_f32(-2.5);
    let fmod = b.create_fmod(shifted, divisor)?;

    let parts = vec![b.const_f32(1.0), b.const_f32(-1.0), b.const_f32(0.0)];
    let incident = b.vector_from(parts);
    let incident = b.create_normalize_vector(incident)?;
    let parts = vec![b.const_f32(0.0), b.const_f32(1.0), b.const_f32(0.0)];
    let normal = b.vector_from(parts);
    let quarter = b.const_f32(0.25);
    let eta = b.mul(x, quarter);
    let refract = b.create_refract(incident, normal, eta)?;

    let zero = b.const_f32(0.0);
    let two = b.const_f32(2.0);
    let clamp = b.create_fclamp(shifted, zero, two)?;
    Ok(vec![
        Output {
            label: "fmod",
            value: fmod,
        },
        Output {
            label: "refract",
            value: refract,
        },
        Output {
            label: "clamp",
            value: clamp,
        },
    ])
}

fn subgroup(b: &mut Builder<'_>) -> Result<Vec<Output>, BuildError> {
    let lane = lane_index(b)?;
    let reduce = b.create_subgroup_clustered_reduction(GroupArithOp::IAdd, lane, 4)?;
    let inclusive = b.create_subgroup_clustered_inclusive(GroupArithOp::IAdd, lane, 4)?;
    let exclusive = b.create_subgroup_clustered_exclusive(GroupArithOp::IAdd, lane, 4)?;
    Ok(vec![
        Output {
            label: "reduce",
            value: reduce,
        },
        Output {
            label: "inclusive",
            value: inclusive,
        },
        Output {
            label: "exclusive",
            value: exclusive,
        },
    ])
}

fn descriptors(b: &mut Builder<'_>) -> Result<Vec<Output>, BuildError> {
    let zero = b.const_u32(0);
    let table = b.create_load_buffer_desc(0, 0, zero, false, false)?;
    let root = b.create_load_buffer_desc(1, 0, zero, false, false)?;
    let u32_ty = b.scalar_type(Scalar::U32);
    let push = b.create_load_push_constants_ptr(u32_ty);
    let eight = b.const_u32(8);
    let third = b.offset_pointer(push, eight, u32_ty);
    let constant = b.load(third);
    Ok(vec![
        Output {
            label: "table",
            value: table,
        },
        Output {
            label: "root",
            value: root,
        },
        Output {
            label: "push",
            value: constant,
        },
    ])
}

fn waterfall(b: &mut Builder<'_>) -> Result<Vec<Output>, BuildError> {
    let lane = lane_index(b)?;
    let three = b.const_u32(3);
    let key = b.binary(BinaryOp::Modulo, lane, three);
    let hundred = b.const_u32(100);
    let scaled = b.binary(BinaryOp::Multiply, key, hundred);
    let scaled = b.create_waterfall_loop(scaled, &[0])?;
    Ok(vec![Output {
        label: "waterfall",
        value: scaled,
    }])
}
