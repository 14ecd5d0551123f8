//! Entry-point mutation.
//!
//! Rewrites each stage's entry function from the front-end calling
//! convention (arguments bound to built-ins and user-data nodes, descriptor
//! calls) to the hardware one: a prefix of uniform-register arguments
//! carrying user data and system values, followed by per-lane arguments.
//! User data that does not fit the target's budget is reached through a
//! single spill table pointer.
//!
//! The body is rewritten in place with a flat pass over the expression
//! arena. Each replaced expression keeps its handle and type; the argument
//! reads and address arithmetic it needs are appended to the arena and
//! emitted at the top of the body, since they depend on arguments only.

use std::collections::{BTreeMap, BTreeSet};

use wavefront_ir::{
    AddressSpace, BinaryOp, Binding, BuiltInKind, Callee, EntryArg, Expression, Function,
    FunctionArgument, Handle, Literal, Module, Range, Scalar, ScalarKind, ShaderStage, Statement,
    Type, TypeInner, UniqueArena, VectorSize,
};
use wavefront_state::{
    EntryArgInfo, InterfaceData, PipelineState, ResourceNode, ResourceNodeType, SpillTable,
    UserDataMapping,
};

use crate::Pass;
use crate::error::PatchError;

/// Uniform registers held back for the spill table pointer once the user
/// data overflows the budget.
pub const TABLE_PTR_RESERVED_ARG_COUNT: u32 = 2;

/// Mutates every entry point not yet in hardware form.
#[derive(Debug)]
pub struct EntryPointMutate;

impl Pass for EntryPointMutate {
    fn name(&self) -> &str {
        "entry-point-mutate"
    }

    fn run(&self, module: &mut Module, state: &mut PipelineState) -> Result<bool, PatchError> {
        let mut changed = false;
        for index in 0..module.entry_points.len() {
            let ep = &module.entry_points[index];
            if is_mutated(&ep.function) {
                continue;
            }
            let stage = ep.stage;
            let data = generate_entry_point_type(state, stage, &ep.function)?;
            let mut func = ep.function.clone();
            mutate_entry_point(&mut module.types, &mut func, state, stage, &data)?;
            module.entry_points[index].function = func;

            let uniform = data.uniform_arg_count();
            log::info!(
                "{} entry point: {uniform} uniform and {} per-lane arguments, {} user-data registers{}",
                stage.name(),
                data.entry_args.len() - uniform,
                data.user_data_regs,
                match &data.spill_table {
                    Some(spill) => format!(", {} nodes spilled", spill.nodes.len()),
                    None => String::new(),
                }
            );
            *state.interface_data_mut(stage) = data;
            changed = true;
        }
        Ok(changed)
    }
}

/// Whether the function already has the hardware calling convention.
fn is_mutated(func: &Function) -> bool {
    !func.arguments.is_empty()
        && func
            .arguments
            .iter()
            .all(|a| matches!(a.binding, Some(Binding::Entry(_))))
}

/// Whether `stage` reads `node`.
///
/// Descriptors are active when the stage accessed their set and binding, a
/// table when any node inside it is. Push constants, the vertex buffer table
/// and the stream-out table follow the stage's usage. A node the stage
/// cannot see is never active.
pub fn is_resource_node_active(
    state: &PipelineState,
    stage: ShaderStage,
    node: &ResourceNode,
    is_root: bool,
) -> bool {
    if !node.is_visible_to(stage) {
        return false;
    }
    let usage = state.resource_usage(stage);
    match node.ty {
        ResourceNodeType::DescriptorTableVaPtr => node
            .inner
            .iter()
            .any(|inner| is_resource_node_active(state, stage, inner, false)),
        ResourceNodeType::PushConst => is_root && usage.push_constants,
        ResourceNodeType::IndirectUserDataVaPtr => {
            is_root && stage == ShaderStage::Vertex && !state.vertex_inputs.is_empty()
        }
        ResourceNodeType::StreamOutTableVaPtr => is_root && usage.xfb.enabled,
        _ => usage.desc_pairs.contains(&(node.set, node.binding)),
    }
}

/// User-data nodes and built-ins an unmutated body refers to.
#[derive(Debug, Default)]
struct BodyRefs {
    nodes: BTreeSet<u32>,
    built_ins: BTreeSet<BuiltInKind>,
}

impl BodyRefs {
    fn scan(func: &Function) -> Self {
        let mut refs = Self::default();
        for arg in &func.arguments {
            match arg.binding {
                Some(Binding::UserData { node }) => {
                    refs.nodes.insert(node);
                }
                Some(Binding::BuiltIn(kind)) => {
                    refs.built_ins.insert(kind);
                }
                _ => {}
            }
        }
        for (_, expr) in func.expressions.iter() {
            let Expression::Call { callee, .. } = expr else {
                continue;
            };
            match *callee {
                Callee::DescriptorTable { node }
                | Callee::RootDescriptor { node, .. }
                | Callee::PushConstants { node } => {
                    refs.nodes.insert(node);
                }
                Callee::InputBuiltIn {
                    kind,
                    per_vertex: false,
                    indexed: false,
                } => {
                    refs.built_ins.insert(kind);
                }
                _ => {}
            }
        }
        refs
    }
}

/// Builds the hardware signature of `stage`.
///
/// Internal user data (draw parameters, view index, table pointers the
/// layout does not provide) comes first, then the active user-data nodes in
/// offset order, then the spill table pointer if anything spilled. System
/// values in uniform registers and the per-lane arguments follow.
pub fn generate_entry_point_type(
    state: &PipelineState,
    stage: ShaderStage,
    func: &Function,
) -> Result<InterfaceData, PatchError> {
    let refs = BodyRefs::scan(func);
    let internal_args = internal_user_data(state, stage, &refs.built_ins);
    let mut nodes: Vec<(u32, &ResourceNode)> = state
        .user_data_nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (index as u32, node))
        .filter(|&(index, node)| {
            refs.nodes.contains(&index) || is_resource_node_active(state, stage, node, true)
        })
        .collect();
    nodes.sort_by_key(|(_, node)| node.offset_in_dwords);

    let budget = state.target.max_user_data;
    let internal: u32 = internal_args.iter().map(|&arg| arg_dwords(arg)).sum();
    let demand = internal + nodes.iter().map(|(_, n)| n.size_in_dwords).sum::<u32>();

    let mut data = InterfaceData::default();
    let mut regs = 0;
    for arg in internal_args {
        regs += push_arg(&mut data, arg, true);
    }

    let placed = if demand <= budget {
        nodes.len()
    } else {
        if internal + TABLE_PTR_RESERVED_ARG_COUNT > budget {
            return Err(PatchError::UserDataOverflow {
                stage,
                needed: demand,
                budget,
            });
        }
        let mut room = budget - internal - TABLE_PTR_RESERVED_ARG_COUNT;
        nodes
            .iter()
            .position(|(_, node)| {
                let fits = node.size_in_dwords <= room;
                if fits {
                    room -= node.size_in_dwords;
                }
                !fits
            })
            .unwrap_or(nodes.len())
    };

    for &(index, node) in &nodes[..placed] {
        data.user_data_map.push(UserDataMapping {
            node: index,
            first_reg: regs,
            dwords: node.size_in_dwords,
        });
        let arg = EntryArg::UserDataNode {
            node: index,
            dwords: node.size_in_dwords,
        };
        regs += push_arg(&mut data, arg, true);
    }

    if let Some(&(_, first)) = nodes.get(placed) {
        let spilled: Vec<u32> = nodes[placed..].iter().map(|&(index, _)| index).collect();
        log::debug!(
            "{}: user data needs {demand} of {budget} registers, spilling nodes {spilled:?}",
            stage.name()
        );
        data.spill_table = Some(SpillTable {
            arg_index: data.entry_args.len() as u32,
            nodes: spilled,
            threshold_in_dwords: first.offset_in_dwords,
        });
        regs += push_arg(&mut data, EntryArg::SpillTable, true);
    }
    data.user_data_regs = regs;

    for arg in system_uniforms(state, stage) {
        push_arg(&mut data, arg, true);
    }
    for arg in lane_args(state, stage, &refs.built_ins) {
        push_arg(&mut data, arg, false);
    }
    Ok(data)
}

fn push_arg(data: &mut InterfaceData, arg: EntryArg, in_reg: bool) -> u32 {
    let dwords = arg_dwords(arg);
    data.entry_args.push(EntryArgInfo {
        arg,
        in_reg,
        dwords,
    });
    dwords
}

fn arg_dwords(arg: EntryArg) -> u32 {
    match arg {
        EntryArg::UserDataNode { dwords, .. } => dwords,
        EntryArg::NumWorkgroupsPtr
        | EntryArg::PerspSample
        | EntryArg::PerspCenter
        | EntryArg::PerspCentroid
        | EntryArg::LinearSample
        | EntryArg::LinearCenter
        | EntryArg::LinearCentroid => 2,
        EntryArg::WorkgroupId | EntryArg::LocalInvocationId | EntryArg::PerspPullMode => 3,
        _ => 1,
    }
}

/// Whether `stage` is the last one before rasterisation.
fn is_last_vertex_stage(state: &PipelineState, stage: ShaderStage) -> bool {
    match stage {
        ShaderStage::Vertex => !state.has_ts() && !state.has_gs(),
        ShaderStage::TessEval => !state.has_gs(),
        ShaderStage::Geometry => true,
        _ => false,
    }
}

fn uses_built_in(
    state: &PipelineState,
    stage: ShaderStage,
    built_ins: &BTreeSet<BuiltInKind>,
    kind: BuiltInKind,
) -> bool {
    built_ins.contains(&kind) || state.resource_usage(stage).uses_built_in_input(kind)
}

/// Values the driver passes as user data ahead of the resource nodes.
fn internal_user_data(
    state: &PipelineState,
    stage: ShaderStage,
    built_ins: &BTreeSet<BuiltInKind>,
) -> Vec<EntryArg> {
    let uses = |kind| uses_built_in(state, stage, built_ins, kind);
    let has_root = |ty| state.user_data_nodes.iter().any(|node| node.ty == ty);
    let mut args = Vec::new();
    match stage {
        ShaderStage::Vertex => {
            if !state.vertex_inputs.is_empty() && !has_root(ResourceNodeType::IndirectUserDataVaPtr)
            {
                args.push(EntryArg::VertexBufferTable);
            }
            if uses(BuiltInKind::BaseVertex) {
                args.push(EntryArg::BaseVertex);
            }
            if uses(BuiltInKind::BaseInstance) || uses(BuiltInKind::InstanceIndex) {
                args.push(EntryArg::BaseInstance);
            }
            if uses(BuiltInKind::DrawIndex) {
                args.push(EntryArg::DrawIndex);
            }
        }
        ShaderStage::Compute => {
            if uses(BuiltInKind::NumWorkgroups) {
                args.push(EntryArg::NumWorkgroupsPtr);
            }
        }
        _ => {}
    }
    if stage != ShaderStage::Compute && (state.options.multiview || uses(BuiltInKind::ViewIndex))
    {
        args.push(EntryArg::ViewIndex);
    }
    if state.resource_usage(stage).xfb.enabled
        && is_last_vertex_stage(state, stage)
        && !has_root(ResourceNodeType::StreamOutTableVaPtr)
    {
        args.push(EntryArg::StreamOutTable);
    }
    args
}

/// System values the hardware loads into uniform registers after the user
/// data.
fn system_uniforms(state: &PipelineState, stage: ShaderStage) -> Vec<EntryArg> {
    let xfb = &state.resource_usage(stage).xfb;
    let mut stream_out = Vec::new();
    if xfb.enabled {
        stream_out.push(EntryArg::StreamOutWriteIndex);
        stream_out.extend(
            (0..4u32)
                .filter(|&buffer| xfb.strides[buffer as usize] != 0)
                .map(EntryArg::StreamOutOffset),
        );
    }
    match stage {
        ShaderStage::Vertex if state.has_ts() => Vec::new(),
        ShaderStage::Vertex if state.has_gs() => vec![EntryArg::EsGsOffset],
        ShaderStage::Vertex => stream_out,
        ShaderStage::TessControl => vec![EntryArg::OffChipLdsBase, EntryArg::TessFactorBufferBase],
        ShaderStage::TessEval => {
            let mut args = vec![EntryArg::OffChipLdsBase];
            if state.has_gs() {
                args.push(EntryArg::EsGsOffset);
            } else {
                args.extend(stream_out);
            }
            args
        }
        ShaderStage::Geometry => vec![EntryArg::GsVsOffset, EntryArg::GsWaveId],
        ShaderStage::Fragment => vec![EntryArg::PrimMask],
        ShaderStage::Compute => vec![EntryArg::WorkgroupId],
    }
}

/// Per-lane arguments in hardware order.
fn lane_args(
    state: &PipelineState,
    stage: ShaderStage,
    built_ins: &BTreeSet<BuiltInKind>,
) -> Vec<EntryArg> {
    match stage {
        ShaderStage::Vertex => vec![
            EntryArg::VertexId,
            EntryArg::RelVertexId,
            EntryArg::VsPrimitiveId,
            EntryArg::InstanceId,
        ],
        ShaderStage::TessControl => vec![EntryArg::PatchId, EntryArg::RelPatchId],
        ShaderStage::TessEval => vec![
            EntryArg::TessCoordX,
            EntryArg::TessCoordY,
            EntryArg::RelPatchId,
            EntryArg::PatchId,
        ],
        ShaderStage::Geometry => {
            let mut args: Vec<EntryArg> = (0..6).map(EntryArg::EsGsOffsets).collect();
            args.extend([EntryArg::GsPrimitiveId, EntryArg::GsInvocationId]);
            args
        }
        ShaderStage::Fragment => fragment_lane_args(state, built_ins),
        ShaderStage::Compute => vec![EntryArg::LocalInvocationId],
    }
}

fn fragment_lane_args(state: &PipelineState, built_ins: &BTreeSet<BuiltInKind>) -> Vec<EntryArg> {
    let stage = ShaderStage::Fragment;
    let interp = &state.resource_usage(stage).interp;
    let uses = |kind| uses_built_in(state, stage, built_ins, kind);
    let persp = interp.smooth;
    let linear = interp.no_persp;
    let wanted = [
        (
            EntryArg::PerspSample,
            (persp && interp.sample) || uses(BuiltInKind::InterpPerspSample),
        ),
        (
            EntryArg::PerspCenter,
            (persp && interp.center) || uses(BuiltInKind::InterpPerspCenter),
        ),
        (
            EntryArg::PerspCentroid,
            (persp && interp.centroid) || uses(BuiltInKind::InterpPerspCentroid),
        ),
        (
            EntryArg::PerspPullMode,
            interp.pull_mode || uses(BuiltInKind::InterpPullMode),
        ),
        (
            EntryArg::LinearSample,
            (linear && interp.sample) || uses(BuiltInKind::InterpLinearSample),
        ),
        (
            EntryArg::LinearCenter,
            (linear && interp.center) || uses(BuiltInKind::InterpLinearCenter),
        ),
        (
            EntryArg::LinearCentroid,
            (linear && interp.centroid) || uses(BuiltInKind::InterpLinearCentroid),
        ),
    ];
    let mut args: Vec<EntryArg> = wanted
        .into_iter()
        .filter(|&(_, used)| used)
        .map(|(arg, _)| arg)
        .collect();
    if uses(BuiltInKind::FragCoord) {
        args.extend((0..4).map(EntryArg::FragCoord));
    }
    if uses(BuiltInKind::FrontFacing) {
        args.push(EntryArg::FrontFacing);
    }
    if uses(BuiltInKind::SampleId) {
        args.push(EntryArg::Ancillary);
    }
    if uses(BuiltInKind::SampleMask) {
        args.push(EntryArg::SampleCoverage);
    }
    args
}

/// The hardware argument holding built-in `kind` as is.
fn built_in_arg(stage: ShaderStage, kind: BuiltInKind) -> Option<EntryArg> {
    use BuiltInKind as B;
    use ShaderStage as S;
    Some(match (stage, kind) {
        (S::Compute, B::ViewIndex) => return None,
        (_, B::ViewIndex) => EntryArg::ViewIndex,
        (S::Vertex, B::VertexIndex) => EntryArg::VertexId,
        (S::Vertex, B::InstanceId) => EntryArg::InstanceId,
        (S::Vertex, B::BaseVertex) => EntryArg::BaseVertex,
        (S::Vertex, B::BaseInstance) => EntryArg::BaseInstance,
        (S::Vertex, B::DrawIndex) => EntryArg::DrawIndex,
        (S::Vertex, B::PrimitiveId) => EntryArg::VsPrimitiveId,
        (S::TessControl | S::TessEval, B::PrimitiveId) => EntryArg::PatchId,
        (S::Geometry, B::PrimitiveId) => EntryArg::GsPrimitiveId,
        (S::Geometry, B::InvocationId) => EntryArg::GsInvocationId,
        (S::Fragment, B::FrontFacing) => EntryArg::FrontFacing,
        (S::Fragment, B::SampleMask) => EntryArg::SampleCoverage,
        (S::Fragment, B::InterpPerspSample) => EntryArg::PerspSample,
        (S::Fragment, B::InterpPerspCenter) => EntryArg::PerspCenter,
        (S::Fragment, B::InterpPerspCentroid) => EntryArg::PerspCentroid,
        (S::Fragment, B::InterpPullMode) => EntryArg::PerspPullMode,
        (S::Fragment, B::InterpLinearSample) => EntryArg::LinearSample,
        (S::Fragment, B::InterpLinearCenter) => EntryArg::LinearCenter,
        (S::Fragment, B::InterpLinearCentroid) => EntryArg::LinearCentroid,
        (S::Compute, B::WorkgroupId) => EntryArg::WorkgroupId,
        (S::Compute, B::LocalInvocationId) => EntryArg::LocalInvocationId,
        (S::Compute, B::NumWorkgroups) => EntryArg::NumWorkgroupsPtr,
        _ => return None,
    })
}

fn insert_type(types: &mut UniqueArena<Type>, inner: TypeInner) -> Handle<Type> {
    types.insert(Type { name: None, inner })
}

fn arg_type(types: &mut UniqueArena<Type>, nodes: &[ResourceNode], arg: EntryArg) -> Handle<Type> {
    let u32_ty = insert_type(types, TypeInner::Scalar(Scalar::U32));
    let constant_ptr = |types: &mut UniqueArena<Type>, base| {
        insert_type(
            types,
            TypeInner::Pointer {
                base,
                space: AddressSpace::Constant,
            },
        )
    };
    let vector = |types: &mut UniqueArena<Type>, size, scalar| {
        insert_type(types, TypeInner::Vector { size, scalar })
    };
    match arg {
        EntryArg::UserDataNode { node, dwords } => {
            let is_pointer = nodes.get(node as usize).is_some_and(|n| {
                matches!(
                    n.ty,
                    ResourceNodeType::DescriptorTableVaPtr
                        | ResourceNodeType::IndirectUserDataVaPtr
                        | ResourceNodeType::StreamOutTableVaPtr
                )
            });
            if is_pointer {
                constant_ptr(types, u32_ty)
            } else if dwords == 1 {
                u32_ty
            } else {
                insert_type(
                    types,
                    TypeInner::Array {
                        base: u32_ty,
                        size: dwords,
                    },
                )
            }
        }
        EntryArg::SpillTable | EntryArg::VertexBufferTable | EntryArg::StreamOutTable => {
            constant_ptr(types, u32_ty)
        }
        EntryArg::NumWorkgroupsPtr => {
            let counts = vector(types, VectorSize::Tri, Scalar::U32);
            constant_ptr(types, counts)
        }
        EntryArg::WorkgroupId | EntryArg::LocalInvocationId => {
            vector(types, VectorSize::Tri, Scalar::U32)
        }
        EntryArg::PerspSample
        | EntryArg::PerspCenter
        | EntryArg::PerspCentroid
        | EntryArg::LinearSample
        | EntryArg::LinearCenter
        | EntryArg::LinearCentroid => vector(types, VectorSize::Bi, Scalar::F32),
        EntryArg::PerspPullMode => vector(types, VectorSize::Tri, Scalar::F32),
        EntryArg::FragCoord(_) => insert_type(types, TypeInner::Scalar(Scalar::F32)),
        _ => u32_ty,
    }
}

/// Position of the register argument holding root node `node`.
fn node_arg_index(data: &InterfaceData, node: u32) -> Option<u32> {
    data.entry_args
        .iter()
        .position(|info| matches!(info.arg, EntryArg::UserDataNode { node: n, .. } if n == node))
        .map(|i| i as u32)
}

/// Replaces the arguments of `func` with the signature in `data` and
/// rewrites every read of the old ones.
pub fn mutate_entry_point(
    types: &mut UniqueArena<Type>,
    func: &mut Function,
    state: &PipelineState,
    stage: ShaderStage,
    data: &InterfaceData,
) -> Result<(), PatchError> {
    let old_args = std::mem::take(&mut func.arguments);
    let mut arg_types = Vec::with_capacity(data.entry_args.len());
    for info in &data.entry_args {
        let ty = arg_type(types, &state.user_data_nodes, info.arg);
        func.arguments.push(FunctionArgument {
            name: Some(info.arg.to_string()),
            ty,
            binding: Some(Binding::Entry(info.arg)),
            in_reg: info.in_reg,
        });
        arg_types.push(ty);
    }

    let original = func.expressions.len() as u32;
    let mut rewriter = Rewriter {
        types,
        func: &mut *func,
        data,
        nodes: &state.user_data_nodes,
        stage,
        arg_types,
        arg_reads: BTreeMap::new(),
    };
    for index in 0..original {
        let handle = Handle::new(index);
        let want = rewriter.func.expression_type(handle);
        let expr = rewriter.func.expressions[handle].clone();
        let replacement = match expr {
            Expression::FunctionArgument(arg) => Some(rewriter.old_argument(&old_args, arg, want)?),
            Expression::Call { callee, .. } => rewriter.call(callee, want)?,
            _ => None,
        };
        if let Some(expr) = replacement {
            rewriter.func.replace_expression(handle, expr);
        }
    }

    let end = func.expressions.len() as u32;
    if original < end {
        func.body
            .insert(0, Statement::Emit(Range::from_index_range(original..end)));
    }
    Ok(())
}

struct Rewriter<'a> {
    types: &'a mut UniqueArena<Type>,
    func: &'a mut Function,
    data: &'a InterfaceData,
    nodes: &'a [ResourceNode],
    stage: ShaderStage,
    arg_types: Vec<Handle<Type>>,
    /// Prologue reads of the new arguments, one per argument.
    arg_reads: BTreeMap<u32, Handle<Expression>>,
}

impl Rewriter<'_> {
    fn helper(&mut self, expr: Expression, ty: Handle<Type>) -> Handle<Expression> {
        self.func.add_expression(expr, ty)
    }

    fn scalar_type(&mut self, scalar: Scalar) -> Handle<Type> {
        insert_type(self.types, TypeInner::Scalar(scalar))
    }

    fn literal(&mut self, lit: Literal) -> Handle<Expression> {
        let ty = self.scalar_type(lit.scalar());
        self.helper(Expression::Literal(lit), ty)
    }

    fn arg(&mut self, index: u32) -> Handle<Expression> {
        if let Some(&read) = self.arg_reads.get(&index) {
            return read;
        }
        let ty = self.arg_types[index as usize];
        let read = self.helper(Expression::FunctionArgument(index), ty);
        self.arg_reads.insert(index, read);
        read
    }

    fn unknown_node(&self, node: u32) -> PatchError {
        PatchError::UnknownNode {
            stage: self.stage,
            node,
        }
    }

    /// Turns `value` into an expression of type `want`: the value itself,
    /// a load through it, a truth test or a same-size bitcast.
    fn coerce(&mut self, value: Handle<Expression>, want: Handle<Type>) -> Option<Expression> {
        let have = self.func.expression_type(value);
        if have == want {
            return Some(self.func.expressions[value].clone());
        }
        let have_inner = self.types[have].inner.clone();
        let want_inner = self.types[want].inner.clone();
        match (have_inner, want_inner) {
            (TypeInner::Pointer { base, .. }, _) if base == want => {
                Some(Expression::Load { pointer: value })
            }
            (TypeInner::Scalar(Scalar::U32), TypeInner::Scalar(want_scalar))
                if want_scalar == Scalar::BOOL =>
            {
                let zero = self.literal(Literal::U32(0));
                Some(Expression::Binary {
                    op: BinaryOp::NotEqual,
                    left: value,
                    right: zero,
                })
            }
            (_, TypeInner::Array { base, size: 1 }) => {
                let element = self.coerce(value, base)?;
                let element = self.helper(element, base);
                Some(Expression::Compose {
                    ty: want,
                    components: vec![element],
                })
            }
            (have, want_inner)
                if have.bit_size().is_some() && have.bit_size() == want_inner.bit_size() =>
            {
                Some(Expression::Bitcast {
                    expr: value,
                    ty: want,
                })
            }
            _ => None,
        }
    }

    /// Reads register argument `index` as `want`, reinterpreting its
    /// dwords when the types differ.
    fn in_regs(&mut self, index: u32, want: Handle<Type>) -> Expression {
        let value = self.arg(index);
        if let Some(expr) = self.coerce(value, want) {
            return expr;
        }
        let count = self.data.entry_args[index as usize].dwords;
        let ptr_ty = insert_type(
            self.types,
            TypeInner::Pointer {
                base: want,
                space: AddressSpace::Arguments,
            },
        );
        let pointer = self.helper(Expression::ArgumentPointer { first: index, count }, ptr_ty);
        Expression::Load { pointer }
    }

    /// Address of spilled node `node` in the spill table.
    fn spill_address(&mut self, node: u32) -> Option<Expression> {
        let data = self.data;
        let table = data.spill_table.as_ref()?;
        if !table.nodes.contains(&node) {
            return None;
        }
        let offset = self
            .nodes
            .get(node as usize)?
            .offset_in_dwords
            .checked_sub(table.threshold_in_dwords)?;
        let pointer = self.arg(table.arg_index);
        let offset = self.literal(Literal::U32(4 * offset));
        Some(Expression::Offset { pointer, offset })
    }

    /// The value of root node `node` as `want`.
    fn node_value(&mut self, node: u32, want: Handle<Type>) -> Result<Expression, PatchError> {
        if let Some(index) = node_arg_index(self.data, node) {
            return Ok(self.in_regs(index, want));
        }
        let address = self.spill_address(node).ok_or_else(|| self.unknown_node(node))?;
        if !matches!(self.types[want].inner, TypeInner::Pointer { .. }) {
            let ptr_ty = insert_type(
                self.types,
                TypeInner::Pointer {
                    base: want,
                    space: AddressSpace::Constant,
                },
            );
            let pointer = self.helper(address, ptr_ty);
            return Ok(Expression::Load { pointer });
        }
        // User data holds the low 32 bits of a table address.
        let u32_ty = self.scalar_type(Scalar::U32);
        let ptr_ty = insert_type(
            self.types,
            TypeInner::Pointer {
                base: u32_ty,
                space: AddressSpace::Constant,
            },
        );
        let pointer = self.helper(address, ptr_ty);
        let low = self.helper(Expression::Load { pointer }, u32_ty);
        let u64_ty = self.scalar_type(Scalar::U64);
        let wide = self.helper(
            Expression::As {
                expr: low,
                kind: ScalarKind::Uint,
                convert: Some(8),
            },
            u64_ty,
        );
        Ok(Expression::Bitcast {
            expr: wide,
            ty: want,
        })
    }

    /// A pointer to the data of root node `node`.
    fn node_pointer(&mut self, node: u32) -> Result<Expression, PatchError> {
        if let Some(index) = node_arg_index(self.data, node) {
            let count = self.data.entry_args[index as usize].dwords;
            return Ok(Expression::ArgumentPointer {
                first: index,
                count,
            });
        }
        self.spill_address(node).ok_or_else(|| self.unknown_node(node))
    }

    fn built_in(&mut self, kind: BuiltInKind, want: Handle<Type>) -> Option<Expression> {
        let data = self.data;
        match (self.stage, kind) {
            (ShaderStage::Fragment, BuiltInKind::FragCoord) => {
                let mut components = Vec::with_capacity(4);
                for i in 0..4 {
                    let index = data.arg_index(EntryArg::FragCoord(i))?;
                    components.push(self.arg(index));
                }
                Some(Expression::Compose {
                    ty: want,
                    components,
                })
            }
            (ShaderStage::Vertex, BuiltInKind::InstanceIndex) => {
                let id = self.arg(data.arg_index(EntryArg::InstanceId)?);
                let base = self.arg(data.arg_index(EntryArg::BaseInstance)?);
                let u32_ty = self.scalar_type(Scalar::U32);
                let sum = self.helper(
                    Expression::Binary {
                        op: BinaryOp::Add,
                        left: id,
                        right: base,
                    },
                    u32_ty,
                );
                self.coerce(sum, want)
            }
            (stage, kind) => {
                let index = data.arg_index(built_in_arg(stage, kind)?)?;
                let value = self.arg(index);
                self.coerce(value, want)
            }
        }
    }

    fn old_argument(
        &mut self,
        old: &[FunctionArgument],
        index: u32,
        want: Handle<Type>,
    ) -> Result<Expression, PatchError> {
        match old.get(index as usize).and_then(|arg| arg.binding) {
            Some(Binding::UserData { node }) => self.node_value(node, want),
            Some(Binding::BuiltIn(kind)) => Ok(self.built_in(kind, want).unwrap_or(
                // Left for the back end to resolve.
                Expression::Call {
                    callee: Callee::InputBuiltIn {
                        kind,
                        per_vertex: false,
                        indexed: false,
                    },
                    args: Vec::new(),
                },
            )),
            Some(Binding::Entry(arg)) => match self.data.arg_index(arg) {
                Some(new) => Ok(self.in_regs(new, want)),
                None => Err(PatchError::UnboundArgument {
                    stage: self.stage,
                    index,
                }),
            },
            None => Err(PatchError::UnboundArgument {
                stage: self.stage,
                index,
            }),
        }
    }

    fn call(&mut self, callee: Callee, want: Handle<Type>) -> Result<Option<Expression>, PatchError> {
        Ok(match callee {
            Callee::DescriptorTable { node } | Callee::RootDescriptor { node, .. } => {
                Some(self.node_value(node, want)?)
            }
            Callee::PushConstants { node } => Some(self.node_pointer(node)?),
            Callee::InputBuiltIn {
                kind,
                per_vertex: false,
                indexed: false,
            } => self.built_in(kind, want),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use wavefront_ir::StageMask;
    use wavefront_state::TargetInfo;

    use super::*;

    fn nodes(count: u32) -> Vec<ResourceNode> {
        (0..count)
            .map(|i| {
                ResourceNode::descriptor(ResourceNodeType::DescriptorBufferCompact, 0, i, 2 * i, 1)
            })
            .collect()
    }

    fn compute_state(count: u32, budget: u32) -> PipelineState {
        let mut state = PipelineState::new(TargetInfo::default());
        state.target.max_user_data = budget;
        state.add_stage(ShaderStage::Compute);
        state.user_data_nodes = nodes(count);
        let usage = state.resource_usage_mut(ShaderStage::Compute);
        usage.desc_pairs.extend((0..count).map(|i| (0, i)));
        state
    }

    fn empty() -> Function {
        Function::new("main")
    }

    #[test]
    fn within_budget_has_no_spill_pointer() {
        let state = compute_state(4, 16);
        let data = generate_entry_point_type(&state, ShaderStage::Compute, &empty()).unwrap();
        assert!(data.spill_table.is_none());
        assert_eq!(data.user_data_regs, 8);
        assert_eq!(data.arg_index(EntryArg::SpillTable), None);
        let regs: Vec<u32> = data.user_data_map.iter().map(|m| m.first_reg).collect();
        assert_eq!(regs, vec![0, 2, 4, 6]);
        assert_eq!(
            data.entry_args.last().map(|a| (a.arg, a.in_reg)),
            Some((EntryArg::LocalInvocationId, false))
        );
        assert_eq!(data.uniform_arg_count(), 5);
    }

    #[test]
    fn overflow_spills_through_one_pointer() {
        // Ten two-dword nodes against a budget of twelve: five fit after the
        // reserved slots.
        let state = compute_state(10, 12);
        let data = generate_entry_point_type(&state, ShaderStage::Compute, &empty()).unwrap();
        let spill = data.spill_table.clone().unwrap();
        assert_eq!(spill.nodes, vec![5, 6, 7, 8, 9]);
        assert_eq!(spill.threshold_in_dwords, 10);
        assert_eq!(data.user_data_map.len(), 5);
        assert_eq!(
            data.entry_args
                .iter()
                .filter(|a| a.arg == EntryArg::SpillTable)
                .count(),
            1
        );
        assert_eq!(spill.arg_index, 5);
        assert_eq!(data.user_data_regs, 11);
        assert!(data.user_data_regs <= state.target.max_user_data);
    }

    #[test]
    fn internal_data_without_room_is_an_error() {
        let mut state = compute_state(3, 2);
        state
            .resource_usage_mut(ShaderStage::Compute)
            .mark_built_in_input(BuiltInKind::NumWorkgroups, 1);
        let err = generate_entry_point_type(&state, ShaderStage::Compute, &empty()).unwrap_err();
        assert!(matches!(
            err,
            PatchError::UserDataOverflow {
                needed: 8,
                budget: 2,
                ..
            }
        ));
    }

    #[test]
    fn inactive_and_invisible_nodes_are_skipped() {
        let mut state = compute_state(3, 16);
        state.user_data_nodes[1].visibility = StageMask::FRAGMENT;
        state
            .resource_usage_mut(ShaderStage::Compute)
            .desc_pairs
            .remove(&(0, 2));
        let data = generate_entry_point_type(&state, ShaderStage::Compute, &empty()).unwrap();
        let mapped: Vec<u32> = data.user_data_map.iter().map(|m| m.node).collect();
        assert_eq!(mapped, vec![0]);
    }

    #[test]
    fn table_activity_follows_inner_nodes() {
        let mut state = PipelineState::new(TargetInfo::default());
        let table = ResourceNode::table(
            0,
            vec![ResourceNode::descriptor(
                ResourceNodeType::DescriptorSampler,
                1,
                3,
                0,
                1,
            )],
        );
        assert!(!is_resource_node_active(&state, ShaderStage::Fragment, &table, true));
        state
            .resource_usage_mut(ShaderStage::Fragment)
            .desc_pairs
            .insert((1, 3));
        assert!(is_resource_node_active(&state, ShaderStage::Fragment, &table, true));
        assert!(!is_resource_node_active(&state, ShaderStage::Vertex, &table, true));

        let push = ResourceNode::root(ResourceNodeType::PushConst, 1, 4);
        assert!(!is_resource_node_active(&state, ShaderStage::Fragment, &push, true));
        state.resource_usage_mut(ShaderStage::Fragment).push_constants = true;
        assert!(is_resource_node_active(&state, ShaderStage::Fragment, &push, true));
        assert!(!is_resource_node_active(&state, ShaderStage::Fragment, &push, false));
    }

    #[test]
    fn stage_composition_picks_system_values() {
        let mut state = PipelineState::new(TargetInfo::default());
        for stage in [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment] {
            state.add_stage(stage);
        }
        let vs = generate_entry_point_type(&state, ShaderStage::Vertex, &empty()).unwrap();
        assert!(vs.arg_index(EntryArg::EsGsOffset).is_some());
        assert_eq!(vs.uniform_arg_count(), 1);

        let gs = generate_entry_point_type(&state, ShaderStage::Geometry, &empty()).unwrap();
        let lanes: Vec<EntryArg> = gs.entry_args.iter().filter(|a| !a.in_reg).map(|a| a.arg).collect();
        assert_eq!(lanes.len(), 8);
        assert_eq!(lanes[6], EntryArg::GsPrimitiveId);

        state.options.multiview = true;
        let fs = generate_entry_point_type(&state, ShaderStage::Fragment, &empty()).unwrap();
        assert_eq!(fs.entry_args[0].arg, EntryArg::ViewIndex);
        assert_eq!(fs.user_data_regs, 1);
        assert!(fs.arg_index(EntryArg::PrimMask).is_some());
    }

    #[test]
    fn vertex_draw_parameters_follow_usage() {
        let mut state = PipelineState::new(TargetInfo::default());
        state.add_stage(ShaderStage::Vertex);
        let mut func = empty();
        let i32_ty = insert_type(&mut UniqueArena::new(), TypeInner::Scalar(Scalar::I32));
        func.arguments.push(FunctionArgument {
            name: None,
            ty: i32_ty,
            binding: Some(Binding::BuiltIn(BuiltInKind::InstanceIndex)),
            in_reg: false,
        });
        let data = generate_entry_point_type(&state, ShaderStage::Vertex, &func).unwrap();
        assert_eq!(data.entry_args[0].arg, EntryArg::BaseInstance);
        assert!(data.arg_index(EntryArg::BaseVertex).is_none());
        assert!(data.arg_index(EntryArg::InstanceId).is_some());
    }

    #[test]
    fn fragment_interpolation_args() {
        let mut state = PipelineState::new(TargetInfo::default());
        let usage = state.resource_usage_mut(ShaderStage::Fragment);
        usage.interp.smooth = true;
        usage.interp.center = true;
        usage.mark_built_in_input(BuiltInKind::FragCoord, 1);
        let data = generate_entry_point_type(&state, ShaderStage::Fragment, &empty()).unwrap();
        let lanes: Vec<EntryArg> = data.entry_args.iter().filter(|a| !a.in_reg).map(|a| a.arg).collect();
        assert_eq!(
            lanes,
            vec![
                EntryArg::PerspCenter,
                EntryArg::FragCoord(0),
                EntryArg::FragCoord(1),
                EntryArg::FragCoord(2),
                EntryArg::FragCoord(3),
            ]
        );
        assert_eq!(data.entry_args[data.arg_index(EntryArg::PerspCenter).unwrap() as usize].dwords, 2);
    }

    #[test]
    fn unbound_argument_is_rejected() {
        let state = compute_state(0, 16);
        let mut types = UniqueArena::new();
        let u32_ty = insert_type(&mut types, TypeInner::Scalar(Scalar::U32));
        let mut func = empty();
        func.arguments.push(FunctionArgument {
            name: None,
            ty: u32_ty,
            binding: None,
            in_reg: false,
        });
        func.add_expression(Expression::FunctionArgument(0), u32_ty);
        let data = generate_entry_point_type(&state, ShaderStage::Compute, &func).unwrap();
        let err = mutate_entry_point(&mut types, &mut func, &state, ShaderStage::Compute, &data)
            .unwrap_err();
        assert!(matches!(err, PatchError::UnboundArgument { index: 0, .. }));
    }

    #[test]
    fn mutated_functions_are_left_alone() {
        let mut module = Module::default();
        let index = module.get_or_add_entry_point(ShaderStage::Compute);
        let mut state = compute_state(2, 16);
        assert!(EntryPointMutate.run(&mut module, &mut state).unwrap());
        let args = module.entry_points[index].function.arguments.len();
        assert_eq!(args, 4);
        assert!(is_mutated(&module.entry_points[index].function));
        assert!(!EntryPointMutate.run(&mut module, &mut state).unwrap());
        assert_eq!(module.entry_points[index].function.arguments.len(), args);
        assert_eq!(state.interface_data(ShaderStage::Compute).user_data_regs, 4);
    }
}
