//! Entry-point mutation checked by execution: a shader must compute the same
//! values before and after its arguments are rewritten to the hardware
//! calling convention, with and without spilled user data.

use std::collections::HashMap;

use wavefront_builder::{Builder, InOutInfo};
use wavefront_interp::{Execution, Invocation, MemoryHost, Pointer, Value};
use wavefront_ir::{BuiltInKind, EntryArg, Expression, Handle, Module, Scalar, ShaderStage};
use wavefront_patch::{PatchError, patch};
use wavefront_state::{PipelineState, ResourceNode, ResourceNodeType, TargetInfo};

const TABLE: u64 = 0x1000;
const PUSH: u64 = 0x2000;
const SPILL: u64 = 0x3000;
const WAVE: u32 = 32;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn compute_state(max_user_data: u32) -> PipelineState {
    let mut target = TargetInfo::for_gfx_ip(10, 3);
    target.max_user_data = max_user_data;
    target.set_wave_size_all(WAVE).unwrap();
    let mut state = PipelineState::new(target);
    state.user_data_nodes = vec![
        ResourceNode::table(
            0,
            vec![ResourceNode::descriptor(ResourceNodeType::DescriptorBuffer, 0, 0, 0, 1)],
        ),
        ResourceNode::descriptor(ResourceNodeType::DescriptorBufferCompact, 1, 0, 1, 1),
        ResourceNode::root(ResourceNodeType::PushConst, 3, 4),
    ];
    state
}

/// Contents of each root node as the driver would write them.
fn node_dwords() -> HashMap<u32, Vec<u32>> {
    HashMap::from([
        (0, vec![TABLE as u32]),
        (1, vec![0xDEAD_B000, 0x1234_5678]),
        (2, vec![1, 2, 3, 4]),
    ])
}

/// Builds a compute shader reading a table descriptor, a compact root
/// descriptor, a push constant and two built-ins. Every result is stored to
/// a local so that dead code elimination keeps it.
fn build_compute(module: &mut Module, state: &mut PipelineState) -> Vec<Handle<Expression>> {
    let mut b = Builder::for_stage(module, state, ShaderStage::Compute);
    let zero = b.const_u32(0);
    let table_desc = b.create_load_buffer_desc(0, 0, zero, false, false).unwrap();
    let root_desc = b.create_load_buffer_desc(1, 0, zero, false, false).unwrap();
    let u32_ty = b.scalar_type(Scalar::U32);
    let push = b.create_load_push_constants_ptr(u32_ty);
    let eight = b.const_u32(8);
    let third = b.offset_pointer(push, eight, u32_ty);
    let constant = b.load(third);
    let local_id = b
        .create_read_builtin_input(BuiltInKind::LocalInvocationId, InOutInfo::default(), None, None)
        .unwrap();
    let group_id = b
        .create_read_builtin_input(BuiltInKind::WorkgroupId, InOutInfo::default(), None, None)
        .unwrap();
    let results = vec![table_desc, root_desc, constant, local_id, group_id];
    for &value in &results {
        let ty = b.type_of(value);
        let local = b.add_local("keep", ty);
        b.store(local, value);
    }
    results
}

fn local_id(lane: u32) -> Value {
    Value::Composite(vec![Value::U32(lane), Value::U32(0), Value::U32(0)])
}

fn group_id() -> Value {
    Value::Composite(vec![Value::U32(2), Value::U32(3), Value::U32(4)])
}

/// Memory shared by both runs: the descriptor table and the push constants.
fn base_host() -> MemoryHost {
    let mut host = MemoryHost::new();
    host.write_dwords(TABLE, &[10, 11, 12, 13]);
    host.write_dwords(PUSH, &node_dwords()[&2]);
    host
}

/// Runs the shader as built, with user data and built-ins served by the
/// host.
fn run_unpatched(module: &Module) -> Execution {
    let mut host = base_host();
    host.descriptor_tables.insert(0, TABLE);
    host.root_descriptors.insert(1, node_dwords()[&1].clone());
    host.push_constants = PUSH;
    host.set_uniform_built_in(BuiltInKind::WorkgroupId, group_id());
    for lane in 0..WAVE {
        host.built_ins
            .insert((BuiltInKind::LocalInvocationId, lane), local_id(lane));
    }
    let func = &module.entry_points[0].function;
    wavefront_interp::run(&module.types, func, &Invocation::new(WAVE), &mut host).unwrap()
}

/// Runs the mutated shader with arguments laid out as its interface data
/// describes and spilled user data copied to memory.
fn run_patched(module: &Module, state: &PipelineState) -> Execution {
    let data = state.interface_data(ShaderStage::Compute);
    let dwords = node_dwords();
    let mut host = base_host();
    if let Some(spill) = &data.spill_table {
        for &node in &spill.nodes {
            let offset = state.user_data_nodes[node as usize].offset_in_dwords;
            let at = SPILL + 4 * u64::from(offset - spill.threshold_in_dwords);
            host.write_dwords(at, &dwords[&node]);
        }
    }

    let mut invocation = Invocation::new(WAVE);
    for info in &data.entry_args {
        invocation = match info.arg {
            EntryArg::UserDataNode { node: 0, .. } => {
                invocation.uniform_arg(Value::Pointer(Pointer::Memory { address: TABLE }))
            }
            EntryArg::UserDataNode { node, .. } => invocation.uniform_arg(Value::Composite(
                dwords[&node].iter().map(|&d| Value::U32(d)).collect(),
            )),
            EntryArg::SpillTable => {
                invocation.uniform_arg(Value::Pointer(Pointer::Memory { address: SPILL }))
            }
            EntryArg::WorkgroupId => invocation.uniform_arg(group_id()),
            EntryArg::LocalInvocationId => invocation.lane_arg_with(local_id),
            other => panic!("unexpected compute argument {other}"),
        };
    }
    let func = &module.entry_points[0].function;
    wavefront_interp::run(&module.types, func, &invocation, &mut host).unwrap()
}

fn assert_same_results(before: &Execution, after: &Execution, results: &[Handle<Expression>]) {
    for &handle in results {
        for lane in [0, 5, WAVE - 1] {
            let want = before.lane(handle, lane).expect("value before patching");
            let got = after.lane(handle, lane).expect("value after patching");
            assert!(got.bit_eq(want), "{handle:?} lane {lane}: {got:?} != {want:?}");
        }
    }
}

fn patch_and_compare(max_user_data: u32) -> PipelineState {
    init_logger();
    let mut module = Module::default();
    let mut state = compute_state(max_user_data);
    let results = build_compute(&mut module, &mut state);
    let before = run_unpatched(&module);

    patch(&mut module, &mut state).unwrap();
    let after = run_patched(&module, &state);
    assert_same_results(&before, &after, &results);
    assert_eq!(
        after.lane(results[0], 0).unwrap().to_u32_vec(),
        vec![10, 11, 12, 13]
    );
    assert_eq!(after.lane(results[2], 3).unwrap().as_u32(), Some(3));
    state
}

#[test]
fn user_data_in_registers() {
    let state = patch_and_compare(32);
    let data = state.interface_data(ShaderStage::Compute);
    assert!(data.spill_table.is_none());
    assert_eq!(data.user_data_regs, 7);
    let firsts: Vec<u32> = data.user_data_map.iter().map(|m| m.first_reg).collect();
    assert_eq!(firsts, vec![0, 1, 3]);
}

#[test]
fn trailing_nodes_spill() {
    let state = patch_and_compare(4);
    let data = state.interface_data(ShaderStage::Compute);
    let spill = data.spill_table.as_ref().expect("spill table");
    assert_eq!(spill.nodes, vec![1, 2]);
    assert_eq!(spill.threshold_in_dwords, 1);
    assert_eq!(data.user_data_regs, 2);
}

#[test]
fn everything_spills() {
    let state = patch_and_compare(2);
    let data = state.interface_data(ShaderStage::Compute);
    let spill = data.spill_table.as_ref().expect("spill table");
    assert_eq!(spill.nodes, vec![0, 1, 2]);
    assert_eq!(spill.arg_index, 0);
    assert!(data.user_data_map.is_empty());
}

#[test]
fn budget_without_room_for_the_spill_pointer() {
    init_logger();
    let mut module = Module::default();
    let mut state = compute_state(1);
    build_compute(&mut module, &mut state);
    let err = patch(&mut module, &mut state).unwrap_err();
    assert!(matches!(
        err,
        PatchError::UserDataOverflow {
            needed: 7,
            budget: 1,
            ..
        }
    ));
    // The failed mutation leaves the signature untouched.
    assert!(module.entry_points[0].function.arguments.is_empty());
}

#[test]
fn vertex_instance_index_adds_base_instance() {
    init_logger();
    let mut target = TargetInfo::for_gfx_ip(10, 3);
    target.set_wave_size_all(WAVE).unwrap();
    let mut state = PipelineState::new(target);
    let mut module = Module::default();
    let (vertex, instance) = {
        let mut b = Builder::for_stage(&mut module, &mut state, ShaderStage::Vertex);
        let vertex = b
            .create_read_builtin_input(BuiltInKind::VertexIndex, InOutInfo::default(), None, None)
            .unwrap();
        let instance = b
            .create_read_builtin_input(BuiltInKind::InstanceIndex, InOutInfo::default(), None, None)
            .unwrap();
        for value in [vertex, instance] {
            let ty = b.type_of(value);
            let local = b.add_local("keep", ty);
            b.store(local, value);
        }
        (vertex, instance)
    };
    patch(&mut module, &mut state).unwrap();

    let data = state.interface_data(ShaderStage::Vertex);
    assert_eq!(data.arg_index(EntryArg::BaseInstance), Some(0));
    assert_eq!(data.user_data_regs, 1);
    let mut invocation = Invocation::new(WAVE);
    for info in &data.entry_args {
        invocation = match info.arg {
            EntryArg::BaseInstance => invocation.uniform_arg(Value::U32(100)),
            EntryArg::VertexId => invocation.lane_arg_with(|lane| Value::U32(lane + 10)),
            EntryArg::InstanceId => invocation.lane_arg_with(Value::U32),
            _ => invocation.uniform_arg(Value::U32(0)),
        };
    }
    let func = &module.entry_points[0].function;
    let exec =
        wavefront_interp::run(&module.types, func, &invocation, &mut MemoryHost::new()).unwrap();
    assert_eq!(exec.lane(vertex, 4).unwrap().as_i64(), Some(14));
    assert_eq!(exec.lane(instance, 4).unwrap().as_i64(), Some(104));
}
