//! User data past the register budget goes through a single spill table
//! pointer, in every stage and at every budget.

mod common;

use common::{Pipeline, keep};
use wavefront_interp::{Pointer, Value};
use wavefront_ir::{EntryArg, Expression, Handle, Scalar, ShaderStage};
use wavefront_state::{ResourceNode, ResourceNodeType, TargetInfo};

const TABLE: u64 = 0x1000;
const SPILL: u64 = 0x4000;
/// Dwords of user data the nodes below occupy.
const USER_DATA_DWORDS: u32 = 7;

fn nodes() -> Vec<ResourceNode> {
    vec![
        ResourceNode::table(
            0,
            vec![ResourceNode::descriptor(ResourceNodeType::DescriptorBuffer, 0, 0, 0, 1)],
        ),
        ResourceNode::descriptor(ResourceNodeType::DescriptorBufferCompact, 1, 0, 1, 1),
        ResourceNode::root(ResourceNodeType::PushConst, 3, 4),
    ]
}

fn node_dwords(node: u32) -> Vec<u32> {
    match node {
        0 => vec![TABLE as u32],
        1 => vec![0xCAFE_0000, 0x0000_0042],
        _ => vec![40, 41, 42, 43],
    }
}

/// Reads every node so that none of them is dropped as unused. Returns the
/// table descriptor and push-constant dword 2.
fn build(p: &mut Pipeline) -> (Handle<Expression>, Handle<Expression>) {
    p.build(|b| {
        let zero = b.const_u32(0);
        let table = b.create_load_buffer_desc(0, 0, zero, false, false).unwrap();
        let root = b.create_load_buffer_desc(1, 0, zero, false, false).unwrap();
        let u32_ty = b.scalar_type(Scalar::U32);
        let push = b.create_load_push_constants_ptr(u32_ty);
        let eight = b.const_u32(8);
        let third = b.offset_pointer(push, eight, u32_ty);
        let constant = b.load(third);
        keep(b, table);
        keep(b, root);
        keep(b, constant);
        (table, constant)
    })
}

fn pipeline(stage: ShaderStage, budget: u32) -> Pipeline {
    let mut target = TargetInfo::for_gfx_ip(10, 3);
    target.max_user_data = budget;
    let mut p = Pipeline::new(target, stage);
    p.state.user_data_nodes = nodes();
    p
}

#[test]
fn one_spill_pointer_exactly_when_over_budget() {
    for stage in ShaderStage::ALL {
        for budget in 2..=12 {
            let mut p = pipeline(stage, budget);
            build(&mut p);
            p.patch();

            let data = p.state.interface_data(stage);
            let what = format!("{} with budget {budget}", stage.name());
            let spill_args = data
                .entry_args
                .iter()
                .filter(|info| info.arg == EntryArg::SpillTable)
                .count();
            let spills = USER_DATA_DWORDS > budget;
            assert_eq!(spill_args, usize::from(spills), "{what}");
            assert_eq!(data.spill_table.is_some(), spills, "{what}");
            assert!(data.user_data_regs <= budget, "{what}: {} registers", data.user_data_regs);
            if !spills {
                assert_eq!(data.user_data_regs, USER_DATA_DWORDS, "{what}");
            }
        }
    }
}

#[test]
fn spilled_user_data_is_read_from_memory() {
    for budget in 2..=12 {
        let mut p = pipeline(ShaderStage::Compute, budget);
        let (table, constant) = build(&mut p);
        p.patch();

        p.host.write_dwords(TABLE, &[7, 8, 9, 10]);
        let data = p.state.interface_data(ShaderStage::Compute).clone();
        if let Some(spill) = &data.spill_table {
            for &node in &spill.nodes {
                let offset = p.state.user_data_nodes[node as usize].offset_in_dwords;
                let at = SPILL + 4 * u64::from(offset - spill.threshold_in_dwords);
                p.host.write_dwords(at, &node_dwords(node));
            }
        }
        let exec = p.run(p.all_lanes(), |arg, _| match arg {
            EntryArg::UserDataNode { node: 0, .. } => {
                Some(Value::Pointer(Pointer::Memory { address: TABLE }))
            }
            EntryArg::UserDataNode { node, .. } => Some(Value::Composite(
                node_dwords(node).into_iter().map(Value::U32).collect(),
            )),
            EntryArg::SpillTable => Some(Value::Pointer(Pointer::Memory { address: SPILL })),
            _ => None,
        });

        for lane in [0, 31, 63] {
            assert_eq!(
                exec.lane(table, lane).unwrap().to_u32_vec(),
                vec![7, 8, 9, 10],
                "budget {budget}"
            );
            assert_eq!(exec.lane(constant, lane).and_then(Value::as_u32), Some(42), "budget {budget}");
        }
    }
}
