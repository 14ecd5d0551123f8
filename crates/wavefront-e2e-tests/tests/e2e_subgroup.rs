//! Clustered scans and reductions on every target, fed from a patched
//! entry argument.

mod common;

use common::{Pipeline, compute_input, keep, targets};
use wavefront_builder::GroupArithOp;
use wavefront_interp::Value;
use wavefront_ir::{Expression, Handle, Scalar};

const OPS: [GroupArithOp; 5] = [
    GroupArithOp::IAdd,
    GroupArithOp::UMin,
    GroupArithOp::UMax,
    GroupArithOp::Xor,
    GroupArithOp::FAdd,
];

fn input(lane: u32) -> u32 {
    (lane * 7 + 3) % 11 + 1
}

fn identity(op: GroupArithOp) -> Value {
    match op {
        GroupArithOp::UMin => Value::U32(u32::MAX),
        GroupArithOp::FAdd => Value::F32(0.0),
        _ => Value::U32(0),
    }
}

fn combine(op: GroupArithOp, acc: &Value, lane: u32) -> Value {
    let x = input(lane);
    match (op, acc) {
        (GroupArithOp::FAdd, Value::F32(a)) => Value::F32(a + x as f32),
        (GroupArithOp::IAdd, Value::U32(a)) => Value::U32(a + x),
        (GroupArithOp::UMin, Value::U32(a)) => Value::U32((*a).min(x)),
        (GroupArithOp::UMax, Value::U32(a)) => Value::U32((*a).max(x)),
        (GroupArithOp::Xor, Value::U32(a)) => Value::U32(a ^ x),
        other => panic!("unexpected {other:?}"),
    }
}

struct Cluster {
    size: u32,
    reduce: Handle<Expression>,
    inclusive: Handle<Expression>,
    exclusive: Handle<Expression>,
}

fn build(p: &mut Pipeline, op: GroupArithOp) -> Vec<Cluster> {
    let wave = p.wave_size();
    p.build(|b| {
        let mut value = compute_input(b);
        if op == GroupArithOp::FAdd {
            value = b.convert(value, Scalar::F32);
        }
        [1, 2, 4, 8, 16, 32, 64]
            .into_iter()
            .filter(|&size| size <= wave)
            .map(|size| {
                let cluster = Cluster {
                    size,
                    reduce: b.create_subgroup_clustered_reduction(op, value, size).unwrap(),
                    inclusive: b.create_subgroup_clustered_inclusive(op, value, size).unwrap(),
                    exclusive: b.create_subgroup_clustered_exclusive(op, value, size).unwrap(),
                };
                keep(b, cluster.reduce);
                keep(b, cluster.inclusive);
                keep(b, cluster.exclusive);
                cluster
            })
            .collect()
    })
}

fn fold(op: GroupArithOp, lanes: impl Iterator<Item = u32>) -> Value {
    lanes.fold(identity(op), |acc, l| combine(op, &acc, l))
}

/// Compares every active lane of every cluster against a sequential fold
/// over the active lanes of its cluster.
fn check(target_name: &str, p: &mut Pipeline, op: GroupArithOp, exec: u64) {
    let clusters = build(p, op);
    p.patch();
    let result = p.run_compute(exec, input);
    let wave = p.wave_size();
    let active = |lane: &u32| exec & (1u64 << lane) != 0;

    for cluster in &clusters {
        for lane in (0..wave).filter(active) {
            let first = lane - lane % cluster.size;
            let what = format!("{target_name} {op:?} cluster {} lane {lane}", cluster.size);
            let expected = [
                ("reduce", cluster.reduce, fold(op, (first..first + cluster.size).filter(active))),
                ("inclusive", cluster.inclusive, fold(op, (first..=lane).filter(active))),
                ("exclusive", cluster.exclusive, fold(op, (first..lane).filter(active))),
            ];
            for (kind, handle, want) in expected {
                let got = result.lane(handle, lane).unwrap();
                assert!(got.bit_eq(&want), "{what}: {kind} {got:?}, expected {want:?}");
            }
        }
    }
}

#[test]
fn full_wave_scans_on_every_target() {
    for (name, target) in targets() {
        for op in OPS {
            let mut p = Pipeline::compute(target.clone());
            let exec = p.all_lanes();
            check(name, &mut p, op, exec);
        }
    }
}

#[test]
fn inactive_lanes_do_not_contribute() {
    for (name, target) in targets() {
        for mask in [0x5F5F_5F5F_0F0F_F0F7, 0x8000_0001_7FFF_FFFE] {
            for op in OPS {
                let mut p = Pipeline::compute(target.clone());
                let exec = p.all_lanes() & mask;
                check(name, &mut p, op, exec);
            }
        }
    }
}
