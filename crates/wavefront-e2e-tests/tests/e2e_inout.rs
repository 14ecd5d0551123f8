//! A tessellation control shader reads back what it wrote.

mod common;

use common::{Pipeline, keep};
use wavefront_builder::InOutInfo;
use wavefront_interp::Value;
use wavefront_ir::{BuiltInKind, EntryArg, Scalar, ShaderStage};
use wavefront_state::TargetInfo;

#[test]
fn written_output_reads_back() {
    let mut p = Pipeline::new(TargetInfo::for_gfx_ip(10, 3), ShaderStage::TessControl);
    let (written, read) = p.build(|b| {
        let prim = b
            .create_read_builtin_input(BuiltInKind::PrimitiveId, InOutInfo::default(), None, None)
            .unwrap();
        let three = b.const_i32(3);
        let written = b.mul(prim, three);
        let offset = b.const_u32(0);
        let elem = b.const_u32(1);
        let vertex = b.const_u32(0);
        b.create_write_generic_output(written, 2, offset, elem, 1, InOutInfo::default(), Some(vertex))
            .unwrap();
        let ty = b.scalar_type(Scalar::I32);
        let read = b
            .create_read_generic_output(ty, 2, offset, elem, 1, InOutInfo::default(), Some(vertex))
            .unwrap();
        keep(b, written);
        keep(b, read);
        (written, read)
    });
    p.patch();

    let exec = p.run(u64::MAX, |arg, lane| match arg {
        EntryArg::PatchId => Some(Value::U32(lane + 5)),
        _ => None,
    });
    for lane in 0..p.wave_size() {
        let want = i64::from(lane + 5) * 3;
        assert_eq!(exec.lane(written, lane).and_then(Value::as_i64), Some(want), "lane {lane}");
        assert_eq!(exec.lane(read, lane).and_then(Value::as_i64), Some(want), "lane {lane}");
    }
    assert_eq!(p.host.outputs.get(&(2, 1, 7)).and_then(Value::as_i64), Some(36));
}

#[test]
fn dynamic_location_offset_selects_the_location() {
    let mut p = Pipeline::new(TargetInfo::for_gfx_ip(9, 0), ShaderStage::TessControl);
    let read = p.build(|b| {
        let value = b.const_u32(77);
        let zero = b.const_u32(0);
        let one = b.const_u32(1);
        let vertex = b.const_u32(0);
        b.create_write_generic_output(value, 4, one, zero, 2, InOutInfo::default(), Some(vertex))
            .unwrap();
        let ty = b.scalar_type(Scalar::U32);
        let read = b
            .create_read_generic_output(ty, 5, zero, zero, 1, InOutInfo::default(), Some(vertex))
            .unwrap();
        keep(b, read);
        read
    });
    p.patch();
    let exec = p.run(u64::MAX, |_, _| None);
    assert_eq!(exec.lane(read, 0).and_then(Value::as_u32), Some(77));
    assert_eq!(exec.lane(read, 63).and_then(Value::as_u32), Some(77));
}
