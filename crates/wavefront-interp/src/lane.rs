//! Cross-lane primitives.
//!
//! These read every lane of their operands, whether or not the lane is
//! active; only readfirstlane, ballot and set_inactive look at the
//! execution mask.

use wavefront_ir::LaneOp;

use crate::error::InterpError;
use crate::value::Value;

/// Source lane a DPP control selects for `lane`, or `None` when it falls
/// outside the row or wave.
pub fn dpp_source(ctrl: u32, lane: u32, wave: u32) -> Option<u32> {
    let row_base = lane & !15;
    let i = lane & 15;
    match ctrl {
        0x000..=0x0FF => Some((lane & !3) | ((ctrl >> (2 * (lane & 3))) & 3)),
        0x101..=0x10F => {
            let src = i + (ctrl & 0xF);
            (src < 16).then_some(row_base + src)
        }
        0x111..=0x11F => i.checked_sub(ctrl & 0xF).map(|src| row_base + src),
        0x121..=0x12F => Some(row_base + ((i + 16 - (ctrl & 0xF)) & 15)),
        0x130 => (lane + 1 < wave).then_some(lane + 1),
        0x134 => Some((lane + 1) % wave),
        0x138 => lane.checked_sub(1),
        0x13C => Some((lane + wave - 1) % wave),
        0x140 => Some(row_base + (15 - i)),
        0x141 => Some(row_base + ((i & 8) | (7 - (i & 7)))),
        0x142 => (row_base >= 16).then(|| row_base - 1),
        0x143 => (row_base >= 32).then_some(31),
        _ => None,
    }
}

/// Source lane of a `ds_swizzle` pattern.
pub fn swizzle_source(pattern: u32, lane: u32) -> u32 {
    if pattern & 0x8000 != 0 {
        (lane & !3) | ((pattern >> (2 * (lane & 3))) & 3)
    } else {
        let and_mask = pattern & 0x1F;
        let or_mask = (pattern >> 5) & 0x1F;
        let xor_mask = (pattern >> 10) & 0x1F;
        let j = lane & 31;
        (lane & !31) | (((j & and_mask) | or_mask) ^ xor_mask)
    }
}

fn first_active(exec: u64) -> u32 {
    if exec == 0 { 0 } else { exec.trailing_zeros() }
}

fn uniform_u32(values: &[Value], exec: u64, what: &'static str) -> Result<u32, InterpError> {
    values[first_active(exec) as usize]
        .as_u32()
        .ok_or_else(|| InterpError::TypeMismatch {
            op: what,
            detail: "expected an integer operand".into(),
        })
}

fn zero_like(value: &Value) -> Value {
    match value {
        Value::Composite(items) => Value::Composite(items.iter().map(zero_like).collect()),
        Value::F16(_) => Value::F16(0.0),
        Value::F32(_) => Value::F32(0.0),
        Value::F64(_) => Value::F64(0.0),
        Value::Bool(_) => Value::Bool(false),
        other => other
            .scalar()
            .map_or(Value::U32(0), |s| Value::from_int(s, 0)),
    }
}

fn dpp(
    ctrl: u32,
    row_mask: u32,
    bank_mask: u32,
    bound_ctrl: bool,
    old: Option<&[Value]>,
    src: &[Value],
    wave: u32,
) -> Vec<Value> {
    (0..wave)
        .map(|lane| {
            let keep = || match old {
                Some(old) => old[lane as usize].clone(),
                None => zero_like(&src[lane as usize]),
            };
            let row = lane / 16;
            let bank = (lane % 16) / 4;
            if row_mask & (1 << row) == 0 || bank_mask & (1 << bank) == 0 {
                return keep();
            }
            match dpp_source(ctrl, lane, wave) {
                Some(s) if s < wave => src[s as usize].clone(),
                _ if bound_ctrl => zero_like(&src[lane as usize]),
                _ => keep(),
            }
        })
        .collect()
}

/// Evaluates a lane operation over all lanes of a wave.
pub(crate) fn eval(
    op: LaneOp,
    args: &[Vec<Value>],
    exec: u64,
    wave: u32,
) -> Result<Vec<Value>, InterpError> {
    let arg = |i: usize| -> Result<&[Value], InterpError> {
        args.get(i)
            .map(Vec::as_slice)
            .ok_or_else(|| InterpError::TypeMismatch {
                op: "lane",
                detail: format!("{op:?} is missing operand {i}"),
            })
    };
    let lanes = 0..wave;
    Ok(match op {
        LaneOp::ReadFirstLane => {
            let v = arg(0)?[first_active(exec) as usize].clone();
            vec![v; wave as usize]
        }
        LaneOp::ReadLane => {
            let index = uniform_u32(arg(1)?, exec, "readlane")? % wave;
            vec![arg(0)?[index as usize].clone(); wave as usize]
        }
        LaneOp::WriteLane => {
            let index = uniform_u32(arg(1)?, exec, "writelane")? % wave;
            let value = arg(0)?[first_active(exec) as usize].clone();
            let mut out = arg(2)?.to_vec();
            out[index as usize] = value;
            out
        }
        LaneOp::Ballot => {
            let cond = arg(0)?;
            let mut mask = 0u64;
            for lane in lanes {
                if exec & (1 << lane) != 0 && cond[lane as usize].as_bool() == Some(true) {
                    mask |= 1 << lane;
                }
            }
            vec![Value::U64(mask); wave as usize]
        }
        LaneOp::MbcntLo | LaneOp::MbcntHi => {
            let (mask, acc) = (arg(0)?, arg(1)?);
            lanes
                .map(|lane| {
                    let m = mask[lane as usize].as_u32().unwrap_or(0);
                    let a = acc[lane as usize].as_u32().unwrap_or(0);
                    let below = match op {
                        LaneOp::MbcntLo if lane >= 32 => m,
                        LaneOp::MbcntLo => m & ((1u32 << lane) - 1),
                        _ if lane < 32 => 0,
                        _ => m & ((1u32 << (lane - 32)) - 1),
                    };
                    Value::U32(below.count_ones() + a)
                })
                .collect()
        }
        LaneOp::DppMov {
            ctrl,
            row_mask,
            bank_mask,
            bound_ctrl,
        } => dpp(ctrl, row_mask, bank_mask, bound_ctrl, None, arg(0)?, wave),
        LaneOp::DppUpdate {
            ctrl,
            row_mask,
            bank_mask,
            bound_ctrl,
        } => dpp(
            ctrl,
            row_mask,
            bank_mask,
            bound_ctrl,
            Some(arg(0)?),
            arg(1)?,
            wave,
        ),
        LaneOp::PermLane16 { .. } | LaneOp::PermLaneX16 { .. } => {
            let src = arg(1)?;
            let sel_lo = uniform_u32(arg(2)?, exec, "permlane")?;
            let sel_hi = uniform_u32(arg(3)?, exec, "permlane")?;
            let cross = matches!(op, LaneOp::PermLaneX16 { .. });
            lanes
                .map(|lane| {
                    let i = lane & 15;
                    let sel = if i < 8 {
                        (sel_lo >> (4 * i)) & 0xF
                    } else {
                        (sel_hi >> (4 * (i - 8))) & 0xF
                    };
                    let row = if cross { (lane / 16) ^ 1 } else { lane / 16 };
                    let source = (row * 16 + sel).min(wave - 1);
                    src[source as usize].clone()
                })
                .collect()
        }
        LaneOp::DsSwizzle { pattern } => {
            let src = arg(0)?;
            lanes
                .map(|lane| src[(swizzle_source(pattern, lane) % wave) as usize].clone())
                .collect()
        }
        LaneOp::DsBPermute => {
            let (addr, src) = (arg(0)?, arg(1)?);
            lanes
                .map(|lane| {
                    let a = addr[lane as usize].as_u32().unwrap_or(0);
                    src[((a / 4) % wave) as usize].clone()
                })
                .collect()
        }
        LaneOp::SetInactive => {
            let (active, inactive) = (arg(0)?, arg(1)?);
            lanes
                .map(|lane| {
                    if exec & (1 << lane) != 0 {
                        active[lane as usize].clone()
                    } else {
                        inactive[lane as usize].clone()
                    }
                })
                .collect()
        }
        LaneOp::Wwm | LaneOp::Wqm => arg(0)?.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpp_row_shifts() {
        assert_eq!(dpp_source(0x111, 5, 64), Some(4));
        assert_eq!(dpp_source(0x111, 16, 64), None);
        assert_eq!(dpp_source(0x101, 15, 64), None);
        assert_eq!(dpp_source(0x121, 16, 64), Some(31));
        assert_eq!(dpp_source(0x1B, 1, 64), Some(2));
        assert_eq!(dpp_source(0x142, 20, 64), Some(15));
        assert_eq!(dpp_source(0x143, 40, 64), Some(31));
        assert_eq!(dpp_source(0x143, 20, 64), None);
    }

    #[test]
    fn swizzle_modes() {
        // xor 1 in bit mode swaps neighbours.
        assert_eq!(swizzle_source(0x1F | (1 << 10), 6), 7);
        // quad mode broadcast of lane 2.
        assert_eq!(swizzle_source(0x8000 | 0xAA, 5), 6);
    }

    #[test]
    fn dpp_bound_ctrl_writes_zero() {
        let src: Vec<Value> = (0..16).map(Value::U32).collect();
        let out = eval(
            LaneOp::DppMov {
                ctrl: 0x111,
                row_mask: 0xF,
                bank_mask: 0xF,
                bound_ctrl: true,
            },
            &[src],
            u64::MAX,
            16,
        )
        .unwrap();
        assert_eq!(out[0], Value::U32(0));
        assert_eq!(out[3], Value::U32(2));
    }

    #[test]
    fn ballot_honours_exec() {
        let cond = vec![Value::Bool(true); 4];
        let out = eval(LaneOp::Ballot, &[cond], 0b1010, 4).unwrap();
        assert_eq!(out[0], Value::U64(0b1010));
    }
}
