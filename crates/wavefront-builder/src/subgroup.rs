//! Subgroup collectives.
//!
//! Every collective is lowered onto the cross-lane primitives the target
//! offers. DPP moves are preferred inside a row of 16 lanes, permlane or
//! row broadcasts cross rows, `ds_swizzle` covers targets without DPP and
//! `ds_bpermute` or a readlane loop handles arbitrary shuffles. Which one
//! is used depends only on the [`TargetInfo`] capability flags, never on
//! runtime values.
//!
//! Reductions and scans run with inactive lanes set to the operator's
//! identity, so lanes outside the execution mask never contribute.
//!
//! [`TargetInfo`]: wavefront_state::TargetInfo

use wavefront_ir::{BinaryOp, Expression, Handle, LaneOp, Literal, MathFunction, Scalar, ScalarKind};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

/// A DPP control word selecting which lane each lane reads.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct DppCtrl(pub u32);

impl DppCtrl {
    pub const QUAD_PERM_0000: Self = Self(0x000);
    pub const QUAD_PERM_1111: Self = Self(0x055);
    pub const QUAD_PERM_2222: Self = Self(0x0AA);
    pub const QUAD_PERM_3333: Self = Self(0x0FF);
    pub const QUAD_PERM_1032: Self = Self(0x0B1);
    pub const QUAD_PERM_2301: Self = Self(0x04E);
    pub const QUAD_PERM_0123: Self = Self(0x01B);
    pub const ROW_SR1: Self = Self(0x111);
    pub const ROW_SR2: Self = Self(0x112);
    pub const ROW_SR3: Self = Self(0x113);
    pub const ROW_SR4: Self = Self(0x114);
    pub const ROW_SR8: Self = Self(0x118);
    pub const WF_SL1: Self = Self(0x130);
    pub const WF_SR1: Self = Self(0x138);
    pub const ROW_MIRROR: Self = Self(0x140);
    pub const ROW_HALF_MIRROR: Self = Self(0x141);
    pub const ROW_BCAST15: Self = Self(0x142);
    pub const ROW_BCAST31: Self = Self(0x143);

    /// Quad permute: position `i` of every quad reads quad lane `lanes[i]`.
    pub const fn quad_perm(lanes: [u32; 4]) -> Self {
        Self((lanes[0] & 3) | (lanes[1] & 3) << 2 | (lanes[2] & 3) << 4 | (lanes[3] & 3) << 6)
    }

    /// Shift right by `n` (1 to 15) lanes within a row.
    pub const fn row_shr(n: u32) -> Self {
        Self(0x110 | (n & 0xF))
    }
}

/// Operator of a group reduction or scan.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum GroupArithOp {
    IAdd,
    IMul,
    SMin,
    SMax,
    UMin,
    UMax,
    FAdd,
    FMul,
    FMin,
    FMax,
    And,
    Or,
    Xor,
}

impl GroupArithOp {
    pub const ALL: [Self; 13] = [
        Self::IAdd,
        Self::IMul,
        Self::SMin,
        Self::SMax,
        Self::UMin,
        Self::UMax,
        Self::FAdd,
        Self::FMul,
        Self::FMin,
        Self::FMax,
        Self::And,
        Self::Or,
        Self::Xor,
    ];

    pub fn is_float(self) -> bool {
        matches!(self, Self::FAdd | Self::FMul | Self::FMin | Self::FMax)
    }
}

/// Lanes `l` with `l % cluster >= min_index`.
fn cluster_lane_mask(cluster: u32, min_index: u32) -> u64 {
    (0..64u32)
        .filter(|lane| lane % cluster >= min_index)
        .fold(0, |mask, lane| mask | 1 << lane)
}

// Capabilities.
impl Builder<'_> {
    pub fn supports_dpp(&self) -> bool {
        self.state().target.dpp
    }

    /// `ds_bpermute` reaches every lane of this stage's wave.
    pub fn supports_bpermute(&self) -> bool {
        self.state().target.bpermute_spans_wave(self.stage())
    }

    pub fn supports_permlane_dpp(&self) -> bool {
        self.state().target.permlane
    }

    fn supports_row_broadcast(&self) -> bool {
        self.supports_dpp() && self.state().target.dpp_row_broadcast
    }

    /// Literal value of `value` if it is an integer constant.
    pub(crate) fn const_u32_of(&self, value: Value) -> Option<u32> {
        match self.function().expressions[value] {
            Expression::Literal(Literal::U32(v)) => Some(v),
            Expression::Literal(Literal::I32(v)) => u32::try_from(v).ok(),
            _ => None,
        }
    }
}

// Collectives.
impl Builder<'_> {
    pub fn get_subgroup_size(&mut self) -> Value {
        let size = self.wave_size();
        self.const_u32(size)
    }

    /// True in the first active lane only.
    pub fn create_subgroup_elect(&mut self) -> Result<Value, BuildError> {
        let yes = self.const_bool(true);
        let active = self.create_group_ballot(yes)?;
        let below = self.create_subgroup_mbcnt(active)?;
        let zero = self.const_u32(0);
        Ok(self.binary(BinaryOp::Equal, below, zero))
    }

    pub fn create_subgroup_all(&mut self, value: Value, wqm: bool) -> Result<Value, BuildError> {
        let ballot = self.create_group_ballot(value)?;
        let yes = self.const_bool(true);
        let active = self.create_group_ballot(yes)?;
        let all = self.binary(BinaryOp::Equal, ballot, active);
        Ok(if wqm { self.create_wqm(all) } else { all })
    }

    pub fn create_subgroup_any(&mut self, value: Value, wqm: bool) -> Result<Value, BuildError> {
        let ballot = self.create_group_ballot(value)?;
        let zero = self.const_u64(0);
        let any = self.binary(BinaryOp::NotEqual, ballot, zero);
        Ok(if wqm { self.create_wqm(any) } else { any })
    }

    /// True when every active lane holds the same value. Float components
    /// compare as floats, so a NaN is never equal.
    pub fn create_subgroup_all_equal(
        &mut self,
        value: Value,
        wqm: bool,
    ) -> Result<Value, BuildError> {
        self.expect_scalar_or_vector("subgroup all equal", value)?;
        let first = self.create_subgroup_broadcast_first(value)?;
        let eq = self.binary(BinaryOp::Equal, value, first);
        let parts = self.components(eq);
        let same = self.all_of(parts);
        self.create_subgroup_all(same, wqm)
    }

    /// `value` of lane `index`, which must be uniform.
    pub fn create_subgroup_broadcast(
        &mut self,
        value: Value,
        index: Value,
    ) -> Result<Value, BuildError> {
        let index = self.convert(index, Scalar::U32);
        self.map_to_int32(value, |b, v| {
            let ty = b.type_of(v);
            Ok(b.lane(LaneOp::ReadLane, vec![v, index], ty))
        })
    }

    pub fn create_subgroup_broadcast_first(&mut self, value: Value) -> Result<Value, BuildError> {
        self.map_to_int32(value, |b, v| {
            let ty = b.type_of(v);
            Ok(b.lane(LaneOp::ReadFirstLane, vec![v], ty))
        })
    }

    /// `uvec4` mask of the active lanes where `value` is true.
    pub fn create_subgroup_ballot(&mut self, value: Value) -> Result<Value, BuildError> {
        let mask = self.create_group_ballot(value)?;
        Ok(self.mask_to_uvec4(mask))
    }

    /// Bit of the current lane in a `uvec4` ballot.
    pub fn create_subgroup_inverse_ballot(&mut self, value: Value) -> Result<Value, BuildError> {
        let lane = self.lane_id()?;
        self.create_subgroup_ballot_bit_extract(value, lane)
    }

    pub fn create_subgroup_ballot_bit_extract(
        &mut self,
        value: Value,
        index: Value,
    ) -> Result<Value, BuildError> {
        let mask = self.uvec4_to_mask(value);
        let index = self.convert(index, Scalar::U64);
        let shifted = self.binary(BinaryOp::ShiftRight, mask, index);
        let one = self.const_u64(1);
        let bit = self.binary(BinaryOp::BitwiseAnd, shifted, one);
        let zero = self.const_u64(0);
        Ok(self.binary(BinaryOp::NotEqual, bit, zero))
    }

    pub fn create_subgroup_ballot_bit_count(&mut self, value: Value) -> Result<Value, BuildError> {
        let mask = self.uvec4_to_mask(value);
        let count = self.math1(MathFunction::CountOneBits, mask);
        Ok(self.convert(count, Scalar::U32))
    }

    /// Set bits at or below the current lane.
    pub fn create_subgroup_ballot_inclusive_bit_count(
        &mut self,
        value: Value,
    ) -> Result<Value, BuildError> {
        let below = self.create_subgroup_ballot_exclusive_bit_count(value)?;
        let own = self.create_subgroup_inverse_ballot(value)?;
        let one = self.const_u32(1);
        let zero = self.const_u32(0);
        let own = self.select(own, one, zero);
        Ok(self.add(below, own))
    }

    /// Set bits below the current lane.
    pub fn create_subgroup_ballot_exclusive_bit_count(
        &mut self,
        value: Value,
    ) -> Result<Value, BuildError> {
        let mask = self.uvec4_to_mask(value);
        self.create_subgroup_mbcnt(mask)
    }

    pub fn create_subgroup_ballot_find_lsb(&mut self, value: Value) -> Result<Value, BuildError> {
        let mask = self.uvec4_to_mask(value);
        let lsb = self.math1(MathFunction::FindLsb, mask);
        Ok(self.bitcast_kind(lsb, ScalarKind::Uint))
    }

    pub fn create_subgroup_ballot_find_msb(&mut self, value: Value) -> Result<Value, BuildError> {
        let mask = self.uvec4_to_mask(value);
        let msb = self.math1(MathFunction::FindMsb, mask);
        Ok(self.bitcast_kind(msb, ScalarKind::Uint))
    }

    /// `value` of lane `index`, which may differ per lane.
    pub fn create_subgroup_shuffle(
        &mut self,
        value: Value,
        index: Value,
    ) -> Result<Value, BuildError> {
        let index = self.convert(index, Scalar::U32);
        if self.supports_bpermute() {
            let four = self.const_u32(4);
            let address = self.mul(index, four);
            return self.map_to_int32(value, |b, v| {
                let ty = b.type_of(v);
                Ok(b.lane(LaneOp::DsBPermute, vec![address, v], ty))
            });
        }
        // One readlane per distinct index.
        let ty = self.type_of(value);
        let read = self.lane(LaneOp::ReadLane, vec![value, index], ty);
        self.create_waterfall_loop(read, &[1])
    }

    pub fn create_subgroup_shuffle_xor(
        &mut self,
        value: Value,
        mask: Value,
    ) -> Result<Value, BuildError> {
        if let Some(m) = self.const_u32_of(mask) {
            if m < 4 && self.supports_dpp() {
                let ctrl = DppCtrl::quad_perm([m, 1 ^ m, 2 ^ m, 3 ^ m]);
                return self.create_dpp_mov(value, ctrl, 0xF, 0xF, true);
            }
            if m < 32 {
                let pattern = Self::ds_swizzle_bit_mode(m, 0, 0x1F);
                return self.create_ds_swizzle(value, pattern);
            }
        }
        let lane = self.lane_id()?;
        let mask = self.convert(mask, Scalar::U32);
        let index = self.binary(BinaryOp::BitwiseXor, lane, mask);
        self.create_subgroup_shuffle(value, index)
    }

    pub fn create_subgroup_shuffle_up(
        &mut self,
        value: Value,
        delta: Value,
    ) -> Result<Value, BuildError> {
        let lane = self.lane_id()?;
        let delta = self.convert(delta, Scalar::U32);
        let index = self.sub(lane, delta);
        self.create_subgroup_shuffle(value, index)
    }

    pub fn create_subgroup_shuffle_down(
        &mut self,
        value: Value,
        delta: Value,
    ) -> Result<Value, BuildError> {
        let lane = self.lane_id()?;
        let delta = self.convert(delta, Scalar::U32);
        let index = self.add(lane, delta);
        self.create_subgroup_shuffle(value, index)
    }

    /// Combines `value` over each cluster of `cluster_size` lanes; every
    /// lane of the cluster gets the result.
    pub fn create_subgroup_clustered_reduction(
        &mut self,
        op: GroupArithOp,
        value: Value,
        cluster_size: u32,
    ) -> Result<Value, BuildError> {
        let cluster = self.cluster_size(cluster_size);
        let identity = self.create_group_arithmetic_identity(op, value);
        let mut result = self.create_set_inactive(value, identity)?;
        let mut step = 1;
        while step < cluster {
            let other = self.exchange_across(result, step)?;
            result = self.create_group_arithmetic_operation(op, result, other);
            step *= 2;
        }
        Ok(self.create_wwm(result))
    }

    /// Running combination of `value` over the lanes of each cluster up to
    /// and including the current one.
    pub fn create_subgroup_clustered_inclusive(
        &mut self,
        op: GroupArithOp,
        value: Value,
        cluster_size: u32,
    ) -> Result<Value, BuildError> {
        let cluster = self.cluster_size(cluster_size);
        let identity = self.create_group_arithmetic_identity(op, value);
        let start = self.create_set_inactive(value, identity)?;
        let result = self.clustered_scan(op, start, identity, cluster, true)?;
        Ok(self.create_wwm(result))
    }

    /// Running combination over the lanes of each cluster strictly before
    /// the current one; the first lane of a cluster gets the identity.
    pub fn create_subgroup_clustered_exclusive(
        &mut self,
        op: GroupArithOp,
        value: Value,
        cluster_size: u32,
    ) -> Result<Value, BuildError> {
        let cluster = self.cluster_size(cluster_size);
        let identity = self.create_group_arithmetic_identity(op, value);
        let start = self.create_set_inactive(value, identity)?;
        let result = self.clustered_scan(op, start, identity, cluster, false)?;
        Ok(self.create_wwm(result))
    }

    /// Inclusive or exclusive scan of `value` over each cluster, with
    /// inactive lanes already holding `identity`.
    fn clustered_scan(
        &mut self,
        op: GroupArithOp,
        value: Value,
        identity: Value,
        cluster: u32,
        inclusive: bool,
    ) -> Result<Value, BuildError> {
        let dpp = self.supports_dpp();
        log::debug!(
            "{} {:?} scan over clusters of {cluster} using {}",
            if inclusive { "inclusive" } else { "exclusive" },
            op,
            if dpp { "dpp row shifts" } else { "swizzle butterflies" }
        );
        if !dpp {
            return self.butterfly_scan(op, value, identity, cluster, inclusive);
        }
        let thread_mask = self.create_thread_mask()?;
        let value = if inclusive {
            value
        } else {
            let shifted = self.shift_right_one(value, identity)?;
            self.create_thread_masked_select(
                thread_mask,
                cluster_lane_mask(cluster, 1),
                shifted,
                identity,
            )
        };
        self.dpp_inclusive_scan(op, value, identity, cluster, thread_mask)
    }

    /// `value` of lane `index` (0 to 3) of the current quad.
    pub fn create_subgroup_quad_broadcast(
        &mut self,
        value: Value,
        index: Value,
    ) -> Result<Value, BuildError> {
        if let Some(i) = self.const_u32_of(index) {
            return self.create_subgroup_swizzle_quad(value, [i; 4]);
        }
        let lane = self.lane_id()?;
        let quad_mask = self.const_u32(!3);
        let quad = self.binary(BinaryOp::BitwiseAnd, lane, quad_mask);
        let index = self.convert(index, Scalar::U32);
        let source = self.add(quad, index);
        self.create_subgroup_shuffle(value, source)
    }

    pub fn create_subgroup_quad_swap_horizontal(
        &mut self,
        value: Value,
    ) -> Result<Value, BuildError> {
        self.create_subgroup_swizzle_quad(value, [1, 0, 3, 2])
    }

    pub fn create_subgroup_quad_swap_vertical(
        &mut self,
        value: Value,
    ) -> Result<Value, BuildError> {
        self.create_subgroup_swizzle_quad(value, [2, 3, 0, 1])
    }

    pub fn create_subgroup_quad_swap_diagonal(
        &mut self,
        value: Value,
    ) -> Result<Value, BuildError> {
        self.create_subgroup_swizzle_quad(value, [3, 2, 1, 0])
    }

    /// Position `i` of every quad reads quad lane `lanes[i]`.
    pub fn create_subgroup_swizzle_quad(
        &mut self,
        value: Value,
        lanes: [u32; 4],
    ) -> Result<Value, BuildError> {
        if self.supports_dpp() {
            let ctrl = DppCtrl::quad_perm(lanes);
            return self.create_dpp_mov(value, ctrl, 0xF, 0xF, true);
        }
        let pattern = Self::ds_swizzle_quad_mode(lanes[0], lanes[1], lanes[2], lanes[3]);
        self.create_ds_swizzle(value, pattern)
    }

    /// Within each group of 32 lanes, lane `j` reads lane
    /// `((j & and_mask) | or_mask) ^ xor_mask`.
    pub fn create_subgroup_swizzle_mask(
        &mut self,
        value: Value,
        and_mask: u32,
        or_mask: u32,
        xor_mask: u32,
    ) -> Result<Value, BuildError> {
        let pattern = Self::ds_swizzle_bit_mode(xor_mask, or_mask, and_mask);
        self.create_ds_swizzle(value, pattern)
    }

    /// `input` with lane `index` replaced by `write`.
    pub fn create_subgroup_write_invocation(
        &mut self,
        input: Value,
        write: Value,
        index: Value,
    ) -> Result<Value, BuildError> {
        let index = self.convert(index, Scalar::U32);
        self.map_to_int32_n(&[input, write], |b, pieces| {
            let ty = b.type_of(pieces[0]);
            Ok(b.lane(LaneOp::WriteLane, vec![pieces[1], index, pieces[0]], ty))
        })
    }

    /// Number of bits of the 64-bit `mask` set below the current lane.
    pub fn create_subgroup_mbcnt(&mut self, mask: Value) -> Result<Value, BuildError> {
        if self.scalar_of(mask) != Scalar::U64 || self.inner_of(mask).is_vector() {
            let found = self.inner_of(mask);
            return Err(self.unexpected("subgroup mbcnt", "u64", &found));
        }
        let u32_ty = self.scalar_type(Scalar::U32);
        let u32x2 = self.vector_type(Scalar::U32, 2);
        let halves = self.bitcast(mask, u32x2);
        let lo = self.extract(halves, 0);
        let zero = self.const_u32(0);
        let count = self.lane(LaneOp::MbcntLo, vec![lo, zero], u32_ty);
        if self.wave_size() == 32 {
            return Ok(count);
        }
        let hi = self.extract(halves, 1);
        Ok(self.lane(LaneOp::MbcntHi, vec![hi, count], u32_ty))
    }
}

// Helpers.
impl Builder<'_> {
    /// Identity of `op` with the shape of `like`.
    pub fn create_group_arithmetic_identity(&mut self, op: GroupArithOp, like: Value) -> Value {
        let bits = self.scalar_of(like).bits();
        match op {
            GroupArithOp::IAdd | GroupArithOp::UMax | GroupArithOp::Or | GroupArithOp::Xor => {
                self.const_int_like(like, 0)
            }
            GroupArithOp::IMul => self.const_int_like(like, 1),
            GroupArithOp::SMin => self.const_int_like(like, i64::MAX >> (64 - bits)),
            GroupArithOp::SMax => self.const_int_like(like, i64::MIN >> (64 - bits)),
            GroupArithOp::UMin | GroupArithOp::And => self.const_int_like(like, -1),
            GroupArithOp::FAdd => self.const_float_like(like, 0.0),
            GroupArithOp::FMul => self.const_float_like(like, 1.0),
            GroupArithOp::FMin => self.const_float_like(like, f64::INFINITY),
            GroupArithOp::FMax => self.const_float_like(like, f64::NEG_INFINITY),
        }
    }

    pub fn create_group_arithmetic_operation(
        &mut self,
        op: GroupArithOp,
        x: Value,
        y: Value,
    ) -> Value {
        let with_sign = |b: &mut Self, kind: ScalarKind, fun: MathFunction| {
            let original = b.scalar_of(x).kind;
            let x = b.bitcast_kind(x, kind);
            let y = b.bitcast_kind(y, kind);
            let r = b.math2(fun, x, y);
            b.bitcast_kind(r, original)
        };
        match op {
            GroupArithOp::IAdd | GroupArithOp::FAdd => self.add(x, y),
            GroupArithOp::IMul | GroupArithOp::FMul => self.mul(x, y),
            GroupArithOp::SMin => with_sign(self, ScalarKind::Sint, MathFunction::Min),
            GroupArithOp::SMax => with_sign(self, ScalarKind::Sint, MathFunction::Max),
            GroupArithOp::UMin => with_sign(self, ScalarKind::Uint, MathFunction::Min),
            GroupArithOp::UMax => with_sign(self, ScalarKind::Uint, MathFunction::Max),
            GroupArithOp::FMin => self.math2(MathFunction::Min, x, y),
            GroupArithOp::FMax => self.math2(MathFunction::Max, x, y),
            GroupArithOp::And => self.binary(BinaryOp::BitwiseAnd, x, y),
            GroupArithOp::Or => self.binary(BinaryOp::BitwiseOr, x, y),
            GroupArithOp::Xor => self.binary(BinaryOp::BitwiseXor, x, y),
        }
    }

    /// 64-bit mask of the active lanes where the bool `value` is true.
    pub fn create_group_ballot(&mut self, value: Value) -> Result<Value, BuildError> {
        if self.inner_of(value) != wavefront_ir::TypeInner::Scalar(Scalar::BOOL) {
            let found = self.inner_of(value);
            return Err(self.unexpected("ballot", "bool", &found));
        }
        let u64_ty = self.scalar_type(Scalar::U64);
        Ok(self.lane(LaneOp::Ballot, vec![value], u64_ty))
    }

    /// `1 << lane` as a 64-bit mask.
    pub fn create_thread_mask(&mut self) -> Result<Value, BuildError> {
        let lane = self.lane_id()?;
        let lane = self.convert(lane, Scalar::U64);
        let one = self.const_u64(1);
        Ok(self.binary(BinaryOp::ShiftLeft, one, lane))
    }

    /// `if_set` in lanes whose bit is set in `and_mask`, else `if_clear`.
    pub fn create_thread_masked_select(
        &mut self,
        thread_mask: Value,
        and_mask: u64,
        if_set: Value,
        if_clear: Value,
    ) -> Value {
        let and_mask = self.const_u64(and_mask);
        let bit = self.binary(BinaryOp::BitwiseAnd, thread_mask, and_mask);
        let zero = self.const_u64(0);
        let set = self.binary(BinaryOp::NotEqual, bit, zero);
        self.select(set, if_set, if_clear)
    }

    pub fn create_dpp_mov(
        &mut self,
        value: Value,
        ctrl: DppCtrl,
        row_mask: u32,
        bank_mask: u32,
        bound_ctrl: bool,
    ) -> Result<Value, BuildError> {
        let op = LaneOp::DppMov {
            ctrl: ctrl.0,
            row_mask,
            bank_mask,
            bound_ctrl,
        };
        self.map_to_int32(value, |b, v| {
            let ty = b.type_of(v);
            Ok(b.lane(op, vec![v], ty))
        })
    }

    /// Like [`Builder::create_dpp_mov`], keeping `old` in lanes that are
    /// masked off or read outside the row.
    pub fn create_dpp_update(
        &mut self,
        old: Value,
        value: Value,
        ctrl: DppCtrl,
        row_mask: u32,
        bank_mask: u32,
        bound_ctrl: bool,
    ) -> Result<Value, BuildError> {
        let op = LaneOp::DppUpdate {
            ctrl: ctrl.0,
            row_mask,
            bank_mask,
            bound_ctrl,
        };
        self.map_to_int32_n(&[old, value], |b, pieces| {
            let ty = b.type_of(pieces[0]);
            Ok(b.lane(op, pieces.to_vec(), ty))
        })
    }

    /// Lane `i` of each row reads the lane of the same row selected by
    /// nibble `i` of `sel_hi:sel_lo`.
    pub fn create_permlane16(
        &mut self,
        old: Value,
        value: Value,
        sel_lo: u32,
        sel_hi: u32,
        fetch_inactive: bool,
        bound_ctrl: bool,
    ) -> Result<Value, BuildError> {
        let op = LaneOp::PermLane16 {
            fetch_inactive,
            bound_ctrl,
        };
        self.permlane(op, old, value, sel_lo, sel_hi)
    }

    /// Like [`Builder::create_permlane16`], reading from the paired row.
    pub fn create_permlanex16(
        &mut self,
        old: Value,
        value: Value,
        sel_lo: u32,
        sel_hi: u32,
        fetch_inactive: bool,
        bound_ctrl: bool,
    ) -> Result<Value, BuildError> {
        let op = LaneOp::PermLaneX16 {
            fetch_inactive,
            bound_ctrl,
        };
        self.permlane(op, old, value, sel_lo, sel_hi)
    }

    fn permlane(
        &mut self,
        op: LaneOp,
        old: Value,
        value: Value,
        sel_lo: u32,
        sel_hi: u32,
    ) -> Result<Value, BuildError> {
        debug_assert!(self.supports_permlane_dpp());
        let sel_lo = self.const_u32(sel_lo);
        let sel_hi = self.const_u32(sel_hi);
        self.map_to_int32_n(&[old, value], |b, pieces| {
            let ty = b.type_of(pieces[0]);
            Ok(b.lane(op, vec![pieces[0], pieces[1], sel_lo, sel_hi], ty))
        })
    }

    pub fn create_ds_swizzle(&mut self, value: Value, pattern: u32) -> Result<Value, BuildError> {
        self.map_to_int32(value, |b, v| {
            let ty = b.type_of(v);
            Ok(b.lane(LaneOp::DsSwizzle { pattern }, vec![v], ty))
        })
    }

    /// Ends a whole-wave section: lanes outside the execution mask took
    /// part in computing `value`.
    pub fn create_wwm(&mut self, value: Value) -> Value {
        let ty = self.type_of(value);
        self.lane(LaneOp::Wwm, vec![value], ty)
    }

    /// `active` in active lanes and `inactive` elsewhere.
    pub fn create_set_inactive(
        &mut self,
        active: Value,
        inactive: Value,
    ) -> Result<Value, BuildError> {
        self.map_to_int32_n(&[active, inactive], |b, pieces| {
            let ty = b.type_of(pieces[0]);
            Ok(b.lane(LaneOp::SetInactive, pieces.to_vec(), ty))
        })
    }

    /// Keeps the helper lanes of each quad computing `value`, as
    /// derivatives need.
    pub fn create_wqm(&mut self, value: Value) -> Value {
        let ty = self.type_of(value);
        self.lane(LaneOp::Wqm, vec![value], ty)
    }

    pub fn ds_swizzle_bit_mode(xor_mask: u32, or_mask: u32, and_mask: u32) -> u32 {
        (and_mask & 0x1F) | (or_mask & 0x1F) << 5 | (xor_mask & 0x1F) << 10
    }

    pub fn ds_swizzle_quad_mode(lane0: u32, lane1: u32, lane2: u32, lane3: u32) -> u32 {
        0x8000 | DppCtrl::quad_perm([lane0, lane1, lane2, lane3]).0
    }

    /// Index of the current lane.
    pub(crate) fn lane_id(&mut self) -> Result<Value, BuildError> {
        let all = self.const_u64(u64::MAX);
        self.create_subgroup_mbcnt(all)
    }

    /// `uvec4` ballot layout of a 64-bit mask.
    pub(crate) fn mask_to_uvec4(&mut self, mask: Value) -> Value {
        let u32x2 = self.vector_type(Scalar::U32, 2);
        let halves = self.bitcast(mask, u32x2);
        let lo = self.extract(halves, 0);
        let hi = self.extract(halves, 1);
        let zero = self.const_u32(0);
        self.vector_from(vec![lo, hi, zero, zero])
    }

    /// The lanes of a `uvec4` ballot that exist in this wave, as a 64-bit
    /// mask.
    fn uvec4_to_mask(&mut self, ballot: Value) -> Value {
        if self.wave_size() == 32 {
            let lo = self.extract(ballot, 0);
            return self.convert(lo, Scalar::U64);
        }
        let pair = self.swizzle(ballot, &[0, 1]);
        let u64_ty = self.scalar_type(Scalar::U64);
        self.bitcast(pair, u64_ty)
    }

    fn cluster_size(&self, cluster_size: u32) -> u32 {
        debug_assert!(
            cluster_size.is_power_of_two(),
            "cluster size {cluster_size} is not a power of two"
        );
        cluster_size.clamp(1, self.wave_size())
    }

    /// The partner of each lane in butterfly step `step`: lane
    /// `lane ^ step`, or any lane of the other half of the block once the
    /// smaller steps have made each half uniform.
    fn exchange_across(&mut self, value: Value, step: u32) -> Result<Value, BuildError> {
        let dpp = self.supports_dpp();
        match step {
            1 if dpp => self.create_dpp_mov(value, DppCtrl::QUAD_PERM_1032, 0xF, 0xF, true),
            2 if dpp => self.create_dpp_mov(value, DppCtrl::QUAD_PERM_2301, 0xF, 0xF, true),
            4 if dpp => self.create_dpp_mov(value, DppCtrl::ROW_HALF_MIRROR, 0xF, 0xF, true),
            8 if dpp => self.create_dpp_mov(value, DppCtrl::ROW_MIRROR, 0xF, 0xF, true),
            16 if self.supports_permlane_dpp() => {
                self.create_permlanex16(value, value, 0x7654_3210, 0xFEDC_BA98, false, false)
            }
            1..=16 => {
                let pattern = Self::ds_swizzle_bit_mode(step, 0, 0x1F);
                self.create_ds_swizzle(value, pattern)
            }
            _ => {
                let low_lane = self.const_u32(31);
                let low = self.create_subgroup_broadcast(value, low_lane)?;
                let high_lane = self.const_u32(63);
                let high = self.create_subgroup_broadcast(value, high_lane)?;
                let lane = self.lane_id()?;
                let half = self.const_u32(32);
                let in_high = self.binary(BinaryOp::GreaterEqual, lane, half);
                Ok(self.select(in_high, low, high))
            }
        }
    }

    /// Hillis-Steele scan over DPP: in step `d` each lane at least `d`
    /// lanes into its row adds the partial result of lane `lane - d`. The
    /// step of 16 adds the last lane of the previous row to the odd rows of
    /// each 32-lane half, and the step of 32 adds lane 31 to the upper half.
    fn dpp_inclusive_scan(
        &mut self,
        op: GroupArithOp,
        value: Value,
        identity: Value,
        cluster: u32,
        thread_mask: Value,
    ) -> Result<Value, BuildError> {
        let mut result = value;
        for step in [1, 2, 4, 8] {
            if step >= cluster {
                return Ok(result);
            }
            let ctrl = DppCtrl::row_shr(step);
            let shifted = self.create_dpp_update(identity, result, ctrl, 0xF, 0xF, false)?;
            let mask = cluster_lane_mask(cluster.min(16), step);
            let shifted = self.create_thread_masked_select(thread_mask, mask, shifted, identity);
            result = self.create_group_arithmetic_operation(op, result, shifted);
        }

        if cluster >= 32 {
            // permlanex16 swaps rows 0 and 1, and rows 2 and 3; only the
            // upper row of each pair may take the other's total.
            let previous_row = if self.supports_permlane_dpp() {
                self.create_permlanex16(result, result, u32::MAX, u32::MAX, false, false)?
            } else if self.supports_row_broadcast() {
                self.create_dpp_update(identity, result, DppCtrl::ROW_BCAST15, 0xA, 0xF, false)?
            } else {
                let pattern = Self::ds_swizzle_bit_mode(0, 15, 0);
                self.create_ds_swizzle(result, pattern)?
            };
            let mask = cluster_lane_mask(32, 16);
            let previous_row =
                self.create_thread_masked_select(thread_mask, mask, previous_row, identity);
            result = self.create_group_arithmetic_operation(op, result, previous_row);
        }

        if cluster >= 64 {
            let previous_half = if self.supports_row_broadcast() {
                self.create_dpp_update(identity, result, DppCtrl::ROW_BCAST31, 0xC, 0xF, false)?
            } else {
                let lane = self.const_u32(31);
                self.create_subgroup_broadcast(result, lane)?
            };
            let mask = cluster_lane_mask(64, 32);
            let previous_half =
                self.create_thread_masked_select(thread_mask, mask, previous_half, identity);
            result = self.create_group_arithmetic_operation(op, result, previous_half);
        }
        Ok(result)
    }

    /// Scan by xor butterfly, for targets without DPP. Step `d` swaps the
    /// running totals of neighbouring blocks of `d` lanes; lanes of the upper
    /// block also fold the lower block's total into their prefix. Every
    /// exchange is a `ds_swizzle` or a readlane, which read inactive lanes
    /// too, so lanes outside the execution mask still carry the identity.
    fn butterfly_scan(
        &mut self,
        op: GroupArithOp,
        value: Value,
        identity: Value,
        cluster: u32,
        inclusive: bool,
    ) -> Result<Value, BuildError> {
        let thread_mask = self.create_thread_mask()?;
        let mut total = value;
        let mut prefix = if inclusive { value } else { identity };
        let mut step = 1;
        while step < cluster.min(32) {
            let pattern = Self::ds_swizzle_bit_mode(step, 0, 0x1F);
            let other = self.create_ds_swizzle(total, pattern)?;
            let upper = cluster_lane_mask(2 * step, step);
            let folded = self.create_group_arithmetic_operation(op, prefix, other);
            prefix = self.create_thread_masked_select(thread_mask, upper, folded, prefix);
            total = self.create_group_arithmetic_operation(op, total, other);
            step *= 2;
        }
        if cluster >= 64 {
            let lane = self.const_u32(31);
            let lower_half = self.create_subgroup_broadcast(total, lane)?;
            let folded = self.create_group_arithmetic_operation(op, prefix, lower_half);
            let upper = cluster_lane_mask(64, 32);
            prefix = self.create_thread_masked_select(thread_mask, upper, folded, prefix);
        }
        Ok(prefix)
    }

    /// `value` of lane `lane - 1` across the whole wave; lane 0 gets
    /// `identity`. DPP targets only.
    fn shift_right_one(&mut self, value: Value, identity: Value) -> Result<Value, BuildError> {
        if self.supports_row_broadcast() {
            return self.create_dpp_update(identity, value, DppCtrl::WF_SR1, 0xF, 0xF, false);
        }
        // Row shifts stop at row boundaries; carry the last lane of each
        // row into the first lane of the next one.
        let mut shifted = self.create_dpp_update(identity, value, DppCtrl::ROW_SR1, 0xF, 0xF, false)?;
        for row in 1..self.wave_size() / 16 {
            let last = self.const_u32(row * 16 - 1);
            let carried = self.create_subgroup_broadcast(value, last)?;
            let first = self.const_u32(row * 16);
            shifted = self.create_subgroup_write_invocation(shifted, carried, first)?;
        }
        Ok(shifted)
    }
}
