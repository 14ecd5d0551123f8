//! Display implementations and text dump for debugging.

use std::fmt;
use std::fmt::Write as _;

use crate::Module;
use crate::arena::{Handle, UniqueArena};
use crate::binding::{Binding, BuiltInKind, EntryArg, ShaderStage};
use crate::call::Callee;
use crate::expr::{BinaryOp, Expression, LaneOp, Literal, MathFunction, UnaryOp};
use crate::func::Function;
use crate::stmt::Statement;
use crate::types::{AddressSpace, Scalar, ScalarKind, Type, TypeInner, VectorSize};

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Sint => write!(f, "sint"),
            Self::Uint => write!(f, "uint"),
            Self::Float => write!(f, "float"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.bits()),
            ScalarKind::Uint => write!(f, "u{}", self.bits()),
            ScalarKind::Float => write!(f, "f{}", self.bits()),
        }
    }
}

impl fmt::Display for VectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Constant => write!(f, "constant"),
            Self::Global => write!(f, "global"),
            Self::Arguments => write!(f, "arguments"),
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for BuiltInKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for EntryArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserDataNode { node, dwords } => write!(f, "userdata.node{node}x{dwords}"),
            Self::StreamOutOffset(i) => write!(f, "StreamOutOffset{i}"),
            Self::EsGsOffsets(i) => write!(f, "EsGsOffset{i}"),
            Self::FragCoord(i) => write!(f, "FragCoord{i}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(b) => write!(f, "@builtin({b})"),
            Self::UserData { node } => write!(f, "@userdata({node})"),
            Self::Entry(arg) => write!(f, "@entry({arg})"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}s"),
            Self::U16(v) => write!(f, "{v}us"),
            Self::I32(v) => write!(f, "{v}i"),
            Self::U32(v) => write!(f, "{v}u"),
            Self::I64(v) => write!(f, "{v}li"),
            Self::U64(v) => write!(f, "{v}lu"),
            Self::F16(bits) => write!(f, "{}h", half::f16::from_bits(*bits)),
            Self::F32(v) => write!(f, "{v}f"),
            Self::F64(v) => write!(f, "{v}lf"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negate => write!(f, "-"),
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Subtract => write!(f, "-"),
            Self::Multiply => write!(f, "*"),
            Self::Divide => write!(f, "/"),
            Self::Modulo => write!(f, "%"),
            Self::Equal => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
            Self::Less => write!(f, "<"),
            Self::LessEqual => write!(f, "<="),
            Self::Greater => write!(f, ">"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LogicalAnd => write!(f, "&&"),
            Self::LogicalOr => write!(f, "||"),
            Self::BitwiseAnd => write!(f, "&"),
            Self::BitwiseOr => write!(f, "|"),
            Self::BitwiseXor => write!(f, "^"),
            Self::ShiftLeft => write!(f, "<<"),
            Self::ShiftRight => write!(f, ">>"),
        }
    }
}

impl fmt::Display for MathFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Trunc => "trunc",
            Self::Round => "rint",
            Self::Fract => "fract",
            Self::Sqrt => "sqrt",
            Self::InverseSqrt => "rsq",
            Self::Reciprocal => "rcp",
            Self::Exp2 => "exp2",
            Self::Log2 => "log2",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Abs => "abs",
            Self::Fma => "fma",
            Self::Min => "min",
            Self::Max => "max",
            Self::Med3 => "med3",
            Self::CopySign => "copysign",
            Self::Ldexp => "ldexp",
            Self::FrexpMant => "frexp_mant",
            Self::FrexpExp => "frexp_exp",
            Self::CountOneBits => "bcnt",
            Self::ReverseBits => "brev",
            Self::FindLsb => "ffbl",
            Self::FindMsb => "ffbh_u",
            Self::FindSMsb => "ffbh_i",
            Self::ExtractBits => "bfe",
            Self::Class => "class",
            Self::Canonicalize => "canonicalize",
            Self::CubeId => "cubeid",
            Self::CubeSc => "cubesc",
            Self::CubeTc => "cubetc",
            Self::CubeMa => "cubema",
            Self::CvtPkRtz => "cvt_pkrtz",
        };
        f.write_str(name)
    }
}

impl fmt::Display for LaneOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFirstLane => write!(f, "readfirstlane"),
            Self::ReadLane => write!(f, "readlane"),
            Self::WriteLane => write!(f, "writelane"),
            Self::Ballot => write!(f, "ballot"),
            Self::MbcntLo => write!(f, "mbcnt_lo"),
            Self::MbcntHi => write!(f, "mbcnt_hi"),
            Self::DppMov {
                ctrl,
                row_mask,
                bank_mask,
                bound_ctrl,
            } => write!(
                f,
                "dpp_mov<{ctrl:#x}, row {row_mask:#x}, bank {bank_mask:#x}, bc {bound_ctrl}>"
            ),
            Self::DppUpdate {
                ctrl,
                row_mask,
                bank_mask,
                bound_ctrl,
            } => write!(
                f,
                "dpp_update<{ctrl:#x}, row {row_mask:#x}, bank {bank_mask:#x}, bc {bound_ctrl}>"
            ),
            Self::PermLane16 { .. } => write!(f, "permlane16"),
            Self::PermLaneX16 { .. } => write!(f, "permlanex16"),
            Self::DsSwizzle { pattern } => write!(f, "ds_swizzle<{pattern:#x}>"),
            Self::DsBPermute => write!(f, "ds_bpermute"),
            Self::SetInactive => write!(f, "set_inactive"),
            Self::Wwm => write!(f, "wwm"),
            Self::Wqm => write!(f, "wqm"),
        }
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Self::DescriptorTable { node } | Self::PushConstants { node } => {
                write!(f, "<node {node}>")
            }
            Self::RootDescriptor { node, dwords } => write!(f, "<node {node}, {dwords} dw>"),
            Self::ImageLoad { dim, flags, .. } | Self::ImageStore { dim, flags, .. } => {
                write!(f, "<{dim:?}, flags {:#x}>", flags.bits())
            }
            Self::ImageSample { dim, dmask, .. } | Self::ImageGather { dim, dmask, .. } => {
                write!(f, "<{dim:?}, dmask {dmask:#x}>")
            }
            Self::ImageAtomic { op, dim, .. } => write!(f, "<{op:?}, {dim:?}>"),
            Self::ImageResInfo { dim } | Self::ImageGetLod { dim } => write!(f, "<{dim:?}>"),
            Self::InputGeneric {
                location,
                interp,
                loc,
                ..
            } => write!(f, "<loc {location}, {interp:?}, {loc:?}>"),
            Self::InputInterpolant { location, interp } => {
                write!(f, "<loc {location}, {interp:?}>")
            }
            Self::OutputImportGeneric { location, .. } => write!(f, "<loc {location}>"),
            Self::OutputExportGeneric {
                location, stream, ..
            } => write!(f, "<loc {location}, stream {stream}>"),
            Self::OutputExportXfb {
                buffer,
                offset,
                stream,
            } => write!(f, "<buffer {buffer}, offset {offset}, stream {stream}>"),
            Self::InputBuiltIn { kind, .. }
            | Self::OutputImportBuiltIn { kind, .. }
            | Self::OutputExportBuiltIn { kind, .. } => write!(f, "<{kind}>"),
            Self::EmitVertex { stream } | Self::EndPrimitive { stream } => {
                write!(f, "<stream {stream}>")
            }
            Self::ReadClock { realtime } => write!(f, "<realtime {realtime}>"),
            Self::Fence { ordering } => write!(f, "<{ordering:?}>"),
            Self::Barrier | Self::Kill | Self::Demote | Self::IsHelperInvocation => Ok(()),
        }
    }
}

/// The name of `ty`, or its structure when it has none.
pub fn format_type(ty: &Type, types: &UniqueArena<Type>) -> String {
    match ty.name {
        Some(ref name) => name.clone(),
        None => format_type_inner(&ty.inner, types),
    }
}

pub fn format_type_inner(inner: &TypeInner, types: &UniqueArena<Type>) -> String {
    let named = |h: Handle<Type>| format_type(&types[h], types);
    match inner {
        TypeInner::Void => "void".into(),
        TypeInner::Scalar(s) => s.to_string(),
        TypeInner::Vector { size, scalar } => format!("<{size} x {scalar}>"),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("[{columns} x <{rows} x {scalar}>]"),
        TypeInner::Pointer { base, space } => format!("{} addrspace({space})*", named(*base)),
        TypeInner::Array { base, size } => format!("[{size} x {}]", named(*base)),
        TypeInner::Struct { members } => {
            let fields: Vec<String> = members.iter().map(|m| named(m.ty)).collect();
            format!("{{ {} }}", fields.join(", "))
        }
    }
}

struct Operands<'a>(&'a [Handle<Expression>]);

impl fmt::Display for Operands<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, h) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{h:?}")?;
        }
        Ok(())
    }
}

const COMPONENTS: [char; 8] = ['x', 'y', 'z', 'w', '4', '5', '6', '7'];

fn format_expr(expr: &Expression, types: &UniqueArena<Type>) -> String {
    let named = |h: Handle<Type>| format_type(&types[h], types);
    match expr {
        Expression::Literal(lit) => lit.to_string(),
        Expression::ZeroValue(ty) => format!("zeroinitializer {}", named(*ty)),
        Expression::Compose { ty, components } => {
            format!("{} {{ {} }}", named(*ty), Operands(components))
        }
        Expression::FunctionArgument(i) => format!("%arg{i}"),
        Expression::LocalVariable(h) => format!("&%local{}", h.index()),
        Expression::Load { pointer } => format!("load {pointer:?}"),
        Expression::Offset { pointer, offset } => format!("gep {pointer:?}, {offset:?} bytes"),
        Expression::ArgumentPointer { first, count } => {
            format!("&%arg{first}..%arg{}", first + count)
        }
        Expression::Access { base, index } => format!("{base:?}[{index:?}]"),
        Expression::AccessIndex { base, index } => format!("{base:?}.{index}"),
        Expression::Insert { base, value, index } => {
            format!("insert {base:?}.{index} <- {value:?}")
        }
        Expression::Swizzle { vector, pattern } => {
            let lanes: String = pattern
                .iter()
                .map(|&c| COMPONENTS.get(c as usize).copied().unwrap_or('?'))
                .collect();
            format!("{vector:?}.{lanes}")
        }
        Expression::Splat { size, value } => format!("splat.{size} {value:?}"),
        Expression::Unary { op, expr } => format!("{op}{expr:?}"),
        Expression::Binary { op, left, right } => format!("{left:?} {op} {right:?}"),
        Expression::Select {
            condition,
            accept,
            reject,
        } => format!("select {condition:?} ? {accept:?} : {reject:?}"),
        Expression::As {
            expr,
            kind,
            convert: Some(width),
        } => format!("cvt.{kind}{} {expr:?}", u32::from(*width) * 8),
        Expression::As {
            expr,
            kind,
            convert: None,
        } => format!("reinterpret.{kind} {expr:?}"),
        Expression::Bitcast { expr, ty } => format!("bitcast {expr:?} to {}", named(*ty)),
        Expression::Math {
            fun,
            arg,
            arg1,
            arg2,
        } => {
            let args: Vec<Handle<Expression>> =
                std::iter::once(*arg).chain(*arg1).chain(*arg2).collect();
            format!("{fun} {}", Operands(&args))
        }
        Expression::Lane { op, args } => format!("{op}({})", Operands(args)),
        Expression::Call { callee, args } => format!("call {callee}({})", Operands(args)),
    }
}

/// Writes a function body with every `Emit` expanded in place, so that each
/// expression appears where it is evaluated.
struct BodyWriter<'a> {
    out: &'a mut String,
    func: &'a Function,
    types: &'a UniqueArena<Type>,
}

impl BodyWriter<'_> {
    fn expression(&mut self, handle: Handle<Expression>, depth: usize) {
        let ty = self
            .func
            .try_expression_type(handle)
            .map_or_else(|| "?".to_string(), |ty| format_type(&self.types[ty], self.types));
        let text = format_expr(&self.func.expressions[handle], self.types);
        let _ = write!(self.out, "{:depth$}{handle:?} = {text} : {ty}", "", depth = depth * 2);
        match self.func.named_expressions.get(&handle) {
            Some(name) => {
                let _ = writeln!(self.out, " ; {name}");
            }
            None => self.out.push('\n'),
        }
    }

    fn line(&mut self, depth: usize, text: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{:depth$}{text}", "", depth = depth * 2);
    }

    fn block(&mut self, block: &[Statement], depth: usize) {
        for stmt in block {
            match stmt {
                Statement::Emit(range) => {
                    for handle in range.iter() {
                        self.expression(handle, depth);
                    }
                }
                Statement::Store { pointer, value } => {
                    self.line(depth, format_args!("store {value:?} -> {pointer:?}"));
                }
                Statement::If {
                    condition,
                    accept,
                    reject,
                } => {
                    self.line(depth, format_args!("if {condition:?} {{"));
                    self.block(accept, depth + 1);
                    if !reject.is_empty() {
                        self.line(depth, format_args!("}} else {{"));
                        self.block(reject, depth + 1);
                    }
                    self.line(depth, format_args!("}}"));
                }
                Statement::Loop {
                    body,
                    continuing,
                    break_if,
                } => {
                    self.line(depth, format_args!("loop {{"));
                    self.block(body, depth + 1);
                    if !continuing.is_empty() || break_if.is_some() {
                        self.line(depth, format_args!("continuing:"));
                        self.block(continuing, depth + 1);
                        if let Some(cond) = break_if {
                            self.line(depth + 1, format_args!("break if {cond:?}"));
                        }
                    }
                    self.line(depth, format_args!("}}"));
                }
                Statement::Break => self.line(depth, format_args!("break")),
                Statement::Continue => self.line(depth, format_args!("continue")),
                Statement::Return { value: Some(v) } => self.line(depth, format_args!("ret {v:?}")),
                Statement::Return { value: None } => self.line(depth, format_args!("ret void")),
            }
        }
    }
}

/// Renders `module` as text: the type table, then every entry point.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::from("; types\n");
    for (handle, ty) in module.types.iter() {
        let _ = writeln!(out, ";   {handle:?} {}", format_type(ty, &module.types));
    }
    for ep in &module.entry_points {
        let _ = writeln!(out, "\n; {} shader", ep.stage);
        dump_function(&mut out, &ep.name, &ep.function, &module.types);
    }
    out
}

/// Appends `func` to `out`. Expressions no `Emit` covers (constants,
/// arguments, local addresses) are listed ahead of the body.
pub fn dump_function(out: &mut String, label: &str, func: &Function, types: &UniqueArena<Type>) {
    let params: Vec<String> = func
        .arguments
        .iter()
        .map(|arg| {
            let mut param = String::new();
            if arg.in_reg {
                param.push_str("inreg ");
            }
            if let Some(binding) = &arg.binding {
                let _ = write!(param, "{binding} ");
            }
            let _ = write!(
                param,
                "{} %{}",
                format_type(&types[arg.ty], types),
                arg.name.as_deref().unwrap_or("_")
            );
            param
        })
        .collect();
    let result = func
        .result
        .as_ref()
        .map_or_else(|| "void".to_string(), |r| format_type(&types[r.ty], types));
    let name = func.name.as_deref().unwrap_or(label);
    let _ = writeln!(out, "define {result} @{name}({}) {{", params.join(", "));

    for (handle, var) in func.local_variables.iter() {
        let init = var.init.map(|h| format!(" = {h:?}")).unwrap_or_default();
        let _ = writeln!(
            out,
            "  %local{} {}: {}{init}",
            handle.index(),
            var.name.as_deref().unwrap_or("_"),
            format_type(&types[var.ty], types)
        );
    }

    let mut emitted = vec![false; func.expressions.len()];
    Statement::walk(&func.body, &mut |stmt| {
        if let Statement::Emit(range) = stmt {
            for h in range.iter() {
                if let Some(slot) = emitted.get_mut(h.index()) {
                    *slot = true;
                }
            }
        }
    });
    let mut writer = BodyWriter {
        out: &mut *out,
        func,
        types,
    };
    for (handle, _) in func.expressions.iter() {
        if !emitted[handle.index()] {
            writer.expression(handle, 1);
        }
    }
    writer.block(&func.body, 1);
    out.push_str("}\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_scalar() {
        assert_eq!(format!("{}", Scalar::F32), "f32");
        assert_eq!(format!("{}", Scalar::I16), "i16");
        assert_eq!(format!("{}", Scalar::U64), "u64");
        assert_eq!(format!("{}", Scalar::F16), "f16");
        assert_eq!(format!("{}", Scalar::BOOL), "bool");
    }

    #[test]
    fn display_literal() {
        assert_eq!(format!("{}", Literal::F32(3.125)), "3.125f");
        assert_eq!(format!("{}", Literal::U32(42)), "42u");
        assert_eq!(format!("{}", Literal::F16(0x3c00)), "1h");
        assert_eq!(format!("{}", Literal::Bool(true)), "true");
    }

    #[test]
    fn display_lane_ops() {
        let dpp = LaneOp::DppMov {
            ctrl: 0x4e,
            row_mask: 0xf,
            bank_mask: 0xf,
            bound_ctrl: true,
        };
        assert_eq!(format!("{dpp}"), "dpp_mov<0x4e, row 0xf, bank 0xf, bc true>");
        assert_eq!(format!("{}", LaneOp::Ballot), "ballot");
    }

    #[test]
    fn display_binding() {
        let b = Binding::BuiltIn(BuiltInKind::FragCoord);
        assert_eq!(format!("{b}"), "@builtin(FragCoord)");
        let e = Binding::Entry(EntryArg::UserDataNode { node: 1, dwords: 2 });
        assert_eq!(format!("{e}"), "@entry(userdata.node1x2)");
        assert_eq!(format!("{}", Binding::Entry(EntryArg::SpillTable)), "@entry(SpillTable)");
    }

    #[test]
    fn display_callee() {
        let c = Callee::DescriptorTable { node: 3 };
        assert_eq!(format!("{c}"), "descriptor.table<node 3>");
        assert_eq!(format!("{}", Callee::Kill), "kill");
    }

    #[test]
    fn type_syntax() {
        let mut types = UniqueArena::new();
        let f32_ty = types.insert(Type {
            name: None,
            inner: TypeInner::Scalar(Scalar::F32),
        });
        let vec = TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        };
        assert_eq!(format_type_inner(&vec, &types), "<4 x f32>");
        let ptr = TypeInner::Pointer {
            base: f32_ty,
            space: AddressSpace::Constant,
        };
        assert_eq!(format_type_inner(&ptr, &types), "f32 addrspace(constant)*");
        let array = TypeInner::Array {
            base: f32_ty,
            size: 3,
        };
        assert_eq!(format_type_inner(&array, &types), "[3 x f32]");
    }

    #[test]
    fn empty_module_lists_no_entry_points() {
        let dump = dump_module(&Module::default());
        assert_eq!(dump, "; types\n");
    }
}
