//! Wavefront intermediate representation.
//!
//! An arena-based SSA IR for shader functions being lowered to a SIMD GPU.
//! Expressions are pure values evaluated per lane at their `Emit` point;
//! hardware cross-lane primitives and lowered operations that later passes
//! complete are expressions too, leaving statements for stores and
//! structured control flow.

pub mod arena;
mod binding;
mod call;
mod display;
mod error;
mod expr;
pub mod float16;
mod func;
mod stmt;
mod types;

pub use arena::{Arena, Handle, Range, UniqueArena};
pub use binding::{
    Binding, BuiltInKind, EntryArg, INTERNAL_BUILT_IN_BASE, ShaderStage, StageMask,
};
pub use call::{
    AtomicOp, AtomicOrdering, Callee, ImageDim, ImageFlags, InterpLoc, InterpMode,
    SampleOperands,
};
pub use display::{dump_function, dump_module, format_type, format_type_inner};
pub use error::IrError;
pub use expr::{BinaryOp, Expression, LaneOp, Literal, MathFunction, UnaryOp, class};
pub use func::{EntryPoint, Function, FunctionArgument, FunctionResult, LocalVariable};
pub use stmt::{Block, Statement};
pub use types::{
    AddressSpace, Bytes, Scalar, ScalarKind, StructMember, Type, TypeInner, VectorSize,
};

/// A lowered shader module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Deduplicated type arena shared by every entry point.
    pub types: UniqueArena<Type>,
    /// At most one entry point per shader stage.
    pub entry_points: Vec<EntryPoint>,
}

impl Module {
    /// Index of the entry point for `stage`.
    pub fn entry_point_index(&self, stage: ShaderStage) -> Option<usize> {
        self.entry_points.iter().position(|ep| ep.stage == stage)
    }

    pub fn entry_point(&self, stage: ShaderStage) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.stage == stage)
    }

    pub fn entry_point_mut(&mut self, stage: ShaderStage) -> Option<&mut EntryPoint> {
        self.entry_points.iter_mut().find(|ep| ep.stage == stage)
    }

    /// Returns the entry point for `stage`, creating an empty one if needed.
    pub fn get_or_add_entry_point(&mut self, stage: ShaderStage) -> usize {
        match self.entry_point_index(stage) {
            Some(idx) => idx,
            None => {
                let name = format!("main.{}", stage.name());
                self.entry_points.push(EntryPoint {
                    name: name.clone(),
                    stage,
                    function: Function::new(name),
                });
                self.entry_points.len() - 1
            }
        }
    }

    /// Borrows the type arena and one entry point's function at the same time.
    pub fn split_entry_point_mut(&mut self, index: usize) -> (&mut UniqueArena<Type>, &mut Function) {
        (&mut self.types, &mut self.entry_points[index].function)
    }

    /// Shader stages that have an entry point.
    pub fn stages(&self) -> StageMask {
        self.entry_points.iter().map(|ep| ep.stage).collect()
    }

    /// Finds the handle of a type, inserting it if absent.
    pub fn insert_type(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type { name: None, inner })
    }

    /// Checks that `stage` has an entry point.
    pub fn require_entry_point(&self, stage: ShaderStage) -> Result<&EntryPoint, IrError> {
        self.entry_point(stage)
            .ok_or(IrError::MissingEntryPoint(stage))
    }
}
