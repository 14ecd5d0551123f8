//! Type system for lowered shader IR.

use crate::arena::Handle;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean (one bit per lane in hardware).
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// IEEE floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I16: Self = Self {
        kind: ScalarKind::Sint,
        width: 2,
    };
    pub const U16: Self = Self {
        kind: ScalarKind::Uint,
        width: 2,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const I64: Self = Self {
        kind: ScalarKind::Sint,
        width: 8,
    };
    pub const U64: Self = Self {
        kind: ScalarKind::Uint,
        width: 8,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const F64: Self = Self {
        kind: ScalarKind::Float,
        width: 8,
    };

    /// Size in bits.
    pub fn bits(self) -> u32 {
        u32::from(self.width) * 8
    }

    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float
    }

    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }

    /// The same width with a different kind.
    pub fn with_kind(self, kind: ScalarKind) -> Self {
        Self { kind, ..self }
    }
}

/// Number of components in a vector.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum VectorSize {
    /// 2 components.
    Bi = 2,
    /// 3 components.
    Tri = 3,
    /// 4 components.
    Quad = 4,
    /// 8 components (image and fmask descriptors).
    Oct = 8,
}

impl VectorSize {
    /// Maps a component count onto a vector size.
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            8 => Some(Self::Oct),
            _ => None,
        }
    }

    pub fn count(self) -> u32 {
        self as u32
    }
}

/// Memory an address points into.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AddressSpace {
    /// Function-local variables.
    Function,
    /// Read-only constant memory: descriptor tables, the user-data spill
    /// table and push constants.
    Constant,
    /// Read/write global memory.
    Global,
    /// The entry point's own uniform argument registers.
    Arguments,
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: Handle<Type>,
}

/// A named type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    pub name: Option<String>,
    pub inner: TypeInner,
}

/// The concrete shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInner {
    /// No value (stores, exports and other void operations).
    Void,
    /// A single scalar value.
    Scalar(Scalar),
    /// A vector of scalars.
    Vector { size: VectorSize, scalar: Scalar },
    /// A matrix of column vectors.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    /// A fixed-size array.
    Array { base: Handle<Type>, size: u32 },
    /// A composite struct type.
    Struct { members: Vec<StructMember> },
    /// An address in a given address space.
    Pointer {
        base: Handle<Type>,
        space: AddressSpace,
    },
}

impl TypeInner {
    /// The scalar element of a scalar, vector or matrix type.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(scalar) | Self::Vector { scalar, .. } | Self::Matrix { scalar, .. } => {
                Some(scalar)
            }
            _ => None,
        }
    }

    /// Number of vector components, 1 for scalars.
    pub fn component_count(&self) -> u32 {
        match *self {
            Self::Vector { size, .. } => size.count(),
            _ => 1,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    /// Size of a scalar or vector value in bits.
    pub fn bit_size(&self) -> Option<u32> {
        match *self {
            Self::Scalar(scalar) => Some(scalar.bits()),
            Self::Vector { size, scalar } => Some(size.count() * scalar.bits()),
            _ => None,
        }
    }

    /// The scalar or vector type with `count` components of `scalar`.
    pub fn vector_or_scalar(scalar: Scalar, count: u32) -> Self {
        match VectorSize::from_count(count) {
            Some(size) => Self::Vector { size, scalar },
            None => Self::Scalar(scalar),
        }
    }
}
