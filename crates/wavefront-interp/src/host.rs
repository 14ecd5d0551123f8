//! Host callbacks for lowered calls and memory.

use std::collections::HashMap;

use wavefront_ir::{
    AtomicOp, BuiltInKind, Callee, ImageDim, SampleOperands, Scalar, ScalarKind, Type, TypeInner,
    UniqueArena,
};

use crate::error::InterpError;
use crate::value::{Pointer, Value};

/// A lowered call being evaluated for one lane.
pub struct CallInfo<'a> {
    pub lane: u32,
    pub callee: &'a Callee,
    /// Result type of the call.
    pub ty: &'a TypeInner,
    pub types: &'a UniqueArena<Type>,
}

/// The world outside the function: memory, inputs, outputs and resources.
pub trait Host {
    /// Evaluates `call` for one active lane.
    fn call(&mut self, call: &CallInfo<'_>, args: &[Value]) -> Result<Value, InterpError>;

    /// Reads the dword at a four-byte aligned address.
    fn read_dword(&mut self, address: u64) -> u32;

    /// Writes the dword at a four-byte aligned address.
    fn write_dword(&mut self, address: u64, value: u32);
}

/// A texel image addressed by the first dword of its descriptor.
#[derive(Clone, Debug, Default)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub levels: u32,
    /// Row-major texels, `width * height * depth` of them.
    pub texels: Vec<[u32; 4]>,
}

impl Image {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
            levels: 1,
            texels: vec![[0; 4]; (width * height * depth) as usize],
        }
    }

    fn index(&self, coord: &[i64]) -> Option<usize> {
        let get = |i: usize| coord.get(i).copied().unwrap_or(0);
        let (x, y, z) = (get(0), get(1), get(2));
        if x < 0
            || y < 0
            || z < 0
            || x >= i64::from(self.width)
            || y >= i64::from(self.height.max(1))
            || z >= i64::from(self.depth.max(1))
        {
            return None;
        }
        let w = i64::from(self.width);
        let h = i64::from(self.height.max(1));
        Some((x + y * w + z * w * h) as usize)
    }
}

/// A host with flat memory and tables of inputs, outputs and images.
///
/// Outputs written by a lane can be read back by the same lane, as a stage
/// reading its own outputs does.
#[derive(Debug, Default)]
pub struct MemoryHost {
    /// Dwords keyed by byte address.
    pub memory: HashMap<u64, u32>,
    /// Address of the descriptor table of each root node.
    pub descriptor_tables: HashMap<u32, u64>,
    /// Contents of root nodes passed in registers.
    pub root_descriptors: HashMap<u32, Vec<u32>>,
    /// Address of the push constants.
    pub push_constants: u64,
    /// Built-in input values per lane; a lane without an entry uses lane
    /// `u32::MAX` as a uniform fallback.
    pub built_ins: HashMap<(BuiltInKind, u32), Value>,
    /// Generic inputs per (location, lane).
    pub inputs: HashMap<(u32, u32), Value>,
    /// Generic outputs per (location, component, lane).
    pub outputs: HashMap<(u32, u32, u32), Value>,
    pub built_in_outputs: HashMap<(BuiltInKind, u32), Value>,
    pub xfb_outputs: Vec<(u32, u32, Value)>,
    pub images: HashMap<u32, Image>,
    pub helper_lanes: u64,
    pub clock: u64,
    /// Every side-effecting call in order, with its lane.
    pub calls: Vec<(u32, Callee)>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `dwords` at `address`.
    pub fn write_dwords(&mut self, address: u64, dwords: &[u32]) {
        for (i, &dword) in dwords.iter().enumerate() {
            self.memory.insert(address + 4 * i as u64, dword);
        }
    }

    /// Sets a built-in input for every lane.
    pub fn set_uniform_built_in(&mut self, kind: BuiltInKind, value: Value) {
        self.built_ins.insert((kind, u32::MAX), value);
    }

    fn built_in(
        &self,
        kind: BuiltInKind,
        lane: u32,
        ty: &TypeInner,
        types: &UniqueArena<Type>,
    ) -> Value {
        self.built_ins
            .get(&(kind, lane))
            .or_else(|| self.built_ins.get(&(kind, u32::MAX)))
            .cloned()
            .unwrap_or_else(|| match kind {
                BuiltInKind::SubgroupLocalInvocationId => Value::U32(lane),
                _ => Value::zero(ty, types),
            })
    }

    fn image_mut(&mut self, desc: &Value) -> Result<&mut Image, InterpError> {
        let key = desc.components().first().and_then(Value::as_u32).unwrap_or(0);
        self.images
            .get_mut(&key)
            .ok_or_else(|| InterpError::BadPointer(format!("no image for descriptor {key:#x}")))
    }

    fn texel_value(texel: [u32; 4], ty: &TypeInner) -> Value {
        let scalar = ty.scalar().unwrap_or(Scalar::F32);
        let count = ty.component_count() as usize;
        let parts: Vec<Value> = texel
            .iter()
            .take(count)
            .map(|&bits| Value::from_bits(scalar, u64::from(bits)))
            .collect();
        if count == 1 {
            parts.into_iter().next().unwrap_or(Value::U32(0))
        } else {
            Value::Composite(parts)
        }
    }

    fn int_coord(coord: &Value) -> Vec<i64> {
        coord
            .components()
            .iter()
            .map(|c| c.as_i64().unwrap_or_else(|| c.as_f64().unwrap_or(0.0) as i64))
            .collect()
    }
}

impl Host for MemoryHost {
    fn call(&mut self, call: &CallInfo<'_>, args: &[Value]) -> Result<Value, InterpError> {
        let lane = call.lane;
        if call.callee.has_side_effects() {
            self.calls.push((lane, call.callee.clone()));
        }
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Void);
        let zero = || Value::zero(call.ty, call.types);

        Ok(match *call.callee {
            Callee::DescriptorTable { node } => {
                let address = self.descriptor_tables.get(&node).copied().unwrap_or(0);
                Value::Pointer(Pointer::Memory { address })
            }
            Callee::RootDescriptor { node, .. } => {
                let dwords = self.root_descriptors.get(&node).cloned().unwrap_or_default();
                let mut bytes = Vec::new();
                for d in dwords {
                    bytes.extend_from_slice(&d.to_le_bytes());
                }
                Value::read_bytes(call.ty, call.types, &bytes, &mut 0)
            }
            Callee::PushConstants { .. } => Value::Pointer(Pointer::Memory {
                address: self.push_constants,
            }),

            Callee::ImageLoad { .. } => {
                let desc = arg(0);
                let coord = Self::int_coord(&arg(1));
                let image = self.image_mut(&desc)?;
                match image.index(&coord) {
                    Some(i) => Self::texel_value(image.texels[i], call.ty),
                    None => zero(),
                }
            }
            Callee::ImageStore { .. } => {
                let texel = arg(0);
                let coord = Self::int_coord(&arg(2));
                let image = self.image_mut(&arg(1))?;
                if let Some(i) = image.index(&coord) {
                    for (c, v) in texel.components().iter().enumerate().take(4) {
                        image.texels[i][c] = v.to_bits() as u32;
                    }
                }
                Value::Void
            }
            Callee::ImageSample { dim, operands, .. } | Callee::ImageGather { dim, operands, .. } => {
                let desc = arg(0);
                let mut index = 2;
                for flag in [
                    SampleOperands::OFFSET,
                    SampleOperands::BIAS,
                    SampleOperands::COMPARE,
                    SampleOperands::GRADIENT,
                ] {
                    if operands.contains(flag) {
                        index += if flag == SampleOperands::GRADIENT { 2 } else { 1 };
                    }
                }
                let coord = arg(index);
                let image = self.image_mut(&desc)?;
                let size = [image.width, image.height.max(1), image.depth.max(1)];
                let texel_coord: Vec<i64> = coord
                    .components()
                    .iter()
                    .take(if dim == ImageDim::D3 { 3 } else { 2 })
                    .enumerate()
                    .map(|(i, c)| {
                        let f = c.as_f64().unwrap_or(0.0);
                        ((f * f64::from(size[i])).floor() as i64).clamp(0, i64::from(size[i]) - 1)
                    })
                    .collect();
                match image.index(&texel_coord) {
                    Some(i) => Self::texel_value(image.texels[i], call.ty),
                    None => zero(),
                }
            }
            Callee::ImageAtomic { op, .. } => {
                let has_compare = op == AtomicOp::CompareSwap;
                let value = arg(0).as_u32().unwrap_or(0);
                let compare = if has_compare { arg(1).as_u32() } else { None };
                let base = if has_compare { 2 } else { 1 };
                let coord = Self::int_coord(&arg(base + 1));
                let signed = call.ty.scalar().map(|s| s.kind) == Some(ScalarKind::Sint);
                let image = self.image_mut(&arg(base))?;
                let Some(i) = image.index(&coord) else {
                    return Ok(zero());
                };
                let old = image.texels[i][0];
                let new = match op {
                    AtomicOp::Swap => value,
                    AtomicOp::CompareSwap => {
                        if Some(old) == compare {
                            value
                        } else {
                            old
                        }
                    }
                    AtomicOp::Add => old.wrapping_add(value),
                    AtomicOp::Sub => old.wrapping_sub(value),
                    AtomicOp::SMin => (old as i32).min(value as i32) as u32,
                    AtomicOp::UMin => old.min(value),
                    AtomicOp::SMax => (old as i32).max(value as i32) as u32,
                    AtomicOp::UMax => old.max(value),
                    AtomicOp::And => old & value,
                    AtomicOp::Or => old | value,
                    AtomicOp::Xor => old ^ value,
                    AtomicOp::Inc => {
                        if old >= value {
                            0
                        } else {
                            old + 1
                        }
                    }
                    AtomicOp::Dec => {
                        if old == 0 || old > value {
                            value
                        } else {
                            old - 1
                        }
                    }
                };
                image.texels[i][0] = new;
                if signed {
                    Value::I32(old as i32)
                } else {
                    Value::U32(old)
                }
            }
            Callee::ImageResInfo { .. } => {
                let image = self.image_mut(&arg(0))?;
                let dims = [image.width, image.height, image.depth, image.levels];
                Value::Composite(dims.iter().map(|&d| Value::I32(d as i32)).collect())
            }
            Callee::ImageGetLod { .. } => zero(),

            Callee::InputGeneric { location, .. } | Callee::InputInterpolant { location, .. } => {
                let loc = location + arg(0).as_u32().unwrap_or(0);
                let elem = arg(1).as_u32().unwrap_or(0) as usize;
                let stored = self
                    .inputs
                    .get(&(loc, lane))
                    .or_else(|| self.inputs.get(&(loc, u32::MAX)))
                    .cloned();
                match stored {
                    Some(value) => select_components(&value, elem, call.ty.component_count()),
                    None => zero(),
                }
            }
            Callee::OutputImportGeneric { location, .. } => {
                let loc = location + arg(0).as_u32().unwrap_or(0);
                let elem = arg(1).as_u32().unwrap_or(0);
                self.outputs
                    .get(&(loc, elem, lane))
                    .cloned()
                    .unwrap_or_else(zero)
            }
            Callee::OutputExportGeneric { location, .. } => {
                let loc = location + arg(0).as_u32().unwrap_or(0);
                let elem = arg(1).as_u32().unwrap_or(0);
                let value = args.last().cloned().unwrap_or(Value::Void);
                self.outputs.insert((loc, elem, lane), value);
                Value::Void
            }
            Callee::OutputExportXfb { buffer, offset, .. } => {
                self.xfb_outputs.push((buffer, offset, arg(0)));
                Value::Void
            }
            Callee::InputBuiltIn { kind, .. } => self.built_in(kind, lane, call.ty, call.types),
            Callee::OutputImportBuiltIn { kind, .. } => self
                .built_in_outputs
                .get(&(kind, lane))
                .cloned()
                .unwrap_or_else(zero),
            Callee::OutputExportBuiltIn { kind, .. } => {
                let value = args.last().cloned().unwrap_or(Value::Void);
                self.built_in_outputs.insert((kind, lane), value);
                Value::Void
            }

            Callee::IsHelperInvocation => Value::Bool(self.helper_lanes & (1 << lane) != 0),
            Callee::Demote => {
                self.helper_lanes |= 1 << lane;
                Value::Void
            }
            Callee::ReadClock { .. } => {
                self.clock += 1;
                Value::U64(self.clock)
            }
            Callee::EmitVertex { .. }
            | Callee::EndPrimitive { .. }
            | Callee::Barrier
            | Callee::Kill
            | Callee::Fence { .. } => Value::Void,
        })
    }

    fn read_dword(&mut self, address: u64) -> u32 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    fn write_dword(&mut self, address: u64, value: u32) {
        self.memory.insert(address, value);
    }
}

/// `count` components of `value` starting at `first`.
fn select_components(value: &Value, first: usize, count: u32) -> Value {
    let parts = value.components();
    if count <= 1 {
        return parts.get(first).cloned().unwrap_or(Value::U32(0));
    }
    Value::Composite(
        (0..count as usize)
            .map(|i| parts.get(first + i).cloned().unwrap_or(Value::U32(0)))
            .collect(),
    )
}
