//! Reference SIMD interpreter for lowered wavefront IR.
//!
//! Runs one function over a single wave. Every expression is evaluated for
//! all lanes at its `Emit` point; lanes outside the execution mask keep the
//! value they had, so values from a lane's last loop iteration survive the
//! loop. Calls are handed to a [`Host`] for active lanes only.

mod error;
mod eval;
mod host;
pub mod lane;
mod value;

pub use error::InterpError;
pub use host::{CallInfo, Host, Image, MemoryHost};
pub use value::{Pointer, Value, type_size};

use wavefront_ir::{
    Callee, Expression, Function, Handle, Statement, Type, TypeInner, UniqueArena,
};

/// Iterations a single loop may run before execution is abandoned.
pub const MAX_LOOP_ITERATIONS: u32 = 4096;

/// Inputs of one run: the wave width, the initial execution mask and the
/// argument values.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub wave_size: u32,
    pub exec: u64,
    /// Per-argument lane values; a single value is shared by every lane.
    pub args: Vec<Vec<Value>>,
}

impl Invocation {
    /// A wave with every lane active and no arguments.
    pub fn new(wave_size: u32) -> Self {
        Self {
            wave_size,
            exec: full_mask(wave_size),
            args: Vec::new(),
        }
    }

    pub fn with_exec(mut self, exec: u64) -> Self {
        self.exec = exec & full_mask(self.wave_size);
        self
    }

    /// Appends an argument with the same value in every lane.
    pub fn uniform_arg(mut self, value: Value) -> Self {
        self.args.push(vec![value]);
        self
    }

    /// Appends an argument with a value per lane.
    pub fn lane_arg(mut self, values: Vec<Value>) -> Self {
        self.args.push(values);
        self
    }

    /// Appends an argument whose value in lane `l` is `f(l)`.
    pub fn lane_arg_with(self, f: impl Fn(u32) -> Value) -> Self {
        let values = (0..self.wave_size).map(f).collect();
        self.lane_arg(values)
    }

    fn arg(&self, index: u32, lane: u32) -> Result<Value, InterpError> {
        let values = self
            .args
            .get(index as usize)
            .ok_or(InterpError::MissingArgument(index))?;
        match values.as_slice() {
            [single] => Ok(single.clone()),
            many => many
                .get(lane as usize)
                .cloned()
                .ok_or(InterpError::MissingArgument(index)),
        }
    }
}

fn full_mask(wave_size: u32) -> u64 {
    if wave_size >= 64 {
        u64::MAX
    } else {
        (1u64 << wave_size) - 1
    }
}

fn lanes_of(mask: u64) -> impl Iterator<Item = u32> {
    (0..64).filter(move |lane| mask & (1u64 << lane) != 0)
}

/// The outcome of a run.
#[derive(Debug)]
pub struct Execution {
    values: Vec<Option<Vec<Value>>>,
    counts: Vec<u32>,
    /// Lanes removed by `Kill`.
    pub killed: u64,
    /// Lanes that executed a `Return`.
    pub returned: u64,
    results: Vec<Value>,
}

impl Execution {
    /// Last value of an expression in every lane.
    pub fn lanes(&self, handle: Handle<Expression>) -> Option<&[Value]> {
        self.values.get(handle.index())?.as_deref()
    }

    pub fn lane(&self, handle: Handle<Expression>, lane: u32) -> Option<&Value> {
        self.lanes(handle)?.get(lane as usize)
    }

    /// How many times an `Emit` with live lanes evaluated `handle`.
    pub fn eval_count(&self, handle: Handle<Expression>) -> u32 {
        self.counts.get(handle.index()).copied().unwrap_or(0)
    }

    /// Value returned by a lane.
    pub fn result(&self, lane: u32) -> Option<&Value> {
        self.results.get(lane as usize)
    }
}

/// Runs `func` over one wave.
pub fn run(
    types: &UniqueArena<Type>,
    func: &Function,
    invocation: &Invocation,
    host: &mut impl Host,
) -> Result<Execution, InterpError> {
    let wave = invocation.wave_size;
    log::debug!(
        "interpreting {} on wave{wave} exec={:#x}",
        func.name.as_deref().unwrap_or("<anon>"),
        invocation.exec
    );
    let locals = func
        .local_variables
        .iter()
        .map(|(_, var)| {
            let init = var
                .init
                .and_then(|h| match func.expressions[h] {
                    Expression::Literal(lit) => Some(Value::from(lit)),
                    _ => None,
                })
                .unwrap_or_else(|| Value::zero(&types[var.ty].inner, types));
            vec![init; wave as usize]
        })
        .collect();
    let mut interp = Interpreter {
        types,
        func,
        invocation,
        host,
        wave,
        values: vec![None; func.expressions.len()],
        counts: vec![0; func.expressions.len()],
        locals,
        killed: 0,
        results: vec![Value::Void; wave as usize],
    };
    let exits = interp.exec_block(&func.body, invocation.exec)?;
    Ok(Execution {
        values: interp.values,
        counts: interp.counts,
        killed: interp.killed,
        returned: exits.returned,
        results: interp.results,
    })
}

/// Lanes that left a block other than by falling through.
#[derive(Clone, Copy, Debug, Default)]
struct Exits {
    broke: u64,
    continued: u64,
    returned: u64,
}

impl Exits {
    fn all(self) -> u64 {
        self.broke | self.continued | self.returned
    }

    fn merge(&mut self, other: Exits) {
        self.broke |= other.broke;
        self.continued |= other.continued;
        self.returned |= other.returned;
    }
}

struct Interpreter<'a, H> {
    types: &'a UniqueArena<Type>,
    func: &'a Function,
    invocation: &'a Invocation,
    host: &'a mut H,
    wave: u32,
    values: Vec<Option<Vec<Value>>>,
    counts: Vec<u32>,
    locals: Vec<Vec<Value>>,
    killed: u64,
    results: Vec<Value>,
}

// Control flow.
impl<H: Host> Interpreter<'_, H> {
    fn exec_block(&mut self, block: &[Statement], mask: u64) -> Result<Exits, InterpError> {
        let mut exits = Exits::default();
        for stmt in block {
            let active = mask & !exits.all() & !self.killed;
            if active == 0 {
                break;
            }
            match *stmt {
                Statement::Emit(ref range) => {
                    for handle in range.iter() {
                        self.emit(handle, active)?;
                    }
                }
                Statement::Store { pointer, value } => self.store(pointer, value, active)?,
                Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    let cond = self.condition_mask(condition)?;
                    let taken = active & cond;
                    let not_taken = active & !cond;
                    if taken != 0 {
                        let inner = self.exec_block(accept, taken)?;
                        exits.merge(inner);
                    }
                    if not_taken != 0 {
                        let inner = self.exec_block(reject, not_taken)?;
                        exits.merge(inner);
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => {
                    let returned = self.exec_loop(body, continuing, break_if, active)?;
                    exits.returned |= returned;
                }
                Statement::Break => exits.broke |= active,
                Statement::Continue => exits.continued |= active,
                Statement::Return { value } => {
                    if let Some(value) = value {
                        let values = self.value(value)?.to_vec();
                        for lane in lanes_of(active) {
                            self.results[lane as usize] = values[lane as usize].clone();
                        }
                    }
                    exits.returned |= active;
                }
            }
        }
        Ok(exits)
    }

    /// Runs a loop until every lane has left it; returns the lanes that
    /// returned from the function inside it.
    fn exec_loop(
        &mut self,
        body: &[Statement],
        continuing: &[Statement],
        break_if: Option<Handle<Expression>>,
        mask: u64,
    ) -> Result<u64, InterpError> {
        let mut live = mask;
        let mut returned = 0;
        let mut iterations = 0;
        while live & !self.killed != 0 {
            iterations += 1;
            if iterations > MAX_LOOP_ITERATIONS {
                return Err(InterpError::LoopLimit(MAX_LOOP_ITERATIONS));
            }
            let exits = self.exec_block(body, live)?;
            returned |= exits.returned;
            live &= !(exits.broke | exits.returned);

            let exits = self.exec_block(continuing, live)?;
            returned |= exits.returned;
            live &= !(exits.broke | exits.returned);

            if let Some(cond) = break_if {
                if live & !self.killed != 0 {
                    live &= !self.condition_mask(cond)?;
                }
            }
        }
        log::trace!("loop finished after {iterations} iterations");
        Ok(returned)
    }

    fn condition_mask(&self, handle: Handle<Expression>) -> Result<u64, InterpError> {
        let values = self.value(handle)?;
        let mut mask = 0u64;
        for (lane, v) in values.iter().enumerate() {
            let set = value::expect(v.as_bool(), "condition", "a boolean")?;
            if set {
                mask |= 1 << lane;
            }
        }
        Ok(mask)
    }
}

// Values.
impl<H: Host> Interpreter<'_, H> {
    fn value(&self, handle: Handle<Expression>) -> Result<&[Value], InterpError> {
        self.values
            .get(handle.index())
            .and_then(|v| v.as_deref())
            .ok_or(InterpError::NotEvaluated(handle.index()))
    }

    fn type_inner(&self, handle: Handle<Expression>) -> &TypeInner {
        &self.types[self.func.expression_type(handle)].inner
    }

    fn per_lane(
        &self,
        mut f: impl FnMut(u32) -> Result<Value, InterpError>,
    ) -> Result<Vec<Value>, InterpError> {
        (0..self.wave).map(|lane| f(lane)).collect()
    }

    fn emit(&mut self, handle: Handle<Expression>, active: u64) -> Result<(), InterpError> {
        let computed = self.evaluate(handle, active)?;
        let slot = &mut self.values[handle.index()];
        match slot {
            Some(previous) => {
                for lane in lanes_of(active) {
                    previous[lane as usize] = computed[lane as usize].clone();
                }
            }
            None => *slot = Some(computed),
        }
        self.counts[handle.index()] += 1;
        Ok(())
    }

    fn evaluate(
        &mut self,
        handle: Handle<Expression>,
        active: u64,
    ) -> Result<Vec<Value>, InterpError> {
        let types = self.types;
        let func = self.func;
        Ok(match func.expressions[handle] {
            Expression::Literal(lit) => vec![Value::from(lit); self.wave as usize],
            Expression::ZeroValue(ty) => {
                vec![Value::zero(&types[ty].inner, types); self.wave as usize]
            }
            Expression::Compose {
                ty,
                ref components,
            } => {
                let flatten = types[ty].inner.is_vector();
                self.per_lane(|lane| {
                    let mut parts = Vec::new();
                    for &c in components {
                        let v = &self.value(c)?[lane as usize];
                        if flatten {
                            parts.extend(v.components().iter().cloned());
                        } else {
                            parts.push(v.clone());
                        }
                    }
                    Ok(Value::Composite(parts))
                })?
            }
            Expression::FunctionArgument(index) => {
                self.per_lane(|lane| self.invocation.arg(index, lane))?
            }
            Expression::LocalVariable(var) => vec![
                Value::Pointer(Pointer::Local {
                    var: var.index() as u32,
                });
                self.wave as usize
            ],
            Expression::Load { pointer } => {
                let pointers = self.value(pointer)?.to_vec();
                let inner = self.type_inner(handle).clone();
                (0..self.wave)
                    .map(|lane| self.load(&pointers[lane as usize], &inner, lane))
                    .collect::<Result<_, _>>()?
            }
            Expression::Offset { pointer, offset } => {
                let (pointers, offsets) = (self.value(pointer)?, self.value(offset)?);
                self.per_lane(|lane| {
                    let by = offsets[lane as usize].as_i64().unwrap_or(0);
                    Ok(Value::Pointer(match pointers[lane as usize] {
                        Value::Pointer(Pointer::Memory { address }) => Pointer::Memory {
                            address: address.wrapping_add(by as u64),
                        },
                        Value::Pointer(Pointer::Arguments { first, offset }) => {
                            Pointer::Arguments {
                                first,
                                offset: offset.wrapping_add(by as u32),
                            }
                        }
                        ref other => {
                            return Err(InterpError::BadPointer(format!(
                                "cannot offset {other:?}"
                            )));
                        }
                    }))
                })?
            }
            Expression::ArgumentPointer { first, .. } => vec![
                Value::Pointer(Pointer::Arguments { first, offset: 0 });
                self.wave as usize
            ],
            Expression::Access { base, index } => {
                let zero = Value::zero(self.type_inner(handle), types);
                let (bases, indices) = (self.value(base)?, self.value(index)?);
                self.per_lane(|lane| {
                    let i = indices[lane as usize].as_i64().unwrap_or(-1);
                    let parts = bases[lane as usize].components();
                    Ok(usize::try_from(i)
                        .ok()
                        .and_then(|i| parts.get(i))
                        .cloned()
                        .unwrap_or_else(|| zero.clone()))
                })?
            }
            Expression::AccessIndex { base, index } => {
                let bases = self.value(base)?;
                self.per_lane(|lane| {
                    bases[lane as usize]
                        .components()
                        .get(index as usize)
                        .cloned()
                        .ok_or_else(|| InterpError::TypeMismatch {
                            op: "access",
                            detail: format!("index {index} out of range"),
                        })
                })?
            }
            Expression::Insert { base, value, index } => {
                let (bases, values) = (self.value(base)?, self.value(value)?);
                self.per_lane(|lane| {
                    let mut parts = bases[lane as usize].components().to_vec();
                    let slot = parts.get_mut(index as usize).ok_or_else(|| {
                        InterpError::TypeMismatch {
                            op: "insert",
                            detail: format!("index {index} out of range"),
                        }
                    })?;
                    *slot = values[lane as usize].clone();
                    Ok(Value::Composite(parts))
                })?
            }
            Expression::Swizzle {
                vector,
                ref pattern,
            } => {
                let vectors = self.value(vector)?;
                self.per_lane(|lane| {
                    let parts = vectors[lane as usize].components();
                    let picked = pattern
                        .iter()
                        .map(|&i| {
                            parts.get(i as usize).cloned().ok_or_else(|| {
                                InterpError::TypeMismatch {
                                    op: "swizzle",
                                    detail: format!("component {i} out of range"),
                                }
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(if picked.len() == 1 {
                        picked.into_iter().next().unwrap_or(Value::Void)
                    } else {
                        Value::Composite(picked)
                    })
                })?
            }
            Expression::Splat { size, value } => {
                let values = self.value(value)?;
                self.per_lane(|lane| {
                    Ok(Value::Composite(vec![
                        values[lane as usize].clone();
                        size.count() as usize
                    ]))
                })?
            }
            Expression::Unary { op, expr } => {
                let values = self.value(expr)?;
                self.per_lane(|lane| eval::unary(op, &values[lane as usize]))?
            }
            Expression::Binary { op, left, right } => {
                let (a, b) = (self.value(left)?, self.value(right)?);
                self.per_lane(|lane| eval::binary(op, &a[lane as usize], &b[lane as usize]))?
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let (c, a, r) = (
                    self.value(condition)?,
                    self.value(accept)?,
                    self.value(reject)?,
                );
                self.per_lane(|lane| {
                    let l = lane as usize;
                    eval::select(&c[l], &a[l], &r[l])
                })?
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                let values = self.value(expr)?;
                self.per_lane(|lane| eval::convert(&values[lane as usize], kind, convert))?
            }
            Expression::Bitcast { expr, ty } => {
                let values = self.value(expr)?;
                let inner = &types[ty].inner;
                self.per_lane(|lane| Ok(values[lane as usize].bitcast(inner, types)))?
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
            } => {
                let a = self.value(arg)?;
                let b = arg1.map(|h| self.value(h)).transpose()?;
                let c = arg2.map(|h| self.value(h)).transpose()?;
                self.per_lane(|lane| {
                    let l = lane as usize;
                    eval::math(fun, &a[l], b.map(|b| &b[l]), c.map(|c| &c[l]))
                })?
            }
            Expression::Lane { op, ref args } => {
                let args = args
                    .iter()
                    .map(|&h| self.value(h).map(<[Value]>::to_vec))
                    .collect::<Result<Vec<_>, _>>()?;
                lane::eval(op, &args, active, self.wave)?
            }
            Expression::Call {
                ref callee,
                ref args,
            } => self.call(handle, callee, args, active)?,
        })
    }

    fn call(
        &mut self,
        handle: Handle<Expression>,
        callee: &Callee,
        args: &[Handle<Expression>],
        active: u64,
    ) -> Result<Vec<Value>, InterpError> {
        let types = self.types;
        let ty = &types[self.func.expression_type(handle)].inner;
        let arg_values = args
            .iter()
            .map(|&h| self.value(h).map(<[Value]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = vec![Value::zero(ty, types); self.wave as usize];
        for lane in lanes_of(active) {
            let lane_args: Vec<Value> = arg_values
                .iter()
                .map(|values| values[lane as usize].clone())
                .collect();
            let info = CallInfo {
                lane,
                callee,
                ty,
                types,
            };
            out[lane as usize] = self.host.call(&info, &lane_args)?;
        }
        if matches!(callee, Callee::Kill) {
            log::debug!("kill removes lanes {active:#x}");
            self.killed |= active;
        }
        Ok(out)
    }
}

// Memory.
impl<H: Host> Interpreter<'_, H> {
    fn load(&mut self, pointer: &Value, inner: &TypeInner, lane: u32) -> Result<Value, InterpError> {
        match *pointer {
            Value::Pointer(Pointer::Local { var }) => self
                .locals
                .get(var as usize)
                .map(|values| values[lane as usize].clone())
                .ok_or_else(|| InterpError::BadPointer(format!("no local variable {var}"))),
            Value::Pointer(Pointer::Memory { address }) => {
                let size = u64::from(type_size(inner, self.types));
                let start = address & !3;
                let mut bytes = Vec::new();
                let mut at = start;
                while at < address + size {
                    bytes.extend_from_slice(&self.host.read_dword(at).to_le_bytes());
                    at += 4;
                }
                let mut pos = (address - start) as usize;
                Ok(Value::read_bytes(inner, self.types, &bytes, &mut pos))
            }
            Value::Pointer(Pointer::Arguments { first, offset }) => {
                let mut bytes = Vec::new();
                for index in first..self.invocation.args.len() as u32 {
                    self.invocation.arg(index, lane)?.write_bytes(&mut bytes);
                }
                let mut pos = offset as usize;
                Ok(Value::read_bytes(inner, self.types, &bytes, &mut pos))
            }
            ref other => Err(InterpError::BadPointer(format!("cannot load through {other:?}"))),
        }
    }

    fn store(
        &mut self,
        pointer: Handle<Expression>,
        value: Handle<Expression>,
        active: u64,
    ) -> Result<(), InterpError> {
        let pointers = self.value(pointer)?.to_vec();
        let values = self.value(value)?.to_vec();
        for lane in lanes_of(active) {
            let v = &values[lane as usize];
            match pointers[lane as usize] {
                Value::Pointer(Pointer::Local { var }) => {
                    let slot = self
                        .locals
                        .get_mut(var as usize)
                        .ok_or_else(|| InterpError::BadPointer(format!("no local variable {var}")))?;
                    slot[lane as usize] = v.clone();
                }
                Value::Pointer(Pointer::Memory { address }) => {
                    let mut bytes = Vec::new();
                    v.write_bytes(&mut bytes);
                    self.write_memory(address, &bytes);
                }
                ref other => {
                    return Err(InterpError::BadPointer(format!(
                        "cannot store through {other:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) {
        let start = address & !3;
        let end = address + bytes.len() as u64;
        let mut at = start;
        while at < end {
            let mut dword = self.host.read_dword(at).to_le_bytes();
            for (i, b) in dword.iter_mut().enumerate() {
                let byte_address = at + i as u64;
                if byte_address >= address && byte_address < end {
                    *b = bytes[(byte_address - address) as usize];
                }
            }
            self.host.write_dword(at, u32::from_le_bytes(dword));
            at += 4;
        }
    }
}
