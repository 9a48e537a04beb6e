//! Runs validated naga IR for a single shader invocation.
//!
//! Values are kept as `f64` lanes tagged with their scalar kind and re-rounded to the
//! kind's precision after every operation, so float results match 32-bit GPU arithmetic
//! for the basic operators.

use std::collections::HashMap;

use naga::{
    AddressSpace, BinaryOperator, Block, Expression, Function, GlobalVariable, Handle, ImageQuery,
    Literal, LocalVariable, MathFunction, Module, RelationalFunction, ScalarKind, Statement,
    SwitchValue, Type, TypeInner, UnaryOperator,
};

const LOOP_LIMIT: usize = 1 << 16;
const CALL_DEPTH_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Float,
    Sint,
    Uint,
    Bool,
}

impl Kind {
    fn of(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Float | ScalarKind::AbstractFloat => Kind::Float,
            ScalarKind::Sint | ScalarKind::AbstractInt => Kind::Sint,
            ScalarKind::Uint => Kind::Uint,
            ScalarKind::Bool => Kind::Bool,
        }
    }

    fn normalize(self, v: f64) -> f64 {
        match self {
            Kind::Float => v as f32 as f64,
            Kind::Sint => v as i64 as i32 as f64,
            Kind::Uint => v as i64 as u32 as f64,
            Kind::Bool => bool_lane(v != 0.0),
        }
    }
}

fn bool_lane(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Root {
    Global(Handle<GlobalVariable>),
    Local {
        frame: usize,
        var: Handle<LocalVariable>,
    },
}

/// What a pointer expression refers to: a variable plus an access path into it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Place {
    root: Root,
    path: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    /// Scalar or vector.
    Lanes { kind: Kind, lanes: Vec<f64> },
    /// Matrix columns, array elements or struct members.
    Composite(Vec<Value>),
    Pointer(Place),
    Image(Handle<GlobalVariable>),
    Sampler,
}

impl Value {
    pub fn from_lanes(kind: Kind, lanes: impl IntoIterator<Item = f64>) -> Self {
        Value::Lanes {
            kind,
            lanes: lanes.into_iter().map(|v| kind.normalize(v)).collect(),
        }
    }

    pub fn scalar(kind: Kind, v: f64) -> Self {
        Self::from_lanes(kind, [v])
    }

    fn lanes(&self) -> Result<(Kind, &[f64]), String> {
        match self {
            Value::Lanes { kind, lanes } => Ok((*kind, lanes)),
            other => Err(format!("expected a scalar or vector, found {other:?}")),
        }
    }

    fn single(&self) -> Result<f64, String> {
        match self.lanes()? {
            (_, [v]) => Ok(*v),
            (_, lanes) => Err(format!("expected a scalar, found {} lanes", lanes.len())),
        }
    }

    fn truthy(&self) -> Result<bool, String> {
        Ok(self.single()? != 0.0)
    }

    /// Flattened lanes of a scalar, vector or matrix.
    pub fn flatten(&self) -> Option<Vec<f64>> {
        match self {
            Value::Lanes { lanes, .. } => Some(lanes.clone()),
            Value::Composite(items) => items.iter().map(Value::flatten).try_fold(
                Vec::new(),
                |mut acc, part| {
                    acc.extend(part?);
                    Some(acc)
                },
            ),
            _ => None,
        }
    }
}

/// Resources an invocation reads from the GL state.
pub(crate) trait Resources {
    /// Current value of the uniform backing `global`.
    fn uniform(&self, global: Handle<GlobalVariable>) -> Option<&[f32]>;
    /// RGBA sample of the texture bound for the sampler `image` is set through.
    fn sample(&self, image: Handle<GlobalVariable>, u: f64, v: f64) -> [f32; 4];
    fn texture_size(&self, image: Handle<GlobalVariable>) -> [u32; 2];
}

pub(crate) enum Outcome {
    Returned(Option<Value>),
    /// `discard` was executed.
    Discarded,
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(Option<Value>),
    Kill,
}

struct Frame<'a> {
    function: &'a Function,
    args: Vec<Value>,
    exprs: Vec<Option<Value>>,
    depth: usize,
}

pub(crate) struct Invocation<'a, R> {
    module: &'a Module,
    resources: &'a R,
    privates: HashMap<Handle<GlobalVariable>, Value>,
    locals: Vec<Vec<Option<Value>>>,
}

impl<'a, R: Resources> Invocation<'a, R> {
    pub fn new(module: &'a Module, resources: &'a R) -> Self {
        Self {
            module,
            resources,
            privates: HashMap::new(),
            locals: Vec::new(),
        }
    }

    /// Run the module's entry point with its arguments in declaration order.
    pub fn run_entry(&mut self, args: Vec<Value>) -> Result<Outcome, String> {
        let module = self.module;
        let ep = module
            .entry_points
            .first()
            .ok_or_else(|| "module has no entry point".to_string())?;
        self.call(&ep.function, args)
    }

    fn call(&mut self, function: &'a Function, args: Vec<Value>) -> Result<Outcome, String> {
        if self.locals.len() >= CALL_DEPTH_LIMIT {
            return Err("call depth limit exceeded".into());
        }
        let depth = self.locals.len();
        self.locals.push(vec![None; function.local_variables.len()]);
        let mut frame = Frame {
            function,
            args,
            exprs: vec![None; function.expressions.len()],
            depth,
        };
        let flow = self
            .init_locals(&mut frame)
            .and_then(|()| self.block(&mut frame, &function.body));
        self.locals.pop();
        match flow? {
            Flow::Return(v) => Ok(Outcome::Returned(v)),
            Flow::Next => Ok(Outcome::Returned(None)),
            Flow::Kill => Ok(Outcome::Discarded),
            Flow::Break | Flow::Continue => Err("break or continue outside of a loop".into()),
        }
    }

    fn init_locals(&mut self, frame: &mut Frame<'a>) -> Result<(), String> {
        for (handle, local) in frame.function.local_variables.iter() {
            let value = match local.init {
                Some(init) => self.eval(frame, init)?,
                None => zero(self.module, local.ty)?,
            };
            self.locals[frame.depth][handle.index()] = Some(value);
        }
        Ok(())
    }

    fn block(&mut self, frame: &mut Frame<'a>, block: &'a Block) -> Result<Flow, String> {
        for stmt in block.iter() {
            match self.statement(frame, stmt)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn statement(&mut self, frame: &mut Frame<'a>, stmt: &'a Statement) -> Result<Flow, String> {
        match *stmt {
            Statement::Emit(ref range) => {
                for h in range.clone() {
                    let v = self.compute(frame, h)?;
                    frame.exprs[h.index()] = Some(v);
                }
                Ok(Flow::Next)
            }
            Statement::Block(ref block) => self.block(frame, block),
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => {
                if self.eval(frame, condition)?.truthy()? {
                    self.block(frame, accept)
                } else {
                    self.block(frame, reject)
                }
            }
            Statement::Switch {
                selector,
                ref cases,
            } => {
                let selector = self.eval(frame, selector)?.single()?;
                let hits = |value: &SwitchValue| match *value {
                    SwitchValue::I32(v) => f64::from(v) == selector,
                    SwitchValue::U32(v) => f64::from(v) == selector,
                    SwitchValue::Default => false,
                };
                let start = cases
                    .iter()
                    .position(|c| hits(&c.value))
                    .or_else(|| {
                        cases
                            .iter()
                            .position(|c| matches!(c.value, SwitchValue::Default))
                    });
                let Some(start) = start else {
                    return Ok(Flow::Next);
                };
                for case in &cases[start..] {
                    match self.block(frame, &case.body)? {
                        Flow::Next if case.fall_through => {}
                        Flow::Next | Flow::Break => return Ok(Flow::Next),
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Next)
            }
            Statement::Loop {
                ref body,
                ref continuing,
                break_if,
            } => {
                for _ in 0..LOOP_LIMIT {
                    match self.block(frame, body)? {
                        Flow::Break => return Ok(Flow::Next),
                        Flow::Next | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                    match self.block(frame, continuing)? {
                        Flow::Next | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Next),
                        flow => return Ok(flow),
                    }
                    if let Some(cond) = break_if {
                        if self.eval(frame, cond)?.truthy()? {
                            return Ok(Flow::Next);
                        }
                    }
                }
                Err(format!("loop did not finish within {LOOP_LIMIT} iterations"))
            }
            Statement::Break => Ok(Flow::Break),
            Statement::Continue => Ok(Flow::Continue),
            Statement::Return { value } => {
                let value = value.map(|h| self.eval(frame, h)).transpose()?;
                Ok(Flow::Return(value))
            }
            Statement::Kill => Ok(Flow::Kill),
            Statement::Store { pointer, value } => {
                let Value::Pointer(place) = self.eval(frame, pointer)? else {
                    return Err("store through a non-pointer".into());
                };
                let value = self.eval(frame, value)?;
                self.store(&place, value)?;
                Ok(Flow::Next)
            }
            Statement::Call {
                function,
                ref arguments,
                result,
            } => {
                let args = arguments
                    .iter()
                    .map(|a| self.eval(frame, *a))
                    .collect::<Result<Vec<_>, _>>()?;
                let module = self.module;
                match self.call(&module.functions[function], args)? {
                    Outcome::Discarded => Ok(Flow::Kill),
                    Outcome::Returned(value) => {
                        if let Some(h) = result {
                            let value = value.ok_or("function returned no value")?;
                            frame.exprs[h.index()] = Some(value);
                        }
                        Ok(Flow::Next)
                    }
                }
            }
            ref other => Err(format!("unsupported statement: {other:?}")),
        }
    }

    /// Cached value of `h`, computing it on first use.
    fn eval(&mut self, frame: &mut Frame<'a>, h: Handle<Expression>) -> Result<Value, String> {
        if let Some(Some(v)) = frame.exprs.get(h.index()) {
            return Ok(v.clone());
        }
        let v = self.compute(frame, h)?;
        if let Some(slot) = frame.exprs.get_mut(h.index()) {
            *slot = Some(v.clone());
        }
        Ok(v)
    }

    fn eval_all(
        &mut self,
        frame: &mut Frame<'a>,
        handles: &[Handle<Expression>],
    ) -> Result<Vec<Value>, String> {
        handles.iter().map(|h| self.eval(frame, *h)).collect()
    }

    fn compute(&mut self, frame: &mut Frame<'a>, h: Handle<Expression>) -> Result<Value, String> {
        let module = self.module;
        let function = frame.function;
        match function.expressions[h] {
            Expression::Literal(ref lit) => literal(lit),
            Expression::Constant(c) => self.global_expr(module.constants[c].init),
            Expression::ZeroValue(ty) => zero(module, ty),
            Expression::Compose {
                ty,
                ref components,
            } => {
                let parts = self.eval_all(frame, components)?;
                compose(module, ty, parts)
            }
            Expression::Access { base, index } => {
                let index = self.eval(frame, index)?.single()?;
                if index < 0.0 {
                    return Err(format!("negative index {index}"));
                }
                access(self.eval(frame, base)?, index as usize)
            }
            Expression::AccessIndex { base, index } => {
                access(self.eval(frame, base)?, index as usize)
            }
            Expression::Splat { size, value } => {
                let value = self.eval(frame, value)?;
                let (kind, lanes) = value.lanes()?;
                let v = *lanes.first().ok_or("splat of an empty value")?;
                Ok(Value::from_lanes(kind, vec![v; size as usize]))
            }
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let vector = self.eval(frame, vector)?;
                let (kind, lanes) = vector.lanes()?;
                let picked = pattern[..size as usize]
                    .iter()
                    .map(|c| lanes.get(*c as usize).copied().ok_or("swizzle out of range"))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::from_lanes(kind, picked))
            }
            Expression::FunctionArgument(i) => frame
                .args
                .get(i as usize)
                .cloned()
                .ok_or_else(|| format!("missing argument {i}")),
            Expression::GlobalVariable(g) => {
                let var = &module.global_variables[g];
                match (var.space, &module.types[var.ty].inner) {
                    (AddressSpace::Handle, TypeInner::Image { .. }) => Ok(Value::Image(g)),
                    (AddressSpace::Handle, TypeInner::Sampler { .. }) => Ok(Value::Sampler),
                    (AddressSpace::Handle, other) => {
                        Err(format!("unsupported resource type {other:?}"))
                    }
                    _ => Ok(Value::Pointer(Place {
                        root: Root::Global(g),
                        path: Vec::new(),
                    })),
                }
            }
            Expression::LocalVariable(var) => Ok(Value::Pointer(Place {
                root: Root::Local {
                    frame: frame.depth,
                    var,
                },
                path: Vec::new(),
            })),
            Expression::Load { pointer } => match self.eval(frame, pointer)? {
                Value::Pointer(place) => self.load(&place),
                other => Err(format!("load through a non-pointer {other:?}")),
            },
            Expression::ImageSample {
                image,
                sampler,
                gather,
                coordinate,
                array_index,
                offset,
                depth_ref,
                ..
            } => {
                if gather.is_some() || array_index.is_some() || offset.is_some() {
                    return Err("unsupported texture sampling mode".into());
                }
                if depth_ref.is_some() {
                    return Err("depth comparison sampling is not supported".into());
                }
                let Value::Image(image) = self.eval(frame, image)? else {
                    return Err("sampling a non-image".into());
                };
                let Value::Sampler = self.eval(frame, sampler)? else {
                    return Err("sampling without a sampler".into());
                };
                let coordinate = self.eval(frame, coordinate)?;
                let (_, uv) = coordinate.lanes()?;
                let [u, v] = uv[..] else {
                    return Err(format!("expected 2D coordinates, found {}", uv.len()));
                };
                let texel = self.resources.sample(image, u, v);
                Ok(Value::from_lanes(Kind::Float, texel.map(f64::from)))
            }
            Expression::ImageQuery {
                image,
                query: ImageQuery::Size { .. },
            } => {
                let Value::Image(image) = self.eval(frame, image)? else {
                    return Err("querying a non-image".into());
                };
                let size = self.resources.texture_size(image);
                Ok(Value::from_lanes(Kind::Uint, size.map(f64::from)))
            }
            Expression::Unary { op, expr } => unary(op, self.eval(frame, expr)?),
            Expression::Binary { op, left, right } => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                binary(op, left, right)
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let condition = self.eval(frame, condition)?;
                let accept = self.eval(frame, accept)?;
                let reject = self.eval(frame, reject)?;
                select(&condition, accept, reject)
            }
            Expression::Relational { fun, argument } => {
                relational(fun, &self.eval(frame, argument)?)
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                let handles: Vec<_> = [Some(arg), arg1, arg2, arg3].into_iter().flatten().collect();
                let args = self.eval_all(frame, &handles)?;
                math(fun, &args)
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => cast(self.eval(frame, expr)?, Kind::of(kind), convert.is_some()),
            Expression::CallResult(_) => Err("call result read before the call".into()),
            ref other => Err(format!("unsupported expression: {other:?}")),
        }
    }

    /// Constant expressions live in the module-level arena.
    fn global_expr(&self, h: Handle<Expression>) -> Result<Value, String> {
        let module = self.module;
        match module.global_expressions[h] {
            Expression::Literal(ref lit) => literal(lit),
            Expression::Constant(c) => self.global_expr(module.constants[c].init),
            Expression::ZeroValue(ty) => zero(module, ty),
            Expression::Compose {
                ty,
                ref components,
            } => {
                let parts = components
                    .iter()
                    .map(|c| self.global_expr(*c))
                    .collect::<Result<Vec<_>, _>>()?;
                compose(module, ty, parts)
            }
            Expression::Splat { size, value } => {
                let value = self.global_expr(value)?;
                let (kind, lanes) = value.lanes()?;
                let v = *lanes.first().ok_or("splat of an empty value")?;
                Ok(Value::from_lanes(kind, vec![v; size as usize]))
            }
            Expression::AccessIndex { base, index } => {
                access(self.global_expr(base)?, index as usize)
            }
            ref other => Err(format!("unsupported constant expression: {other:?}")),
        }
    }

    fn global_value(&mut self, g: Handle<GlobalVariable>) -> Result<Value, String> {
        let module = self.module;
        let var = &module.global_variables[g];
        match var.space {
            AddressSpace::Uniform | AddressSpace::PushConstant => {
                let data = self
                    .resources
                    .uniform(g)
                    .ok_or_else(|| format!("uniform {:?} has no value", var.name))?;
                shape(module, var.ty, data)
            }
            AddressSpace::Private | AddressSpace::WorkGroup | AddressSpace::Function => {
                if let Some(v) = self.privates.get(&g) {
                    return Ok(v.clone());
                }
                let v = match var.init {
                    Some(init) => self.global_expr(init)?,
                    None => zero(module, var.ty)?,
                };
                self.privates.insert(g, v.clone());
                Ok(v)
            }
            other => Err(format!("unsupported address space {other:?}")),
        }
    }

    fn load(&mut self, place: &Place) -> Result<Value, String> {
        let root = match place.root {
            Root::Global(g) => self.global_value(g)?,
            Root::Local { frame, var } => self
                .locals
                .get(frame)
                .and_then(|f| f.get(var.index()))
                .cloned()
                .flatten()
                .ok_or("read of a dead local variable")?,
        };
        place.path.iter().try_fold(root, |v, i| access(v, *i))
    }

    fn store(&mut self, place: &Place, value: Value) -> Result<(), String> {
        let target = match place.root {
            Root::Global(g) => {
                let space = self.module.global_variables[g].space;
                if !matches!(
                    space,
                    AddressSpace::Private | AddressSpace::WorkGroup | AddressSpace::Function
                ) {
                    return Err(format!("store to read-only address space {space:?}"));
                }
                let current = self.global_value(g)?;
                self.privates.entry(g).or_insert(current)
            }
            Root::Local { frame, var } => self
                .locals
                .get_mut(frame)
                .and_then(|f| f.get_mut(var.index()))
                .and_then(Option::as_mut)
                .ok_or("write to a dead local variable")?,
        };
        write_at(target, &place.path, value)
    }
}

fn write_at(target: &mut Value, path: &[usize], value: Value) -> Result<(), String> {
    let Some((&i, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    match target {
        Value::Composite(items) => {
            let item = items.get_mut(i).ok_or("store index out of range")?;
            write_at(item, rest, value)
        }
        Value::Lanes { kind, lanes } if rest.is_empty() => {
            let v = value.single()?;
            let kind = *kind;
            let lane = lanes.get_mut(i).ok_or("store lane out of range")?;
            *lane = kind.normalize(v);
            Ok(())
        }
        _ => Err("invalid store target".into()),
    }
}

fn access(value: Value, i: usize) -> Result<Value, String> {
    match value {
        Value::Pointer(mut place) => {
            place.path.push(i);
            Ok(Value::Pointer(place))
        }
        Value::Lanes { kind, lanes } => lanes
            .get(i)
            .map(|v| Value::scalar(kind, *v))
            .ok_or_else(|| format!("lane {i} out of range")),
        Value::Composite(mut items) => {
            if i < items.len() {
                Ok(items.swap_remove(i))
            } else {
                Err(format!("index {i} out of range"))
            }
        }
        other => Err(format!("cannot index {other:?}")),
    }
}

fn literal(lit: &Literal) -> Result<Value, String> {
    Ok(match *lit {
        Literal::F64(v) | Literal::AbstractFloat(v) => Value::scalar(Kind::Float, v),
        Literal::F32(v) => Value::scalar(Kind::Float, v.into()),
        Literal::U32(v) => Value::scalar(Kind::Uint, v.into()),
        Literal::I32(v) => Value::scalar(Kind::Sint, v.into()),
        Literal::U64(v) => Value::scalar(Kind::Uint, v as f64),
        Literal::I64(v) | Literal::AbstractInt(v) => Value::scalar(Kind::Sint, v as f64),
        Literal::Bool(b) => Value::scalar(Kind::Bool, bool_lane(b)),
        ref other => return Err(format!("unsupported literal {other:?}")),
    })
}

/// Scalar kind and lane count of a scalar or vector type.
pub(crate) fn lane_shape(module: &Module, ty: Handle<Type>) -> Option<(Kind, usize)> {
    match module.types[ty].inner {
        TypeInner::Scalar(s) => Some((Kind::of(s.kind), 1)),
        TypeInner::Vector { size, scalar } => Some((Kind::of(scalar.kind), size as usize)),
        _ => None,
    }
}

pub(crate) fn zero(module: &Module, ty: Handle<Type>) -> Result<Value, String> {
    match module.types[ty].inner {
        TypeInner::Scalar(s) => Ok(Value::scalar(Kind::of(s.kind), 0.0)),
        TypeInner::Vector { size, scalar } => Ok(Value::from_lanes(
            Kind::of(scalar.kind),
            vec![0.0; size as usize],
        )),
        TypeInner::Matrix { columns, rows, .. } => Ok(Value::Composite(vec![
            Value::from_lanes(
                Kind::Float,
                vec![0.0; rows as usize]
            );
            columns as usize
        ])),
        TypeInner::Array {
            base,
            size: naga::ArraySize::Constant(n),
            ..
        } => Ok(Value::Composite(vec![zero(module, base)?; n.get() as usize])),
        TypeInner::Struct { ref members, .. } => members
            .iter()
            .map(|m| zero(module, m.ty))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite),
        ref other => Err(format!("no zero value for {other:?}")),
    }
}

fn compose(module: &Module, ty: Handle<Type>, parts: Vec<Value>) -> Result<Value, String> {
    match module.types[ty].inner {
        TypeInner::Scalar(_) | TypeInner::Vector { .. } => {
            let (kind, want) = lane_shape(module, ty).ok_or("bad vector type")?;
            let mut lanes = Vec::with_capacity(want);
            for part in &parts {
                lanes.extend_from_slice(part.lanes()?.1);
            }
            if lanes.len() != want {
                return Err(format!("composed {} lanes, expected {want}", lanes.len()));
            }
            Ok(Value::from_lanes(kind, lanes))
        }
        _ => Ok(Value::Composite(parts)),
    }
}

/// Lay uniform floats out as a value of type `ty`.
fn shape(module: &Module, ty: Handle<Type>, data: &[f32]) -> Result<Value, String> {
    let need = |n: usize| {
        data.get(..n)
            .ok_or_else(|| format!("uniform holds {} values, needs {n}", data.len()))
    };
    match module.types[ty].inner {
        TypeInner::Scalar(s) => Ok(Value::from_lanes(
            Kind::of(s.kind),
            need(1)?.iter().map(|v| f64::from(*v)),
        )),
        TypeInner::Vector { size, scalar } => Ok(Value::from_lanes(
            Kind::of(scalar.kind),
            need(size as usize)?.iter().map(|v| f64::from(*v)),
        )),
        TypeInner::Matrix { columns, rows, .. } => {
            let rows = rows as usize;
            let data = need(columns as usize * rows)?;
            Ok(Value::Composite(
                data.chunks_exact(rows)
                    .map(|col| Value::from_lanes(Kind::Float, col.iter().map(|v| f64::from(*v))))
                    .collect(),
            ))
        }
        ref other => Err(format!("unsupported uniform type {other:?}")),
    }
}

fn unary(op: UnaryOperator, value: Value) -> Result<Value, String> {
    if let Value::Composite(items) = value {
        return items
            .into_iter()
            .map(|v| unary(op, v))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite);
    }
    let (kind, lanes) = value.lanes()?;
    let f = |v: f64| match op {
        UnaryOperator::Negate => -v,
        UnaryOperator::LogicalNot => bool_lane(v == 0.0),
        UnaryOperator::BitwiseNot if kind == Kind::Bool => bool_lane(v == 0.0),
        UnaryOperator::BitwiseNot => !(v as i64) as f64,
    };
    Ok(Value::from_lanes(kind, lanes.iter().map(|v| f(*v))))
}

fn is_comparison(op: BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::Less
            | BinaryOperator::LessEqual
            | BinaryOperator::Greater
            | BinaryOperator::GreaterEqual
    )
}

fn scalar_op(op: BinaryOperator, kind: Kind, a: f64, b: f64) -> f64 {
    let int = |f: fn(i64, i64) -> i64| f(a as i64, b as i64) as f64;
    match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => match kind {
            Kind::Float => a / b,
            _ if b == 0.0 => 0.0,
            _ => (a / b).trunc(),
        },
        BinaryOperator::Modulo => match kind {
            Kind::Float => a % b,
            _ if b == 0.0 => 0.0,
            _ => a % b,
        },
        BinaryOperator::Equal => bool_lane(a == b),
        BinaryOperator::NotEqual => bool_lane(a != b),
        BinaryOperator::Less => bool_lane(a < b),
        BinaryOperator::LessEqual => bool_lane(a <= b),
        BinaryOperator::Greater => bool_lane(a > b),
        BinaryOperator::GreaterEqual => bool_lane(a >= b),
        BinaryOperator::And => int(|x, y| x & y),
        BinaryOperator::ExclusiveOr => int(|x, y| x ^ y),
        BinaryOperator::InclusiveOr => int(|x, y| x | y),
        BinaryOperator::LogicalAnd => bool_lane(a != 0.0 && b != 0.0),
        BinaryOperator::LogicalOr => bool_lane(a != 0.0 || b != 0.0),
        BinaryOperator::ShiftLeft => ((a as i64) << ((b as u32) & 31)) as f64,
        BinaryOperator::ShiftRight => match kind {
            Kind::Uint => ((a as i64 as u32) >> ((b as u32) & 31)) as f64,
            _ => ((a as i64 as i32) >> ((b as u32) & 31)) as f64,
        },
    }
}

fn lanewise(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, String> {
    let (kind, l) = left.lanes()?;
    let (_, r) = right.lanes()?;
    let n = l.len().max(r.len());
    if l.len() != r.len() && l.len() != 1 && r.len() != 1 {
        return Err(format!("{op:?} on {} and {} lanes", l.len(), r.len()));
    }
    let at = |s: &[f64], i: usize| if s.len() == 1 { s[0] } else { s[i] };
    let out_kind = if is_comparison(op) { Kind::Bool } else { kind };
    Ok(Value::from_lanes(
        out_kind,
        (0..n).map(|i| scalar_op(op, kind, at(l, i), at(r, i))),
    ))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Columns of a matrix as lane slices.
fn columns(items: &[Value]) -> Result<Vec<&[f64]>, String> {
    items.iter().map(|c| c.lanes().map(|(_, l)| l)).collect()
}

fn mat_vec(cols: &[&[f64]], v: &[f64]) -> Result<Value, String> {
    if cols.len() != v.len() {
        return Err("matrix and vector sizes differ".into());
    }
    let rows = cols.first().map_or(0, |c| c.len());
    Ok(Value::from_lanes(
        Kind::Float,
        (0..rows).map(|r| cols.iter().zip(v).map(|(c, x)| c[r] * x).sum()),
    ))
}

fn binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, String> {
    let multiply = matches!(op, BinaryOperator::Multiply);
    match (&left, &right) {
        (Value::Composite(m), Value::Composite(n)) if multiply => {
            let cols = columns(m)?;
            columns(n)?
                .into_iter()
                .map(|c| mat_vec(&cols, c))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Composite)
        }
        (Value::Composite(m), Value::Lanes { lanes, .. }) if multiply && lanes.len() > 1 => {
            mat_vec(&columns(m)?, lanes)
        }
        (Value::Lanes { lanes, .. }, Value::Composite(m)) if multiply && lanes.len() > 1 => {
            Ok(Value::from_lanes(
                Kind::Float,
                columns(m)?.into_iter().map(|c| dot(lanes, c)),
            ))
        }
        (Value::Composite(a), Value::Composite(b)) => a
            .iter()
            .zip(b)
            .map(|(x, y)| lanewise(op, x, y))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite),
        (Value::Composite(a), scalar @ Value::Lanes { .. }) => a
            .iter()
            .map(|x| lanewise(op, x, scalar))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite),
        (scalar @ Value::Lanes { .. }, Value::Composite(b)) => b
            .iter()
            .map(|y| lanewise(op, scalar, y))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite),
        _ => lanewise(op, &left, &right),
    }
}

fn select(condition: &Value, accept: Value, reject: Value) -> Result<Value, String> {
    let (_, cond) = condition.lanes()?;
    if let [c] = cond {
        return Ok(if *c != 0.0 { accept } else { reject });
    }
    let (kind, a) = accept.lanes()?;
    let (_, r) = reject.lanes()?;
    Ok(Value::from_lanes(
        kind,
        cond.iter()
            .zip(a.iter().zip(r))
            .map(|(c, (a, r))| if *c != 0.0 { *a } else { *r }),
    ))
}

fn relational(fun: RelationalFunction, value: &Value) -> Result<Value, String> {
    let (_, lanes) = value.lanes()?;
    Ok(match fun {
        RelationalFunction::All => {
            Value::scalar(Kind::Bool, bool_lane(lanes.iter().all(|v| *v != 0.0)))
        }
        RelationalFunction::Any => {
            Value::scalar(Kind::Bool, bool_lane(lanes.iter().any(|v| *v != 0.0)))
        }
        RelationalFunction::IsNan => {
            Value::from_lanes(Kind::Bool, lanes.iter().map(|v| bool_lane(v.is_nan())))
        }
        RelationalFunction::IsInf => {
            Value::from_lanes(Kind::Bool, lanes.iter().map(|v| bool_lane(v.is_infinite())))
        }
    })
}

fn map_lanes(args: &[Value], f: impl Fn(&[f64]) -> f64) -> Result<Value, String> {
    let lanes = args
        .iter()
        .map(|a| a.lanes().map(|(_, l)| l))
        .collect::<Result<Vec<_>, _>>()?;
    let kind = args.first().ok_or("math function without arguments")?.lanes()?.0;
    let n = lanes.iter().map(|l| l.len()).max().unwrap_or(0);
    if lanes.iter().any(|l| l.len() != n && l.len() != 1) {
        return Err("math function arguments differ in size".into());
    }
    let mut row = vec![0.0; lanes.len()];
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        for (slot, l) in row.iter_mut().zip(&lanes) {
            *slot = if l.len() == 1 { l[0] } else { l[i] };
        }
        out.push(f(&row));
    }
    Ok(Value::from_lanes(kind, out))
}

fn arg_lanes(fun: MathFunction, args: &[Value], i: usize) -> Result<&[f64], String> {
    args.get(i)
        .ok_or_else(|| format!("{fun:?}: missing argument {i}"))?
        .lanes()
        .map(|(_, l)| l)
}

fn math(fun: MathFunction, args: &[Value]) -> Result<Value, String> {
    use MathFunction as Mf;
    let unary = |f: fn(f64) -> f64| map_lanes(args, |x| f(x[0]));
    let arg = |i: usize| arg_lanes(fun, args, i);
    let length = |v: &[f64]| dot(v, v).sqrt();
    match fun {
        Mf::Abs => unary(f64::abs),
        Mf::Min => map_lanes(args, |x| x[0].min(x[1])),
        Mf::Max => map_lanes(args, |x| x[0].max(x[1])),
        Mf::Clamp => map_lanes(args, |x| x[0].max(x[1]).min(x[2])),
        Mf::Saturate => unary(|x| x.clamp(0.0, 1.0)),
        Mf::Cos => unary(f64::cos),
        Mf::Cosh => unary(f64::cosh),
        Mf::Sin => unary(f64::sin),
        Mf::Sinh => unary(f64::sinh),
        Mf::Tan => unary(f64::tan),
        Mf::Tanh => unary(f64::tanh),
        Mf::Acos => unary(f64::acos),
        Mf::Asin => unary(f64::asin),
        Mf::Atan => unary(f64::atan),
        Mf::Atan2 => map_lanes(args, |x| x[0].atan2(x[1])),
        Mf::Radians => unary(f64::to_radians),
        Mf::Degrees => unary(f64::to_degrees),
        Mf::Ceil => unary(f64::ceil),
        Mf::Floor => unary(f64::floor),
        Mf::Round => unary(f64::round_ties_even),
        Mf::Fract => unary(|x| x - x.floor()),
        Mf::Trunc => unary(f64::trunc),
        Mf::Exp => unary(f64::exp),
        Mf::Exp2 => unary(f64::exp2),
        Mf::Log => unary(f64::ln),
        Mf::Log2 => unary(f64::log2),
        Mf::Pow => map_lanes(args, |x| x[0].powf(x[1])),
        Mf::Sqrt => unary(f64::sqrt),
        Mf::InverseSqrt => unary(|x| 1.0 / x.sqrt()),
        Mf::Sign => unary(|x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        Mf::Fma => map_lanes(args, |x| x[0] * x[1] + x[2]),
        Mf::Mix => map_lanes(args, |x| x[0] * (1.0 - x[2]) + x[1] * x[2]),
        Mf::Step => map_lanes(args, |x| bool_lane(x[1] >= x[0])),
        Mf::SmoothStep => map_lanes(args, |x| {
            let t = ((x[2] - x[0]) / (x[1] - x[0])).clamp(0.0, 1.0);
            t * t * (3.0 - 2.0 * t)
        }),
        Mf::Dot => Ok(Value::scalar(Kind::Float, dot(arg(0)?, arg(1)?))),
        Mf::Length => Ok(Value::scalar(Kind::Float, length(arg(0)?))),
        Mf::Distance => {
            let (a, b) = (arg(0)?, arg(1)?);
            let diff: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
            Ok(Value::scalar(Kind::Float, length(&diff)))
        }
        Mf::Normalize => {
            let v = arg(0)?;
            let len = length(v);
            Ok(Value::from_lanes(Kind::Float, v.iter().map(|x| x / len)))
        }
        Mf::Cross => match (arg(0)?, arg(1)?) {
            ([ax, ay, az], [bx, by, bz]) => Ok(Value::from_lanes(
                Kind::Float,
                [ay * bz - az * by, az * bx - ax * bz, ax * by - ay * bx],
            )),
            _ => Err("cross needs two 3-component vectors".into()),
        },
        Mf::Reflect => {
            let (i, n) = (arg(0)?, arg(1)?);
            let d = dot(n, i);
            Ok(Value::from_lanes(
                Kind::Float,
                i.iter().zip(n).map(|(i, n)| i - 2.0 * d * n),
            ))
        }
        other => Err(format!("unsupported math function {other:?}")),
    }
}

fn cast(value: Value, to: Kind, convert: bool) -> Result<Value, String> {
    if let Value::Composite(items) = value {
        return items
            .into_iter()
            .map(|v| cast(v, to, convert))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Composite);
    }
    let (from, lanes) = value.lanes()?;
    let f = |v: f64| match (from, to, convert) {
        (_, Kind::Bool, true) => bool_lane(v != 0.0),
        (Kind::Float, Kind::Sint | Kind::Uint, true) => v.trunc(),
        (_, _, true) => v,
        (Kind::Float, Kind::Uint, false) => f64::from((v as f32).to_bits()),
        (Kind::Float, Kind::Sint, false) => f64::from((v as f32).to_bits() as i32),
        (Kind::Uint | Kind::Sint, Kind::Float, false) => {
            f64::from(f32::from_bits(v as i64 as u32))
        }
        (_, _, false) => v,
    };
    Ok(Value::from_lanes(to, lanes.iter().map(|v| f(*v))))
}

/// Blend per-vertex values with barycentric weights; non-numeric values take the last vertex.
pub(crate) fn interpolate(values: [&Value; 3], weights: [f64; 3]) -> Value {
    match values {
        [
            Value::Lanes { kind, lanes: a },
            Value::Lanes { lanes: b, .. },
            Value::Lanes { lanes: c, .. },
        ] if *kind == Kind::Float && a.len() == b.len() && b.len() == c.len() =>
        {
            Value::from_lanes(
                Kind::Float,
                (0..a.len()).map(|i| a[i] * weights[0] + b[i] * weights[1] + c[i] * weights[2]),
            )
        }
        [Value::Composite(a), Value::Composite(b), Value::Composite(c)]
            if a.len() == b.len() && b.len() == c.len() =>
        {
            Value::Composite(
                (0..a.len())
                    .map(|i| interpolate([&a[i], &b[i], &c[i]], weights))
                    .collect(),
            )
        }
        [_, _, last] => last.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::glsl::compile;
    use naga::ShaderStage;

    struct NoResources;

    impl Resources for NoResources {
        fn uniform(&self, _: Handle<GlobalVariable>) -> Option<&[f32]> {
            None
        }

        fn sample(&self, _: Handle<GlobalVariable>, _: f64, _: f64) -> [f32; 4] {
            [0.0, 0.0, 0.0, 1.0]
        }

        fn texture_size(&self, _: Handle<GlobalVariable>) -> [u32; 2] {
            [0, 0]
        }
    }

    /// Run a fragment shader with no inputs and return `o`.
    fn run_fragment(body: &str) -> Option<Vec<f64>> {
        let src = format!("#version 330 core\nout vec4 o;\n{body}\n");
        let stage = compile(&src, ShaderStage::Fragment).expect("compiles");
        let mut inv = Invocation::new(&stage.module, &NoResources);
        match inv.run_entry(Vec::new()).expect("runs") {
            Outcome::Returned(Some(Value::Composite(members))) => members[0].flatten(),
            Outcome::Returned(_) => panic!("no outputs"),
            Outcome::Discarded => None,
        }
    }

    #[test]
    fn arithmetic_and_swizzles() {
        let o = run_fragment("void main() { vec3 c = vec3(0.25, 0.5, 1.0); o = vec4(c.zyx * 0.5, 1.0 - c.x); }");
        assert_eq!(o, Some(vec![0.5, 0.25, 0.125, 0.75]));
    }

    #[test]
    fn control_flow_and_helpers() {
        let o = run_fragment(
            "float twice(float x) { return x * 2.0; }\n\
             void main() {\n\
               float acc = 0.0;\n\
               for (int i = 0; i < 4; i++) { if (i == 2) { continue; } acc += 0.125; }\n\
               o = vec4(acc, twice(0.25), clamp(3.0, 0.0, 1.0), mix(0.0, 1.0, 0.25));\n\
             }",
        );
        assert_eq!(o, Some(vec![0.375, 0.5, 1.0, 0.25]));
    }

    #[test]
    fn matrices_multiply_column_major() {
        let o = run_fragment(
            "void main() { mat2 m = mat2(1.0, 2.0, 3.0, 4.0); vec2 v = m * vec2(1.0, 1.0); o = vec4(v, 0.0, 1.0); }",
        );
        assert_eq!(o, Some(vec![4.0, 6.0, 0.0, 1.0]));
    }

    #[test]
    fn discard_ends_the_invocation() {
        assert_eq!(run_fragment("void main() { o = vec4(1.0); discard; }"), None);
    }

    #[test]
    fn float_results_round_to_single_precision() {
        let v = Value::scalar(Kind::Float, 0.1);
        assert_eq!(v.flatten(), Some(vec![0.1f32 as f64]));
    }

    #[test]
    fn interpolation_blends_float_lanes() {
        let a = Value::from_lanes(Kind::Float, [0.0, 1.0]);
        let b = Value::from_lanes(Kind::Float, [1.0, 1.0]);
        let c = Value::from_lanes(Kind::Float, [0.0, 0.0]);
        let out = interpolate([&a, &b, &c], [0.25, 0.5, 0.25]);
        assert_eq!(out.flatten(), Some(vec![0.5, 0.75]));
    }
}
