//! CPU reference backend.
//!
//! `SoftGl` implements [`GlBackend`] without a driver so the pipeline can run headless
//! (tests, CI, machines without GL):
//!
//! - compiling parses the GLSL with naga and validates the module; the info log carries
//!   `0:LINE: error: ...` lines. Uniforms and attributes the shader never reads are inactive,
//!   as on real drivers
//! - linking checks that every fragment input is written by the vertex stage
//! - drawing interprets both stages per vertex and per fragment: the vertex stage's
//!   `gl_Position` goes through the viewport, varyings are interpolated perspective-correct
//!   and the fragment's location-0 output is clamped to [0,1] and stored as RGBA8
//!
//! Object lifetimes are tracked so tests can check that teardown releases everything.

mod eval;
mod glsl;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use naga::{Binding, BuiltIn, GlobalVariable, Handle, Interpolation, ShaderStage, TypeInner};

use self::eval::{Invocation, Kind, Outcome, Resources, Value};
use self::glsl::CompiledStage;
use crate::backend::GlBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftShader(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftProgram(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftBuffer(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftVertexArray(u32);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftTexture(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftUniformLocation {
    program: u32,
    name: String,
}

// -------------------------------------------------------------------------------------------------
// Objects
// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct ShaderObj {
    vertex: bool,
    source: String,
    compiled: Option<Rc<CompiledStage>>,
    log: String,
}

#[derive(Debug, Default)]
struct ProgramObj {
    attached: Vec<u32>,
    linked: bool,
    log: String,
    uniforms: BTreeMap<String, Vec<f32>>,
    attributes: HashMap<String, u32>,
    /// (vertex, fragment) of the last successful link.
    stages: Option<(Rc<CompiledStage>, Rc<CompiledStage>)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct AttribPointer {
    enabled: bool,
    buffer: Option<u32>,
    size: i32,
    stride: i32,
    offset: i32,
}

#[derive(Debug, Default)]
struct VertexArrayObj {
    attribs: HashMap<u32, AttribPointer>,
}

#[derive(Debug, Default)]
struct TextureObj {
    w: i32,
    h: i32,
    texels: Vec<u8>,
    params: HashMap<u32, i32>,
}

fn wrap(i: i64, n: i64, mode: Option<i32>) -> i64 {
    match mode.map(|m| m as u32) {
        Some(glow::CLAMP_TO_EDGE) => i.clamp(0, n - 1),
        Some(glow::MIRRORED_REPEAT) => {
            let p = i.rem_euclid(2 * n);
            if p < n {
                p
            } else {
                2 * n - 1 - p
            }
        }
        _ => i.rem_euclid(n),
    }
}

impl TextureObj {
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let (w, h) = (i64::from(self.w), i64::from(self.h));
        let x = wrap(x, w, self.params.get(&glow::TEXTURE_WRAP_S).copied());
        let y = wrap(y, h, self.params.get(&glow::TEXTURE_WRAP_T).copied());
        let i = ((y * w + x) * 4) as usize;
        match self.texels.get(i..i + 4) {
            Some(px) => [px[0], px[1], px[2], px[3]].map(|c| c as f32 / 255.0),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Nearest sampling unless the magnification filter is `LINEAR`.
    fn sample(&self, u: f64, v: f64) -> [f32; 4] {
        if self.w <= 0 || self.h <= 0 || self.texels.is_empty() {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let x = u * f64::from(self.w);
        let y = v * f64::from(self.h);
        if self.params.get(&glow::TEXTURE_MAG_FILTER).copied() != Some(glow::LINEAR as i32) {
            return self.texel(x.floor() as i64, y.floor() as i64);
        }
        let (x, y) = (x - 0.5, y - 0.5);
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let [a, b, c, d] = [
            self.texel(x0, y0),
            self.texel(x0 + 1, y0),
            self.texel(x0, y0 + 1),
            self.texel(x0 + 1, y0 + 1),
        ];
        std::array::from_fn(|i| {
            let top = a[i] * (1.0 - fx) + b[i] * fx;
            let bottom = c[i] * (1.0 - fx) + d[i] * fx;
            top * (1.0 - fy) + bottom * fy
        })
    }
}

/// One shaded vertex: window position, clip w, and varyings by name.
struct ShadedVertex {
    window: [f64; 3],
    w: f64,
    varyings: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct SoftState {
    next_id: u32,
    object_limit: Option<usize>,

    shaders: HashMap<u32, ShaderObj>,
    programs: HashMap<u32, ProgramObj>,
    buffers: HashMap<u32, Vec<u8>>,
    vertex_arrays: HashMap<u32, VertexArrayObj>,
    textures: HashMap<u32, TextureObj>,

    current_program: Option<u32>,
    bound_array_buffer: Option<u32>,
    /// 0 is the default vertex array.
    bound_vertex_array: u32,
    default_vertex_array: VertexArrayObj,
    active_unit: u32,
    bound_textures: HashMap<u32, u32>,
    pixel_store: HashMap<u32, i32>,

    viewport: (i32, i32, i32, i32),
    fb_size: (i32, i32),
    framebuffer: Vec<u8>,
    clear_color: [f32; 4],

    draws: Vec<(u32, i32, i32)>,
    errors: Vec<String>,
}

/// What one stage of the current program reads while it runs.
struct StageResources<'s> {
    state: &'s SoftState,
    stage: &'s CompiledStage,
    uniforms: &'s BTreeMap<String, Vec<f32>>,
}

impl StageResources<'_> {
    fn texture(&self, image: Handle<GlobalVariable>) -> Option<&TextureObj> {
        let unit = self.uniform(image)?.first().copied()? as u32;
        let id = self.state.bound_textures.get(&unit)?;
        self.state.textures.get(id)
    }
}

impl Resources for StageResources<'_> {
    fn uniform(&self, global: Handle<GlobalVariable>) -> Option<&[f32]> {
        let name = self.stage.uniform_name(global)?;
        self.uniforms.get(name).map(Vec::as_slice)
    }

    fn sample(&self, image: Handle<GlobalVariable>, u: f64, v: f64) -> [f32; 4] {
        self.texture(image)
            .map_or([0.0, 0.0, 0.0, 1.0], |t| t.sample(u, v))
    }

    fn texture_size(&self, image: Handle<GlobalVariable>) -> [u32; 2] {
        self.texture(image)
            .map_or([0, 0], |t| [t.w.max(0) as u32, t.h.max(0) as u32])
    }
}

/// The entry point's outputs as (binding, member name, value).
fn entry_outputs(stage: &CompiledStage, value: Value) -> Vec<(Binding, Option<String>, Value)> {
    let module = &stage.module;
    let Some(result) = stage.entry().and_then(|ep| ep.function.result.as_ref()) else {
        return Vec::new();
    };
    if let Some(binding) = &result.binding {
        return vec![(binding.clone(), None, value)];
    }
    match (&module.types[result.ty].inner, value) {
        (TypeInner::Struct { members, .. }, Value::Composite(values)) => members
            .iter()
            .zip(values)
            .filter_map(|(m, v)| Some((m.binding.clone()?, m.name.clone(), v)))
            .collect(),
        _ => Vec::new(),
    }
}

impl SoftState {
    fn live_objects(&self) -> usize {
        self.shaders.len()
            + self.programs.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
            + self.textures.len()
    }

    fn alloc_id(&mut self, what: &str) -> Result<u32, String> {
        if let Some(limit) = self.object_limit {
            if self.live_objects() >= limit {
                return Err(format!("{what}: out of memory"));
            }
        }
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn vao_mut(&mut self) -> &mut VertexArrayObj {
        let id = self.bound_vertex_array;
        if id == 0 {
            return &mut self.default_vertex_array;
        }
        self.vertex_arrays.entry(id).or_default()
    }

    fn vao(&self) -> Option<&VertexArrayObj> {
        if self.bound_vertex_array == 0 {
            Some(&self.default_vertex_array)
        } else {
            self.vertex_arrays.get(&self.bound_vertex_array)
        }
    }

    fn bound_texture(&self) -> Option<u32> {
        self.bound_textures.get(&self.active_unit).copied()
    }

    fn set_uniform(&mut self, loc: Option<&SoftUniformLocation>, values: &[f32]) {
        let Some(loc) = loc else { return };
        if self.current_program != Some(loc.program) {
            self.errors
                .push(format!("uniform '{}' set while its program is not in use", loc.name));
            return;
        }
        if let Some(slot) = self
            .programs
            .get_mut(&loc.program)
            .and_then(|p| p.uniforms.get_mut(&loc.name))
        {
            for (dst, src) in slot.iter_mut().zip(values) {
                *dst = *src;
            }
        }
    }

    fn link(&mut self, program: u32) {
        let Some(prog) = self.programs.get(&program) else {
            return;
        };
        let mut vs: Option<Rc<CompiledStage>> = None;
        let mut fs: Option<Rc<CompiledStage>> = None;
        let mut log = String::new();
        for id in &prog.attached {
            match self.shaders.get(id) {
                Some(ShaderObj {
                    vertex,
                    compiled: Some(stage),
                    ..
                }) => {
                    if *vertex {
                        vs = Some(Rc::clone(stage));
                    } else {
                        fs = Some(Rc::clone(stage));
                    }
                }
                _ => log.push_str("error: attached shader is not compiled\n"),
            }
        }

        let (Some(vs), Some(fs)) = (vs, fs) else {
            log.push_str("error: program needs one vertex and one fragment shader\n");
            if let Some(p) = self.programs.get_mut(&program) {
                p.linked = false;
                p.log = log;
            }
            return;
        };

        for input in &fs.inputs {
            if !vs.outputs.contains(&input.name) {
                log.push_str(&format!(
                    "error: fragment input '{}' is not written by the vertex stage\n",
                    input.name
                ));
            }
        }

        let mut uniforms: BTreeMap<String, Vec<f32>> = BTreeMap::new();
        for u in vs.uniforms.iter().chain(&fs.uniforms).filter(|u| u.active) {
            let slot = uniforms.entry(u.name.clone()).or_default();
            if slot.len() < u.components {
                slot.resize(u.components, 0.0);
            }
        }

        let attributes = vs
            .inputs
            .iter()
            .filter(|i| i.active)
            .map(|i| (i.name.clone(), i.location))
            .collect();

        let ok = log.is_empty();
        if let Some(p) = self.programs.get_mut(&program) {
            p.linked = ok;
            p.log = log;
            if ok {
                p.uniforms = uniforms;
                p.attributes = attributes;
                p.stages = Some((vs, fs));
            }
        }
    }

    /// Attribute `location` of vertex `vertex` widened to `lanes` with the (0, 0, 0, 1) default.
    fn fetch_attrib(
        &self,
        vao: &VertexArrayObj,
        location: u32,
        vertex: i32,
        lanes: usize,
    ) -> Vec<f64> {
        let mut out = [0.0, 0.0, 0.0, 1.0];
        let ptr = vao.attribs.get(&location).filter(|p| p.enabled);
        if let Some((ptr, data)) = ptr.and_then(|p| Some((p, self.buffers.get(&p.buffer?)?))) {
            let stride = if ptr.stride == 0 {
                ptr.size * 4
            } else {
                ptr.stride
            };
            let base = (ptr.offset + vertex * stride) as usize;
            for (i, slot) in out.iter_mut().enumerate().take(ptr.size.clamp(0, 4) as usize) {
                let at = base + i * 4;
                *slot = data
                    .get(at..at + 4)
                    .and_then(|b| b.try_into().ok())
                    .map(|b: [u8; 4]| f64::from(f32::from_ne_bytes(b)))
                    .unwrap_or(0.0);
            }
        }
        out[..lanes.min(4)].to_vec()
    }

    fn shade_vertex(
        &self,
        vao: &VertexArrayObj,
        stage: &CompiledStage,
        uniforms: &BTreeMap<String, Vec<f32>>,
        vertex: i32,
    ) -> Result<ShadedVertex, String> {
        let module = &stage.module;
        let ep = stage.entry().ok_or("vertex stage has no entry point")?;
        let mut args = Vec::with_capacity(ep.function.arguments.len());
        for arg in &ep.function.arguments {
            let value = match arg.binding {
                Some(Binding::Location { location, .. }) => {
                    let (kind, lanes) = eval::lane_shape(module, arg.ty)
                        .ok_or("vertex attribute of non-vector type")?;
                    Value::from_lanes(kind, self.fetch_attrib(vao, location, vertex, lanes))
                }
                Some(Binding::BuiltIn(BuiltIn::VertexIndex)) => {
                    Value::scalar(Kind::Uint, f64::from(vertex))
                }
                _ => eval::zero(module, arg.ty)?,
            };
            args.push(value);
        }

        let resources = StageResources {
            state: self,
            stage,
            uniforms,
        };
        let outcome = Invocation::new(module, &resources).run_entry(args)?;
        let Outcome::Returned(Some(result)) = outcome else {
            return Err("vertex stage produced no outputs".into());
        };

        let mut clip = [0.0, 0.0, 0.0, 1.0];
        let mut varyings = HashMap::new();
        for (binding, name, value) in entry_outputs(stage, result) {
            match (binding, name) {
                (Binding::BuiltIn(BuiltIn::Position { .. }), _) => {
                    let lanes = value.flatten().ok_or("gl_Position is not a vector")?;
                    for (slot, v) in clip.iter_mut().zip(lanes) {
                        *slot = v;
                    }
                }
                (Binding::Location { .. }, Some(name)) => {
                    varyings.insert(name, value);
                }
                _ => {}
            }
        }

        let (vx, vy, vw, vh) = self.viewport;
        let w = clip[3];
        let ndc = [clip[0] / w, clip[1] / w, clip[2] / w];
        Ok(ShadedVertex {
            window: [
                f64::from(vx) + (ndc[0] + 1.0) * 0.5 * f64::from(vw),
                f64::from(vy) + (ndc[1] + 1.0) * 0.5 * f64::from(vh),
                ndc[2] * 0.5 + 0.5,
            ],
            w,
            varyings,
        })
    }

    /// Shade one fragment; `None` when it is discarded.
    fn shade_fragment(
        &self,
        stage: &CompiledStage,
        uniforms: &BTreeMap<String, Vec<f32>>,
        tri: [&ShadedVertex; 3],
        screen: [f64; 3],
        frag_coord: [f64; 2],
        front_facing: bool,
    ) -> Result<Option<[u8; 4]>, String> {
        let module = &stage.module;
        let ep = stage.entry().ok_or("fragment stage has no entry point")?;

        let inv_w = screen
            .iter()
            .zip(&tri)
            .map(|(s, v)| s / v.w)
            .sum::<f64>();
        let perspective: [f64; 3] = std::array::from_fn(|i| screen[i] / tri[i].w / inv_w);
        let depth: f64 = screen.iter().zip(&tri).map(|(s, v)| s * v.window[2]).sum();

        let mut args = Vec::with_capacity(ep.function.arguments.len());
        for arg in &ep.function.arguments {
            let value = match (&arg.binding, &arg.name) {
                (Some(Binding::Location { interpolation, .. }), Some(name)) => {
                    match tri.map(|v| v.varyings.get(name)) {
                        [Some(a), Some(b), Some(c)] => {
                            let weights = match interpolation {
                                Some(Interpolation::Flat) => [0.0, 0.0, 1.0],
                                Some(Interpolation::Linear) => screen,
                                _ => perspective,
                            };
                            eval::interpolate([a, b, c], weights)
                        }
                        _ => eval::zero(module, arg.ty)?,
                    }
                }
                (Some(Binding::BuiltIn(BuiltIn::Position { .. })), _) => Value::from_lanes(
                    Kind::Float,
                    [frag_coord[0], frag_coord[1], depth, inv_w],
                ),
                (Some(Binding::BuiltIn(BuiltIn::FrontFacing)), _) => {
                    Value::scalar(Kind::Bool, if front_facing { 1.0 } else { 0.0 })
                }
                _ => eval::zero(module, arg.ty)?,
            };
            args.push(value);
        }

        let resources = StageResources {
            state: self,
            stage,
            uniforms,
        };
        let result = match Invocation::new(module, &resources).run_entry(args)? {
            Outcome::Discarded => return Ok(None),
            Outcome::Returned(None) => return Ok(Some([0, 0, 0, 255])),
            Outcome::Returned(Some(result)) => result,
        };
        let color = entry_outputs(stage, result)
            .into_iter()
            .find(|(b, _, _)| matches!(b, Binding::Location { location: 0, .. }))
            .and_then(|(_, _, v)| v.flatten());
        let Some(lanes) = color else {
            return Ok(Some([0, 0, 0, 255]));
        };
        let mut rgba = [0.0, 0.0, 0.0, 1.0];
        for (slot, v) in rgba.iter_mut().zip(lanes) {
            *slot = v;
        }
        Ok(Some(rgba.map(|c| ((c as f32).clamp(0.0, 1.0) * 255.0).round() as u8)))
    }

    /// Framebuffer writes for a `TRIANGLES` draw of the current program.
    fn rasterize(&self, first: i32, count: i32) -> Result<Vec<(usize, [u8; 4])>, String> {
        let prog = self
            .current_program
            .and_then(|p| self.programs.get(&p))
            .ok_or("draw_arrays without a program in use")?;
        let (vs, fs) = match (&prog.stages, prog.linked) {
            (Some(stages), true) => stages,
            _ => return Err("draw_arrays with an unlinked program".into()),
        };
        let Some(vao) = self.vao() else {
            return Ok(Vec::new());
        };

        let verts = (first..first + count.max(0))
            .map(|n| self.shade_vertex(vao, vs, &prog.uniforms, n))
            .collect::<Result<Vec<_>, _>>()?;

        let (fw, fh) = self.fb_size;
        let mut writes = Vec::new();
        for tri in verts.chunks_exact(3) {
            let tri = [&tri[0], &tri[1], &tri[2]];
            if tri
                .iter()
                .any(|v| v.w.is_nan() || v.w <= 0.0 || v.window.iter().any(|c| !c.is_finite()))
            {
                continue;
            }
            let [a, b, c] = tri.map(|v| [v.window[0], v.window[1]]);
            let edge = |p: [f64; 2], q: [f64; 2], r: [f64; 2]| {
                (q[0] - p[0]) * (r[1] - p[1]) - (q[1] - p[1]) * (r[0] - p[0])
            };
            let area = edge(a, b, c);
            if area.abs() < 1e-12 {
                continue;
            }
            let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as i32;
            let max_x = (a[0].max(b[0]).max(c[0]).ceil() as i32).min(fw);
            let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as i32;
            let max_y = (a[1].max(b[1]).max(c[1]).ceil() as i32).min(fh);

            for py in min_y..max_y {
                for px in min_x..max_x {
                    let p = [f64::from(px) + 0.5, f64::from(py) + 0.5];
                    let screen = [
                        edge(b, c, p) / area,
                        edge(c, a, p) / area,
                        edge(a, b, p) / area,
                    ];
                    if screen.iter().any(|w| *w < -1e-9) {
                        continue;
                    }
                    if let Some(rgba) =
                        self.shade_fragment(fs, &prog.uniforms, tri, screen, p, area > 0.0)?
                    {
                        writes.push((((py * fw + px) * 4) as usize, rgba));
                    }
                }
            }
        }
        Ok(writes)
    }

    fn draw_triangles(&mut self, first: i32, count: i32) {
        match self.rasterize(first, count) {
            Ok(writes) => {
                for (i, px) in writes {
                    if let Some(dst) = self.framebuffer.get_mut(i..i + 4) {
                        dst.copy_from_slice(&px);
                    }
                }
            }
            Err(e) => self.errors.push(e),
        }
    }
}

/// Headless [`GlBackend`]; see the module docs for what it does and does not emulate.
#[derive(Debug, Default)]
pub struct SoftGl {
    state: RefCell<SoftState>,
}

impl SoftGl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make object creation fail once `limit` objects are alive.
    pub fn set_object_limit(&self, limit: Option<usize>) {
        self.state.borrow_mut().object_limit = limit;
    }

    pub fn live_shader_count(&self) -> usize {
        self.state.borrow().shaders.len()
    }

    pub fn live_program_count(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_vertex_array_count(&self) -> usize {
        self.state.borrow().vertex_arrays.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn is_program(&self, program: SoftProgram) -> bool {
        self.state.borrow().programs.contains_key(&program.0)
    }

    /// Contents of a buffer as floats.
    pub fn buffer_f32(&self, buffer: SoftBuffer) -> Option<Vec<f32>> {
        let st = self.state.borrow();
        let bytes = st.buffers.get(&buffer.0)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    pub fn texture_parameter(&self, texture: SoftTexture, parameter: u32) -> Option<i32> {
        let st = self.state.borrow();
        st.textures.get(&texture.0)?.params.get(&parameter).copied()
    }

    pub fn texture_texels(&self, texture: SoftTexture) -> Option<Vec<u8>> {
        let st = self.state.borrow();
        st.textures.get(&texture.0).map(|t| t.texels.clone())
    }

    /// Current value of an active uniform (zeros until written).
    pub fn uniform_value(&self, program: SoftProgram, name: &str) -> Option<Vec<f32>> {
        let st = self.state.borrow();
        st.programs.get(&program.0)?.uniforms.get(name).cloned()
    }

    pub fn draw_call_count(&self) -> usize {
        self.state.borrow().draws.len()
    }

    /// (mode, first, count) of the most recent draw call.
    pub fn last_draw(&self) -> Option<(u32, i32, i32)> {
        self.state.borrow().draws.last().copied()
    }

    /// Invalid operations observed so far (what `glGetError` would have reported).
    pub fn errors(&self) -> Vec<String> {
        self.state.borrow().errors.clone()
    }
}

impl GlBackend for SoftGl {
    type Shader = SoftShader;
    type Program = SoftProgram;
    type Buffer = SoftBuffer;
    type VertexArray = SoftVertexArray;
    type Texture = SoftTexture;
    type UniformLocation = SoftUniformLocation;

    unsafe fn create_shader(&self, shader_type: u32) -> Result<Self::Shader, String> {
        let vertex = match shader_type {
            glow::VERTEX_SHADER => true,
            glow::FRAGMENT_SHADER => false,
            other => return Err(format!("unsupported shader type 0x{other:x}")),
        };
        let mut st = self.state.borrow_mut();
        let id = st.alloc_id("create_shader")?;
        st.shaders.insert(
            id,
            ShaderObj {
                vertex,
                source: String::new(),
                compiled: None,
                log: String::new(),
            },
        );
        Ok(SoftShader(id))
    }

    unsafe fn shader_source(&self, shader: Self::Shader, source: &str) {
        if let Some(s) = self.state.borrow_mut().shaders.get_mut(&shader.0) {
            s.source = source.to_string();
        }
    }

    unsafe fn compile_shader(&self, shader: Self::Shader) {
        if let Some(s) = self.state.borrow_mut().shaders.get_mut(&shader.0) {
            let stage = if s.vertex {
                ShaderStage::Vertex
            } else {
                ShaderStage::Fragment
            };
            match glsl::compile(&s.source, stage) {
                Ok(compiled) => {
                    s.compiled = Some(Rc::new(compiled));
                    s.log.clear();
                }
                Err(log) => {
                    s.compiled = None;
                    s.log = log;
                }
            }
        }
    }

    unsafe fn get_shader_compile_status(&self, shader: Self::Shader) -> bool {
        self.state
            .borrow()
            .shaders
            .get(&shader.0)
            .is_some_and(|s| s.compiled.is_some())
    }

    unsafe fn get_shader_info_log(&self, shader: Self::Shader) -> String {
        self.state
            .borrow()
            .shaders
            .get(&shader.0)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    unsafe fn delete_shader(&self, shader: Self::Shader) {
        self.state.borrow_mut().shaders.remove(&shader.0);
    }

    unsafe fn create_program(&self) -> Result<Self::Program, String> {
        let mut st = self.state.borrow_mut();
        let id = st.alloc_id("create_program")?;
        st.programs.insert(id, ProgramObj::default());
        Ok(SoftProgram(id))
    }

    unsafe fn attach_shader(&self, program: Self::Program, shader: Self::Shader) {
        if let Some(p) = self.state.borrow_mut().programs.get_mut(&program.0) {
            p.attached.push(shader.0);
        }
    }

    unsafe fn detach_shader(&self, program: Self::Program, shader: Self::Shader) {
        if let Some(p) = self.state.borrow_mut().programs.get_mut(&program.0) {
            p.attached.retain(|s| *s != shader.0);
        }
    }

    unsafe fn link_program(&self, program: Self::Program) {
        self.state.borrow_mut().link(program.0);
    }

    unsafe fn get_program_link_status(&self, program: Self::Program) -> bool {
        self.state
            .borrow()
            .programs
            .get(&program.0)
            .is_some_and(|p| p.linked)
    }

    unsafe fn get_program_info_log(&self, program: Self::Program) -> String {
        self.state
            .borrow()
            .programs
            .get(&program.0)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    unsafe fn use_program(&self, program: Option<Self::Program>) {
        self.state.borrow_mut().current_program = program.map(|p| p.0);
    }

    unsafe fn delete_program(&self, program: Self::Program) {
        let mut st = self.state.borrow_mut();
        st.programs.remove(&program.0);
        if st.current_program == Some(program.0) {
            st.current_program = None;
        }
    }

    unsafe fn get_attrib_location(&self, program: Self::Program, name: &str) -> Option<u32> {
        let st = self.state.borrow();
        let p = st.programs.get(&program.0)?;
        if !p.linked {
            return None;
        }
        p.attributes.get(name).copied()
    }

    unsafe fn get_uniform_location(
        &self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation> {
        let st = self.state.borrow();
        let p = st.programs.get(&program.0)?;
        if !p.linked || !p.uniforms.contains_key(name) {
            return None;
        }
        Some(SoftUniformLocation {
            program: program.0,
            name: name.to_string(),
        })
    }

    unsafe fn create_vertex_array(&self) -> Result<Self::VertexArray, String> {
        let mut st = self.state.borrow_mut();
        let id = st.alloc_id("create_vertex_array")?;
        st.vertex_arrays.insert(id, VertexArrayObj::default());
        Ok(SoftVertexArray(id))
    }

    unsafe fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        self.state.borrow_mut().bound_vertex_array = vertex_array.map(|v| v.0).unwrap_or(0);
    }

    unsafe fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        let mut st = self.state.borrow_mut();
        st.vertex_arrays.remove(&vertex_array.0);
        if st.bound_vertex_array == vertex_array.0 {
            st.bound_vertex_array = 0;
        }
    }

    unsafe fn create_buffer(&self) -> Result<Self::Buffer, String> {
        let mut st = self.state.borrow_mut();
        let id = st.alloc_id("create_buffer")?;
        st.buffers.insert(id, Vec::new());
        Ok(SoftBuffer(id))
    }

    unsafe fn bind_buffer(&self, target: u32, buffer: Option<Self::Buffer>) {
        if target == glow::ARRAY_BUFFER {
            self.state.borrow_mut().bound_array_buffer = buffer.map(|b| b.0);
        }
    }

    unsafe fn buffer_data_u8_slice(&self, target: u32, data: &[u8], _usage: u32) {
        let mut st = self.state.borrow_mut();
        if target != glow::ARRAY_BUFFER {
            return;
        }
        let Some(id) = st.bound_array_buffer else {
            st.errors.push("buffer_data with no buffer bound".into());
            return;
        };
        if let Some(buf) = st.buffers.get_mut(&id) {
            buf.clear();
            buf.extend_from_slice(data);
        }
    }

    unsafe fn delete_buffer(&self, buffer: Self::Buffer) {
        let mut st = self.state.borrow_mut();
        st.buffers.remove(&buffer.0);
        if st.bound_array_buffer == Some(buffer.0) {
            st.bound_array_buffer = None;
        }
    }

    unsafe fn enable_vertex_attrib_array(&self, index: u32) {
        self.state
            .borrow_mut()
            .vao_mut()
            .attribs
            .entry(index)
            .or_default()
            .enabled = true;
    }

    unsafe fn vertex_attrib_pointer_f32(
        &self,
        index: u32,
        size: i32,
        _data_type: u32,
        _normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        let mut st = self.state.borrow_mut();
        let buffer = st.bound_array_buffer;
        let ptr = st.vao_mut().attribs.entry(index).or_default();
        ptr.buffer = buffer;
        ptr.size = size;
        ptr.stride = stride;
        ptr.offset = offset;
    }

    unsafe fn create_texture(&self) -> Result<Self::Texture, String> {
        let mut st = self.state.borrow_mut();
        let id = st.alloc_id("create_texture")?;
        st.textures.insert(id, TextureObj::default());
        Ok(SoftTexture(id))
    }

    unsafe fn active_texture(&self, unit: u32) {
        self.state.borrow_mut().active_unit = unit.saturating_sub(glow::TEXTURE0);
    }

    unsafe fn bind_texture(&self, target: u32, texture: Option<Self::Texture>) {
        if target != glow::TEXTURE_2D {
            return;
        }
        let mut st = self.state.borrow_mut();
        let unit = st.active_unit;
        match texture {
            Some(t) => {
                st.bound_textures.insert(unit, t.0);
            }
            None => {
                st.bound_textures.remove(&unit);
            }
        }
    }

    unsafe fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32) {
        if target != glow::TEXTURE_2D {
            return;
        }
        let mut st = self.state.borrow_mut();
        let Some(id) = st.bound_texture() else {
            st.errors.push("tex_parameter with no texture bound".into());
            return;
        };
        if let Some(t) = st.textures.get_mut(&id) {
            t.params.insert(parameter, value);
        }
    }

    unsafe fn pixel_store_i32(&self, parameter: u32, value: i32) {
        self.state.borrow_mut().pixel_store.insert(parameter, value);
    }

    unsafe fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        _internal_format: i32,
        width: i32,
        height: i32,
        _border: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        let mut st = self.state.borrow_mut();
        if target != glow::TEXTURE_2D
            || level != 0
            || format != glow::RGBA
            || ty != glow::UNSIGNED_BYTE
        {
            st.errors
                .push("tex_image_2d: only level-0 RGBA8 2D textures are supported".into());
            return;
        }
        let Some(id) = st.bound_texture() else {
            st.errors.push("tex_image_2d with no texture bound".into());
            return;
        };
        let len = (width.max(0) * height.max(0) * 4) as usize;
        let mut texels = vec![0u8; len];
        if let Some(src) = pixels {
            let n = src.len().min(len);
            texels[..n].copy_from_slice(&src[..n]);
        }
        if let Some(t) = st.textures.get_mut(&id) {
            t.w = width;
            t.h = height;
            t.texels = texels;
        }
    }

    unsafe fn delete_texture(&self, texture: Self::Texture) {
        let mut st = self.state.borrow_mut();
        st.textures.remove(&texture.0);
        st.bound_textures.retain(|_, t| *t != texture.0);
    }

    unsafe fn uniform_1_i32(&self, location: Option<&Self::UniformLocation>, x: i32) {
        self.state.borrow_mut().set_uniform(location, &[x as f32]);
    }

    unsafe fn uniform_1_f32(&self, location: Option<&Self::UniformLocation>, x: f32) {
        self.state.borrow_mut().set_uniform(location, &[x]);
    }

    unsafe fn uniform_2_f32(&self, location: Option<&Self::UniformLocation>, x: f32, y: f32) {
        self.state.borrow_mut().set_uniform(location, &[x, y]);
    }

    unsafe fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        let mut st = self.state.borrow_mut();
        st.viewport = (x, y, width, height);
        let size = ((x + width).max(0), (y + height).max(0));
        if size != st.fb_size {
            st.fb_size = size;
            st.framebuffer = vec![0u8; (size.0 * size.1 * 4) as usize];
        }
    }

    unsafe fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.state.borrow_mut().clear_color = [red, green, blue, alpha];
    }

    unsafe fn clear(&self, mask: u32) {
        if mask & glow::COLOR_BUFFER_BIT == 0 {
            return;
        }
        let mut st = self.state.borrow_mut();
        let c = st.clear_color.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
        for px in st.framebuffer.chunks_exact_mut(4) {
            px.copy_from_slice(&c);
        }
    }

    unsafe fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        let mut st = self.state.borrow_mut();
        st.draws.push((mode, first, count));
        if mode == glow::TRIANGLES {
            st.draw_triangles(first, count);
        }
    }

    unsafe fn read_pixels_rgba8(&self, x: i32, y: i32, width: i32, height: i32, out: &mut [u8]) {
        let st = self.state.borrow();
        let (fw, fh) = st.fb_size;
        for j in 0..height {
            for i in 0..width {
                let dst = ((j * width + i) * 4) as usize;
                if dst + 4 > out.len() {
                    return;
                }
                let (sx, sy) = (x + i, y + j);
                if sx < 0 || sy < 0 || sx >= fw || sy >= fh {
                    out[dst..dst + 4].fill(0);
                    continue;
                }
                let src = ((sy * fw + sx) * 4) as usize;
                out[dst..dst + 4].copy_from_slice(&st.framebuffer[src..src + 4]);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};

    const PASSTHROUGH_VERT: &str = "#version 330 core\nin vec2 a_clip;\nvoid main() { gl_Position = vec4(a_clip, 0.0, 1.0); }\n";

    unsafe fn linked(gl: &SoftGl, vert: &str, frag: &str) -> SoftProgram {
        let vs = gl.create_shader(glow::VERTEX_SHADER).expect("vs");
        gl.shader_source(vs, vert);
        gl.compile_shader(vs);
        assert!(gl.get_shader_compile_status(vs), "{}", gl.get_shader_info_log(vs));
        let fs = gl.create_shader(glow::FRAGMENT_SHADER).expect("fs");
        gl.shader_source(fs, frag);
        gl.compile_shader(fs);
        assert!(gl.get_shader_compile_status(fs), "{}", gl.get_shader_info_log(fs));
        let p = gl.create_program().expect("program");
        gl.attach_shader(p, vs);
        gl.attach_shader(p, fs);
        gl.link_program(p);
        assert!(gl.get_program_link_status(p), "{}", gl.get_program_info_log(p));
        p
    }

    /// Draw a clip-space quad over a 4x4 framebuffer cleared to black and read it back.
    fn draw_fullscreen(frag: &str) -> Vec<u8> {
        let gl = SoftGl::new();
        let quad: [f32; 12] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0];
        let mut out = vec![0u8; 4 * 4 * 4];
        unsafe {
            let p = linked(&gl, PASSTHROUGH_VERT, frag);
            let loc = gl.get_attrib_location(p, "a_clip").expect("a_clip");
            let buf = gl.create_buffer().expect("buffer");
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buf));
            let bytes: &[u8] = bytemuck::cast_slice(&quad);
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW);
            gl.enable_vertex_attrib_array(loc);
            gl.vertex_attrib_pointer_f32(loc, 2, glow::FLOAT, false, 0, 0);
            gl.viewport(0, 0, 4, 4);
            gl.clear_color(0.0, 0.0, 0.0, 0.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.use_program(Some(p));
            gl.draw_arrays(glow::TRIANGLES, 0, 6);
            gl.read_pixels_rgba8(0, 0, 4, 4, &mut out);
        }
        assert!(gl.errors().is_empty(), "{:?}", gl.errors());
        out
    }

    fn pixel(fb: &[u8], x: usize, y: usize) -> &[u8] {
        let i = (y * 4 + x) * 4;
        &fb[i..i + 4]
    }

    #[test]
    fn fragment_shader_runs_per_pixel() {
        let fb = draw_fullscreen(
            "#version 330 core\nout vec4 o;\nvoid main() { o = vec4(gl_FragCoord.x / 4.0, gl_FragCoord.y / 4.0, 0.0, 1.0); }\n",
        );
        assert_eq!(pixel(&fb, 0, 0), &[32, 32, 0, 255]);
        assert_eq!(pixel(&fb, 1, 3), &[96, 223, 0, 255]);
    }

    #[test]
    fn discarded_fragments_keep_the_clear_color() {
        let fb = draw_fullscreen(
            "#version 330 core\nout vec4 o;\nvoid main() {\n  if (gl_FragCoord.x < 2.0) { discard; }\n  o = vec4(1.0);\n}\n",
        );
        assert_eq!(pixel(&fb, 1, 2), &[0, 0, 0, 0]);
        assert_eq!(pixel(&fb, 2, 2), &[255, 255, 255, 255]);
    }

    #[test]
    fn shader_runtime_failures_are_reported_not_drawn() {
        let gl = SoftGl::new();
        unsafe {
            gl.viewport(0, 0, 1, 1);
            gl.draw_arrays(glow::TRIANGLES, 0, 3);
        }
        assert_eq!(gl.errors(), ["draw_arrays without a program in use"]);
    }

    #[test]
    fn linear_filter_blends_neighbours() {
        let mut tex = TextureObj {
            w: 2,
            h: 1,
            texels: vec![0, 0, 0, 255, 255, 255, 255, 255],
            ..TextureObj::default()
        };
        tex.params.insert(glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        tex.params.insert(glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        assert_eq!(tex.sample(0.25, 0.5), [0.0, 0.0, 0.0, 1.0]);

        tex.params.insert(glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        let mid = tex.sample(0.5, 0.5);
        assert!((mid[0] - 0.5).abs() < 1e-6, "{mid:?}");
        assert_eq!(mid[3], 1.0);
    }

    #[test]
    fn wrap_modes() {
        assert_eq!(wrap(-1, 4, None), 3);
        assert_eq!(wrap(5, 4, Some(glow::REPEAT as i32)), 1);
        assert_eq!(wrap(-1, 4, Some(glow::CLAMP_TO_EDGE as i32)), 0);
        assert_eq!(wrap(4, 4, Some(glow::MIRRORED_REPEAT as i32)), 3);
        assert_eq!(wrap(-1, 4, Some(glow::MIRRORED_REPEAT as i32)), 0);
    }

    #[test]
    fn unused_uniforms_are_inactive_after_link() {
        let gl = SoftGl::new();
        let frag = COLOR_FILTER_FRAG.replace(
            "uniform float a;",
            "uniform float a;\nuniform float unused;",
        );
        unsafe {
            let p = linked(&gl, COLOR_FILTER_VERT, &frag);
            assert!(gl.get_uniform_location(p, "unused").is_none());
            assert!(gl.get_uniform_location(p, "a").is_some());
            assert!(gl.get_uniform_location(p, "u_image").is_some());
            assert_eq!(gl.get_attrib_location(p, "a_position"), Some(0));
            assert_eq!(gl.get_attrib_location(p, "a_texCoord"), Some(1));
        }
    }

    #[test]
    fn varyings_missing_from_the_vertex_stage_fail_link() {
        let gl = SoftGl::new();
        let frag = "#version 330 core\nin vec2 v_other;\nout vec4 o;\nvoid main() { o = vec4(v_other, 0.0, 1.0); }\n";
        unsafe {
            let vs = gl.create_shader(glow::VERTEX_SHADER).expect("vs");
            gl.shader_source(vs, PASSTHROUGH_VERT);
            gl.compile_shader(vs);
            let fs = gl.create_shader(glow::FRAGMENT_SHADER).expect("fs");
            gl.shader_source(fs, frag);
            gl.compile_shader(fs);
            let p = gl.create_program().expect("program");
            gl.attach_shader(p, vs);
            gl.attach_shader(p, fs);
            gl.link_program(p);
            assert!(!gl.get_program_link_status(p));
            assert!(gl.get_program_info_log(p).contains("'v_other'"));
        }
    }

    #[test]
    fn uniform_writes_need_the_program_in_use() {
        let gl = SoftGl::new();
        unsafe {
            let p = linked(&gl, COLOR_FILTER_VERT, COLOR_FILTER_FRAG);
            let loc = gl.get_uniform_location(p, "r").expect("r");
            gl.uniform_1_f32(Some(&loc), 0.5);
            assert_eq!(gl.uniform_value(p, "r"), Some(vec![0.0]));
            assert_eq!(gl.errors().len(), 1);

            gl.use_program(Some(p));
            gl.uniform_1_f32(Some(&loc), 0.5);
            assert_eq!(gl.uniform_value(p, "r"), Some(vec![0.5]));
        }
    }

    #[test]
    fn object_limit_fails_creation() {
        let gl = SoftGl::new();
        gl.set_object_limit(Some(1));
        unsafe {
            gl.create_texture().expect("first");
            assert!(gl.create_buffer().is_err());
        }
    }

    #[test]
    fn clear_fills_framebuffer() {
        let gl = SoftGl::new();
        let mut out = vec![0u8; 2 * 2 * 4];
        unsafe {
            gl.viewport(0, 0, 2, 2);
            gl.clear_color(1.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.read_pixels_rgba8(0, 0, 2, 2, &mut out);
        }
        assert_eq!(&out[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out[12..16], &[255, 0, 0, 255]);
    }
}
