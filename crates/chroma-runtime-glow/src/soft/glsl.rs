//! GLSL front end of `SoftGl`.
//!
//! Desktop GLSL (`#version 330 core` and friends) is rewritten line by line into the
//! Vulkan-flavoured dialect naga's GLSL frontend accepts, then parsed and validated:
//!
//! - the `#version` line becomes `#version 450 core`
//! - `in`/`out` declarations without a layout get the next free `location`
//! - default-block uniforms get a `set = 0` binding; `sampler2D X` is split into
//!   `texture2D X_texture` + `sampler X_sampler` and `X` is defined as the combined sampler
//!
//! Rewrites never add or remove lines, so naga's line numbers are the caller's.

use std::collections::{BTreeSet, HashMap};

use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, FunctionInfo, ModuleInfo, ValidationFlags, Validator};
use naga::{
    AddressSpace, Binding, EntryPoint, GlobalVariable, Handle, Module, ShaderStage, Span,
    Statement, TypeInner,
};

const VERSION_LINE: &str = "#version 450 core";
const TEXTURE_SUFFIX: &str = "_texture";
const SAMPLER_SUFFIX: &str = "_sampler";

/// A default-block uniform as the program sees it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StageUniform {
    pub name: String,
    pub components: usize,
    pub active: bool,
}

/// A user-declared stage input (vertex attribute or fragment varying).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StageInput {
    pub name: String,
    pub location: u32,
    pub active: bool,
}

/// A validated shader stage plus the interface the linker needs.
#[derive(Debug)]
pub(crate) struct CompiledStage {
    pub module: Module,
    pub uniforms: Vec<StageUniform>,
    pub inputs: Vec<StageInput>,
    pub outputs: Vec<String>,
    /// Uniform-space globals and sampled images, by the uniform name they are set through.
    bindings: HashMap<Handle<GlobalVariable>, String>,
}

impl CompiledStage {
    pub fn entry(&self) -> Option<&EntryPoint> {
        self.module.entry_points.first()
    }

    pub fn uniform_name(&self, global: Handle<GlobalVariable>) -> Option<&str> {
        self.bindings.get(&global).map(String::as_str)
    }
}

// -------------------------------------------------------------------------------------------------
// Source adaptation
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Adapted {
    source: String,
    defines: Vec<(String, String)>,
    /// texture global name -> combined sampler name
    textures: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    In,
    Out,
    Uniform,
}

#[derive(Debug)]
struct Declaration<'a> {
    interpolation: Vec<&'a str>,
    storage: Storage,
    ty: &'a str,
    /// (name, array suffix)
    names: Vec<(&'a str, String)>,
}

/// Strip comments from one line, carrying block-comment state across lines.
fn code_of(line: &str, in_block: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if *in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_block = false;
            }
            continue;
        }
        if c == '/' {
            match chars.peek() {
                Some('/') => break,
                Some('*') => {
                    chars.next();
                    *in_block = true;
                    out.push(' ');
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

fn tokens(code: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in code.char_indices() {
        if c.is_ascii_alphanumeric() || c == '_' {
            start.get_or_insert(i);
            continue;
        }
        if let Some(s) = start.take() {
            out.push(&code[s..i]);
        }
        if !c.is_whitespace() {
            out.push(&code[i..i + c.len_utf8()]);
        }
    }
    if let Some(s) = start {
        out.push(&code[s..]);
    }
    out
}

fn is_identifier(tok: &str) -> bool {
    tok.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

fn parse_declaration<'a>(toks: &[&'a str], stage: ShaderStage) -> Option<Declaration<'a>> {
    let (last, toks) = toks.split_last()?;
    if *last != ";" {
        return None;
    }
    let mut i = 0;
    let mut interpolation = Vec::new();
    while let Some(t @ ("flat" | "smooth" | "noperspective" | "centroid")) = toks.get(i).copied() {
        interpolation.push(t);
        i += 1;
    }
    let vertex = stage == ShaderStage::Vertex;
    let storage = match toks.get(i).copied()? {
        "uniform" => Storage::Uniform,
        "in" => Storage::In,
        "out" => Storage::Out,
        "attribute" if vertex => Storage::In,
        "varying" if vertex => Storage::Out,
        "varying" => Storage::In,
        _ => return None,
    };
    i += 1;
    while matches!(toks.get(i).copied(), Some("highp" | "mediump" | "lowp")) {
        i += 1;
    }
    let ty = toks.get(i).copied().filter(|t| is_identifier(t))?;
    i += 1;

    let mut names = Vec::new();
    let mut rest = &toks[i..];
    loop {
        let (name, tail) = rest.split_first()?;
        if !is_identifier(name) {
            return None;
        }
        let mut suffix = String::new();
        rest = tail;
        if rest.first() == Some(&"[") {
            let close = rest.iter().position(|t| *t == "]")?;
            suffix = rest[..=close].concat();
            rest = &rest[close + 1..];
        }
        names.push((*name, suffix));
        match rest.split_first() {
            None => break,
            Some((&",", tail)) => rest = tail,
            Some(_) => return None,
        }
    }

    Some(Declaration {
        interpolation,
        storage,
        ty,
        names,
    })
}

/// Value of `key = N` inside a `layout(...)` qualifier.
fn layout_value(toks: &[&str], key: &str) -> Option<u32> {
    let close = toks.iter().position(|t| *t == ")")?;
    let at = toks[..close].iter().position(|t| *t == key)?;
    match toks.get(at + 1..at + 3) {
        Some(["=", n]) => n.parse().ok(),
        _ => None,
    }
}

/// Storage qualifier following a `layout(...)` prefix.
fn layout_storage<'a>(toks: &[&'a str]) -> Option<&'a str> {
    let close = toks.iter().position(|t| *t == ")")?;
    toks[close + 1..]
        .iter()
        .copied()
        .find(|t| matches!(*t, "in" | "out" | "uniform"))
}

#[derive(Debug, Default)]
struct Slots {
    taken: BTreeSet<u32>,
}

impl Slots {
    fn next(&mut self, width: u32) -> u32 {
        let mut at = 0;
        while (at..at + width).any(|n| self.taken.contains(&n)) {
            at += 1;
        }
        self.taken.extend(at..at + width);
        at
    }
}

fn array_width(suffix: &str) -> u32 {
    suffix
        .trim_matches(|c| c == '[' || c == ']')
        .parse()
        .unwrap_or(1)
}

fn adapt(source: &str, stage: ShaderStage) -> Result<Adapted, String> {
    let lines: Vec<&str> = source.lines().collect();

    // First pass: explicit locations and bindings the allocator must skip.
    let mut inputs = Slots::default();
    let mut outputs = Slots::default();
    let mut bindings = Slots::default();
    let mut in_block = false;
    for line in &lines {
        let code = code_of(line, &mut in_block);
        let toks = tokens(&code);
        if toks.first() != Some(&"layout") {
            continue;
        }
        match layout_storage(&toks) {
            Some("in") => inputs.taken.extend(layout_value(&toks, "location")),
            Some("out") => outputs.taken.extend(layout_value(&toks, "location")),
            Some("uniform") => bindings.taken.extend(layout_value(&toks, "binding")),
            _ => {}
        }
    }

    let mut adapted = Adapted::default();
    let mut saw_version = false;
    let mut depth = 0usize;
    in_block = false;
    for (n, line) in lines.iter().enumerate() {
        let code = code_of(line, &mut in_block);
        let trimmed = code.trim();
        let mut rewritten = None;

        if trimmed.starts_with("#version") {
            saw_version = true;
            rewritten = Some(VERSION_LINE.to_string());
        } else if !saw_version && !trimmed.is_empty() {
            return Err(format!("0:{}: error: missing #version directive", n + 1));
        } else if depth == 0 && !trimmed.contains(['{', '}', '(', '=']) {
            if let Some(decl) = parse_declaration(&tokens(trimmed), stage) {
                rewritten = Some(rewrite(
                    &decl,
                    &mut adapted,
                    &mut inputs,
                    &mut outputs,
                    &mut bindings,
                ));
            }
        }

        for c in code.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        adapted.source.push_str(rewritten.as_deref().unwrap_or(line));
        adapted.source.push('\n');
    }
    if !saw_version {
        return Err("0:1: error: missing #version directive".to_string());
    }
    Ok(adapted)
}

fn rewrite(
    decl: &Declaration<'_>,
    adapted: &mut Adapted,
    inputs: &mut Slots,
    outputs: &mut Slots,
    bindings: &mut Slots,
) -> String {
    let interpolation: String = decl.interpolation.iter().map(|q| format!("{q} ")).collect();
    let mut parts = Vec::with_capacity(decl.names.len());
    for (name, suffix) in &decl.names {
        let ty = decl.ty;
        match decl.storage {
            Storage::In | Storage::Out => {
                let (slots, keyword) = match decl.storage {
                    Storage::In => (&mut *inputs, "in"),
                    _ => (&mut *outputs, "out"),
                };
                let location = slots.next(array_width(suffix));
                parts.push(format!(
                    "layout(location = {location}) {interpolation}{keyword} {ty} {name}{suffix};"
                ));
            }
            Storage::Uniform if ty == "sampler2D" => {
                let texture = bindings.next(1);
                let sampler = bindings.next(1);
                let texture_name = format!("{name}{TEXTURE_SUFFIX}");
                let sampler_name = format!("{name}{SAMPLER_SUFFIX}");
                parts.push(format!(
                    "layout(set = 0, binding = {texture}) uniform texture2D {texture_name}; \
                     layout(set = 0, binding = {sampler}) uniform sampler {sampler_name};"
                ));
                adapted.defines.push((
                    name.to_string(),
                    format!("sampler2D({texture_name}, {sampler_name})"),
                ));
                adapted.textures.insert(texture_name, name.to_string());
            }
            Storage::Uniform => {
                let binding = bindings.next(1);
                parts.push(format!(
                    "layout(set = 0, binding = {binding}) uniform {ty} {name}{suffix};"
                ));
            }
        }
    }
    parts.join(" ")
}

// -------------------------------------------------------------------------------------------------
// Compilation
// -------------------------------------------------------------------------------------------------

fn line_of(span: Span, source: &str) -> usize {
    match span.to_range() {
        Some(range) if span.is_defined() && range.start <= source.len() => {
            source.as_bytes()[..range.start]
                .iter()
                .filter(|b| **b == b'\n')
                .count()
                + 1
        }
        _ => 0,
    }
}

fn validation_log(err: &naga::WithSpan<naga::valid::ValidationError>, source: &str) -> String {
    let line = err
        .spans()
        .next()
        .map(|(span, _)| line_of(*span, source))
        .unwrap_or(0);
    let mut msg = err.to_string();
    let mut cause = std::error::Error::source(err);
    while let Some(c) = cause {
        msg.push_str(": ");
        msg.push_str(&c.to_string());
        cause = c.source();
    }
    format!("0:{line}: error: {msg}")
}

/// The function `main` compiles to; the entry point itself only shuffles inputs/outputs.
fn user_main<'i>(module: &Module, info: &'i ModuleInfo) -> Option<&'i FunctionInfo> {
    let ep = module.entry_points.first()?;
    ep.function.body.iter().find_map(|s| match *s {
        Statement::Call { function, .. } => Some(&info[function]),
        _ => None,
    })
}

/// Number of float slots a uniform of type `ty` occupies.
fn components(module: &Module, ty: Handle<naga::Type>) -> usize {
    match module.types[ty].inner {
        TypeInner::Vector { size, .. } => size as usize,
        TypeInner::Matrix { columns, rows, .. } => columns as usize * rows as usize,
        TypeInner::Array {
            base,
            size: naga::ArraySize::Constant(n),
            ..
        } => components(module, base) * n.get() as usize,
        _ => 1,
    }
}

/// Parse and validate `source`; on failure the returned string is the info log.
pub(crate) fn compile(source: &str, stage: ShaderStage) -> Result<CompiledStage, String> {
    let adapted = adapt(source, stage)?;
    let mut options = Options::from(stage);
    for (name, value) in &adapted.defines {
        options.defines.insert(name.clone(), value.clone());
    }

    let module = Frontend::default()
        .parse(&options, &adapted.source)
        .map_err(|errs| {
            errs.errors
                .iter()
                .map(|e| format!("0:{}: error: {}\n", line_of(e.meta, &adapted.source), e.kind))
                .collect::<String>()
        })?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| validation_log(&e, &adapted.source))?;

    let Some(ep) = module.entry_points.first() else {
        return Err("0:0: error: missing entry point 'void main()'".to_string());
    };
    let used = |global: Handle<GlobalVariable>| match user_main(&module, &info) {
        Some(f) => !f[global].is_empty(),
        None => true,
    };

    let mut uniforms = Vec::new();
    let mut bindings = HashMap::new();
    for (handle, var) in module.global_variables.iter() {
        let Some(name) = var.name.as_deref() else {
            continue;
        };
        let (uniform, count) = match var.space {
            AddressSpace::Uniform => (name, components(&module, var.ty)),
            AddressSpace::Handle => match adapted.textures.get(name) {
                Some(combined) => (combined.as_str(), 1),
                None => continue,
            },
            _ => continue,
        };
        uniforms.push(StageUniform {
            name: uniform.to_string(),
            components: count,
            active: used(handle),
        });
        bindings.insert(handle, uniform.to_string());
    }

    let private = |name: &str| {
        module
            .global_variables
            .iter()
            .find(|(_, g)| g.space == AddressSpace::Private && g.name.as_deref() == Some(name))
            .map(|(h, _)| h)
    };
    let inputs = ep
        .function
        .arguments
        .iter()
        .filter_map(|arg| match (&arg.name, &arg.binding) {
            (Some(name), Some(Binding::Location { location, .. })) => Some(StageInput {
                name: name.clone(),
                location: *location,
                active: private(name).is_some_and(used),
            }),
            _ => None,
        })
        .collect();

    let outputs = match ep.function.result.as_ref().map(|r| &module.types[r.ty].inner) {
        Some(TypeInner::Struct { members, .. }) => members
            .iter()
            .filter(|m| matches!(m.binding, Some(Binding::Location { .. })))
            .filter_map(|m| m.name.clone())
            .collect(),
        _ => Vec::new(),
    };

    Ok(CompiledStage {
        module,
        uniforms,
        inputs,
        outputs,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{COLOR_FILTER_FRAG, COLOR_FILTER_VERT};

    fn names(uniforms: &[StageUniform]) -> Vec<(&str, usize, bool)> {
        uniforms
            .iter()
            .map(|u| (u.name.as_str(), u.components, u.active))
            .collect()
    }

    #[test]
    fn builtin_vertex_interface() {
        let stage = compile(COLOR_FILTER_VERT, ShaderStage::Vertex).expect("compiles");
        let inputs: Vec<(&str, u32)> =
            stage.inputs.iter().map(|i| (i.name.as_str(), i.location)).collect();
        assert_eq!(inputs, [("a_position", 0), ("a_texCoord", 1)]);
        assert_eq!(stage.outputs, ["v_texCoord"]);
        assert_eq!(names(&stage.uniforms), [("u_resolution", 2, true)]);
    }

    #[test]
    fn builtin_fragment_interface() {
        let stage = compile(COLOR_FILTER_FRAG, ShaderStage::Fragment).expect("compiles");
        assert_eq!(
            names(&stage.uniforms),
            [
                ("u_image", 1, true),
                ("r", 1, true),
                ("g", 1, true),
                ("b", 1, true),
                ("a", 1, true)
            ]
        );
        assert_eq!(stage.outputs, ["o"]);
    }

    #[test]
    fn comments_and_uniform_lists_are_handled() {
        let src = "#version 330 core\n// uniform float hidden;\nuniform float r, g;\n/* uniform vec4 x; */\nout vec4 o;\nvoid main() { o = vec4(r * g); }\n";
        let stage = compile(src, ShaderStage::Fragment).expect("compiles");
        assert_eq!(names(&stage.uniforms), [("r", 1, true), ("g", 1, true)]);
    }

    #[test]
    fn explicit_locations_are_honoured() {
        let src = "#version 330 core\nlayout(location = 3) in vec2 a_position;\nin vec2 a_extra;\nvoid main() { gl_Position = vec4(a_position + a_extra, 0.0, 1.0); }\n";
        let stage = compile(src, ShaderStage::Vertex).expect("compiles");
        let inputs: Vec<(&str, u32)> =
            stage.inputs.iter().map(|i| (i.name.as_str(), i.location)).collect();
        assert_eq!(inputs, [("a_position", 3), ("a_extra", 0)]);
    }

    #[test]
    fn declared_but_unread_names_are_inactive() {
        let src = "#version 330 core\nin vec2 a_position;\nin vec2 a_unused;\nuniform float k;\nvoid main() { gl_Position = vec4(a_position, 0.0, 1.0); }\n";
        let stage = compile(src, ShaderStage::Vertex).expect("compiles");
        let active: Vec<(&str, bool)> =
            stage.inputs.iter().map(|i| (i.name.as_str(), i.active)).collect();
        assert_eq!(active, [("a_position", true), ("a_unused", false)]);
        assert_eq!(names(&stage.uniforms), [("k", 1, false)]);
    }

    #[test]
    fn unbalanced_delimiters_report_their_line() {
        let src = "#version 330 core\nout vec4 o;\nvoid main() {\n  o = vec4((1.0);\n}\n";
        let err = compile(src, ShaderStage::Fragment).expect_err("bad");
        assert!(err.starts_with("0:4: error"), "log: {err}");
    }

    #[test]
    fn missing_semicolon_is_a_parse_error() {
        let src = "#version 330 core\nout vec4 o;\nvoid main() {\n  o = vec4(1.0)\n}\n";
        let err = compile(src, ShaderStage::Fragment).expect_err("no semicolon");
        assert!(err.contains("error"), "log: {err}");
    }

    #[test]
    fn undeclared_identifier_is_rejected() {
        let src = "#version 330 core\nout vec4 o;\nvoid main() {\n  o = vec4(brightness);\n}\n";
        let err = compile(src, ShaderStage::Fragment).expect_err("unknown name");
        assert!(err.contains("brightness"), "log: {err}");
        assert!(err.starts_with("0:4: error"), "log: {err}");
    }

    #[test]
    fn mismatched_operand_types_are_rejected() {
        let src = "#version 330 core\nout vec4 o;\nvoid main() {\n  o = vec4(1.0) * vec3(1.0);\n}\n";
        assert!(compile(src, ShaderStage::Fragment).is_err());
    }

    #[test]
    fn version_directive_is_required() {
        let err = compile("out vec4 o;\nvoid main() { o = vec4(1.0); }\n", ShaderStage::Fragment)
            .expect_err("no version");
        assert!(err.contains("#version"), "log: {err}");
    }

    #[test]
    fn entry_point_is_required() {
        let src = "#version 330 core\nuniform float r;\n";
        assert!(compile(src, ShaderStage::Fragment).is_err());
    }

    #[test]
    fn rewrites_keep_line_count() {
        let adapted = adapt(COLOR_FILTER_FRAG, ShaderStage::Fragment).expect("adapts");
        assert_eq!(adapted.source.lines().count(), COLOR_FILTER_FRAG.lines().count());
        assert!(adapted.source.starts_with(VERSION_LINE));
        assert_eq!(
            adapted.defines,
            [(
                "u_image".to_string(),
                "sampler2D(u_image_texture, u_image_sampler)".to_string()
            )]
        );
    }
}
