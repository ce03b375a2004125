//! Scene-description data model: prim tree, typed property values, path lookup.
//!
//! The tree is produced by an external composition layer and is read-only to
//! this crate. Values are a closed tagged union; every extraction site matches
//! exhaustively and treats a wrong-typed value as absent rather than an error,
//! because authoring sources are untrusted and heterogeneous.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

/// A typed scene-graph value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Symbolic token (e.g. a shader identifier or wrap mode name).
    Token(String),
    Str(String),
    Number(f64),
    Bool(bool),
    Tuple3([f64; 3]),
    /// Asset reference with an optional base identifier the path is relative to.
    Asset { path: String, base: Option<String> },
    /// Reference to another prim (relationship target).
    PathRef(String),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|v| v as f32)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Token or plain string.
    pub fn as_token(&self) -> Option<&str> {
        match self {
            Value::Token(s) | Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Color-ish triple. A lone scalar splats to gray, matching how authoring
    /// tools sometimes collapse uniform colors.
    pub fn as_color(&self) -> Option<[f32; 3]> {
        match self {
            Value::Tuple3(t) => Some([t[0] as f32, t[1] as f32, t[2] as f32]),
            Value::Number(n) => {
                let v = *n as f32;
                Some([v, v, v])
            }
            _ => None,
        }
    }

    pub fn as_asset(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Value::Asset { path, base } => Some((path.as_str(), base.as_deref())),
            // Some authoring paths store assets as plain strings.
            Value::Str(s) => Some((s.as_str(), None)),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            Value::PathRef(p) => Some(p.as_str()),
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Relationship targets: a single path ref or an array of them.
    pub fn as_path_list(&self) -> Vec<&str> {
        match self {
            Value::PathRef(p) => vec![p.as_str()],
            Value::Str(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(|v| v.as_path()).collect(),
            _ => Vec::new(),
        }
    }
}

/// A named property payload: either a concrete value or a connection to
/// another property. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Value(Value),
    /// Target in `/prim/path.property` form.
    Connection(String),
}

impl Property {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Property::Value(v) => Some(v),
            Property::Connection(_) => None,
        }
    }

    pub fn connection(&self) -> Option<&str> {
        match self {
            Property::Connection(t) => Some(t.as_str()),
            Property::Value(_) => None,
        }
    }
}

/// Composition metadata preserved from the (external) composition pass.
#[derive(Debug, Clone, Default)]
pub struct PrimMetadata {
    /// Composition-arc targets this prim was composed from, if any.
    pub references: Vec<String>,
    pub instanceable: bool,
}

/// A node in the scene-description tree.
///
/// Properties and children keep authoring insertion order; lookups are linear
/// scans, which is fine at scene-description sizes.
#[derive(Debug, Clone, Default)]
pub struct Prim {
    pub name: String,
    pub type_name: String,
    /// Stable absolute path, assigned when the tree is built.
    pub path: String,
    pub properties: Vec<(String, Property)>,
    pub children: Vec<Prim>,
    pub metadata: PrimMetadata,
}

impl Prim {
    pub fn prop(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Concrete value of a property (`None` when absent or a connection).
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.prop(name).and_then(|p| p.value())
    }

    /// Connection target of a property (`None` when absent or a value).
    pub fn connection(&self, name: &str) -> Option<&str> {
        self.prop(name).and_then(|p| p.connection())
    }

    pub fn child(&self, name: &str) -> Option<&Prim> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Property names in authoring order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(n, _)| n.as_str())
    }

    /// The shading-model identifier carried by shader prims, if any.
    pub fn shader_id(&self) -> Option<&str> {
        self.value("info:id").and_then(|v| v.as_token())
    }

    /// Whether this prim declares an externally-compiled shader implementation.
    pub fn has_external_source(&self) -> bool {
        self.prop("info:mdl:sourceAsset").is_some()
            || self
                .value("info:implementationSource")
                .and_then(|v| v.as_token())
                == Some("sourceAsset")
    }

    /// Depth-first walk over this prim and all descendants.
    pub fn walk(&self) -> PrimWalk<'_> {
        PrimWalk { stack: vec![self] }
    }
}

pub struct PrimWalk<'a> {
    stack: Vec<&'a Prim>,
}

impl<'a> Iterator for PrimWalk<'a> {
    type Item = &'a Prim;

    fn next(&mut self) -> Option<&'a Prim> {
        let prim = self.stack.pop()?;
        // Push in reverse so iteration preserves authoring order.
        for child in prim.children.iter().rev() {
            self.stack.push(child);
        }
        Some(prim)
    }
}

/// The composed scene tree. Owns the root prim; all prim lifetimes are tied
/// to the tree.
#[derive(Debug, Clone, Default)]
pub struct SceneTree {
    pub root: Prim,
}

impl SceneTree {
    /// Absolute-path lookup.
    ///
    /// Walks children segment by segment; if that misses (recomposed subtrees
    /// can carry recorded paths that diverge from their tree position),
    /// degrades to a full scan comparing each prim's recorded absolute path.
    pub fn find(&self, path: &str) -> Option<&Prim> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        if path == "/" {
            return Some(&self.root);
        }

        let mut current = &self.root;
        let mut walked_ok = true;
        for segment in path.trim_start_matches('/').split('/') {
            if segment.is_empty() {
                continue;
            }
            match current.child(segment) {
                Some(child) => current = child,
                None => {
                    walked_ok = false;
                    break;
                }
            }
        }
        if walked_ok {
            return Some(current);
        }

        // Inconsistent composition: fall back to scanning recorded paths.
        self.root.walk().find(|p| p.path == path)
    }

    /// Resolve a path that may be relative to `anchor`.
    pub fn find_relative<'a>(&'a self, anchor: &'a Prim, path: &str) -> Option<&'a Prim> {
        if path.starts_with('/') {
            return self.find(path);
        }
        let mut abs = anchor.path.clone();
        if !abs.ends_with('/') {
            abs.push('/');
        }
        abs.push_str(path);
        self.find(&abs)
    }

    /// Find the parent of the prim at `path`.
    pub fn parent_of(&self, path: &str) -> Option<&Prim> {
        let idx = path.rfind('/')?;
        if idx == 0 {
            return Some(&self.root);
        }
        self.find(&path[..idx])
    }
}

/// Split a connection target into (prim path, optional property name).
///
/// `/Mat/Tex.outputs:rgb` -> (`/Mat/Tex`, Some("outputs:rgb")).
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.rfind('.') {
        Some(idx) => (&target[..idx], Some(&target[idx + 1..])),
        None => (target, None),
    }
}

/// Last path segment, e.g. `/Mat/Shader` -> `Shader`.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// First path segment, e.g. `/World/Looks/Mat` -> `World`.
pub fn first_segment(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
}

// ---------------------------------------------------------------------------
// JSON scene loading
// ---------------------------------------------------------------------------
//
// Wire form used by fixtures and the convenience loader:
//
// {
//   "World": {
//     "type": "Xform",
//     "properties": { "material:binding": { "rel": "/World/Looks/Mat" } },
//     "children": { ... }
//   }
// }
//
// Property payloads are one-key tagged objects: token / string / number /
// bool / tuple3 / asset / rel / connect / array / dict. Bare JSON scalars are
// accepted as shorthand for number / bool / string.

pub fn load_scene_from_path(path: impl AsRef<std::path::Path>) -> Result<SceneTree> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene json at {}", path.display()))?;
    load_scene_from_str(&text)
}

pub fn load_scene_from_str(text: &str) -> Result<SceneTree> {
    let json: serde_json::Value =
        serde_json::from_str(text).context("failed to parse scene json")?;
    let obj = match json {
        serde_json::Value::Object(map) => map,
        _ => bail!("scene json root must be an object of prims"),
    };

    let mut root = Prim {
        name: String::new(),
        type_name: String::new(),
        path: "/".to_string(),
        ..Default::default()
    };
    for (name, spec) in obj {
        root.children.push(prim_from_json(&name, &spec, "")?);
    }
    Ok(SceneTree { root })
}

fn prim_from_json(name: &str, spec: &serde_json::Value, parent_path: &str) -> Result<Prim> {
    let obj = spec
        .as_object()
        .with_context(|| format!("prim '{name}' must be a json object"))?;

    let path = format!("{parent_path}/{name}");
    let mut prim = Prim {
        name: name.to_string(),
        type_name: obj
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        path: path.clone(),
        ..Default::default()
    };

    if let Some(meta) = obj.get("metadata").and_then(|v| v.as_object()) {
        if let Some(refs) = meta.get("references").and_then(|v| v.as_array()) {
            prim.metadata.references = refs
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        prim.metadata.instanceable = meta
            .get("instanceable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    }

    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (pname, pval) in props {
            prim.properties
                .push((pname.clone(), property_from_json(pval)?));
        }
    }

    if let Some(children) = obj.get("children").and_then(|v| v.as_object()) {
        for (cname, cspec) in children {
            prim.children.push(prim_from_json(cname, cspec, &path)?);
        }
    }

    Ok(prim)
}

fn property_from_json(json: &serde_json::Value) -> Result<Property> {
    if let Some(obj) = json.as_object() {
        if let Some((tag, payload)) = obj.iter().next().filter(|_| obj.len() == 1) {
            if tag == "connect" {
                let target = payload
                    .as_str()
                    .context("'connect' payload must be a string path")?;
                return Ok(Property::Connection(target.to_string()));
            }
        }
    }
    Ok(Property::Value(value_from_json(json)?))
}

fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    use serde_json::Value as J;
    match json {
        J::Bool(b) => Ok(Value::Bool(*b)),
        J::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(0.0))),
        J::String(s) => Ok(Value::Str(s.clone())),
        J::Array(items) => {
            let vals: Result<Vec<Value>> = items.iter().map(value_from_json).collect();
            Ok(Value::Array(vals?))
        }
        J::Object(obj) if obj.len() == 1 => {
            let Some((tag, payload)) = obj.iter().next() else {
                bail!("value object must be a one-key tagged form");
            };
            match (tag.as_str(), payload) {
                ("token", J::String(s)) => Ok(Value::Token(s.clone())),
                ("string", J::String(s)) => Ok(Value::Str(s.clone())),
                ("number", J::Number(n)) => Ok(Value::Number(n.as_f64().unwrap_or(0.0))),
                ("bool", J::Bool(b)) => Ok(Value::Bool(*b)),
                ("tuple3", J::Array(items)) if items.len() == 3 => {
                    let mut t = [0.0f64; 3];
                    for (i, item) in items.iter().enumerate() {
                        t[i] = item.as_f64().unwrap_or(0.0);
                    }
                    Ok(Value::Tuple3(t))
                }
                ("asset", J::String(s)) => Ok(Value::Asset {
                    path: s.clone(),
                    base: None,
                }),
                ("asset", J::Object(a)) => Ok(Value::Asset {
                    path: a
                        .get("path")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    base: a.get("base").and_then(|v| v.as_str()).map(str::to_string),
                }),
                ("rel", J::String(s)) => Ok(Value::PathRef(s.clone())),
                ("rel", J::Array(items)) => {
                    let paths: Vec<Value> = items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| Value::PathRef(s.to_string()))
                        .collect();
                    Ok(Value::Array(paths))
                }
                ("array", J::Array(items)) => {
                    let vals: Result<Vec<Value>> = items.iter().map(value_from_json).collect();
                    Ok(Value::Array(vals?))
                }
                ("dict", J::Object(entries)) => {
                    let mut dict = BTreeMap::new();
                    for (k, v) in entries {
                        dict.insert(k.clone(), value_from_json(v)?);
                    }
                    Ok(Value::Dict(dict))
                }
                (other, _) => bail!("unknown value tag '{other}'"),
            }
        }
        J::Object(_) => bail!("value object must be a one-key tagged form"),
        J::Null => bail!("null is not a valid property value"),
    }
}
