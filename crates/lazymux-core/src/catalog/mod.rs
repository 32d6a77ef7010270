//! Hierarchy Catalog
//!
//! Read-only, path-addressable tree of backends -> categories -> tools.
//! Loaded once at startup and shared without synchronization.
//!
//! Paths are slash-delimited segment sequences. The empty path addresses the
//! root, whose direct children are the backends. Segments are case-sensitive
//! and matched exactly.

mod builder;
mod loader;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ToolFilter;

pub use builder::CatalogBuilder;

/// Longest summary kept for listings
const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid catalog segment '{segment}' under '{parent}'")]
    InvalidSegment { parent: String, segment: String },

    #[error("duplicate catalog path '{0}'")]
    DuplicatePath(String),

    #[error("tool '{path}' names backend '{server}' but lives under backend '{backend}'")]
    BackendMismatch {
        path: String,
        server: String,
        backend: String,
    },

    #[error("the catalog root can only contain backends, found tool '{0}'")]
    RootTool(String),

    #[error("catalog path not found: '{0}'")]
    NotFound(String),

    #[error("'{0}' is a tool and has no children")]
    NotACategory(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Category,
    Tool,
}

/// The (backend, tool name) pair a tool node resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ToolTarget {
    pub backend: String,
    pub tool: String,
}

#[derive(Debug, Clone)]
pub struct CatalogNode {
    pub path: String,
    pub kind: NodeKind,
    /// First line of the description
    pub summary: String,
    pub description: String,
    /// Present only for category nodes
    pub children: BTreeMap<String, CatalogNode>,
    /// Present only for tool nodes
    pub input_schema: Option<Value>,
    /// Present only for tool nodes
    pub target: Option<ToolTarget>,
}

impl CatalogNode {
    fn category(path: String, description: String) -> Self {
        Self {
            path,
            kind: NodeKind::Category,
            summary: summarize(&description),
            description,
            children: BTreeMap::new(),
            input_schema: None,
            target: None,
        }
    }

    fn tool(path: String, description: String, schema: Value, target: ToolTarget) -> Self {
        Self {
            path,
            kind: NodeKind::Tool,
            summary: summarize(&description),
            description,
            children: BTreeMap::new(),
            input_schema: Some(schema),
            target: Some(target),
        }
    }

    pub fn is_tool(&self) -> bool {
        self.kind == NodeKind::Tool
    }

    /// Last path segment; empty for the root
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Number of tool leaves in this subtree
    pub fn tool_count(&self) -> usize {
        match self.kind {
            NodeKind::Tool => 1,
            NodeKind::Category => self.children.values().map(CatalogNode::tool_count).sum(),
        }
    }

    fn retain_tools(&mut self, filter: &ToolFilter) {
        self.children.retain(|_, child| match &child.target {
            Some(target) => filter.permits(&target.tool),
            None => true,
        });
        for child in self.children.values_mut() {
            if !child.is_tool() {
                child.retain_tools(filter);
            }
        }
    }
}

/// One entry of a category listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildEntry {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: CatalogNode,
    overview: Option<String>,
}

impl Catalog {
    /// Load a catalog directory (`root.json` plus one node file per backend).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        loader::load_dir(dir.as_ref())
    }

    pub(crate) fn from_root(root: CatalogNode, overview: Option<String>) -> Self {
        Self { root, overview }
    }

    pub fn root(&self) -> &CatalogNode {
        &self.root
    }

    pub fn overview(&self) -> Option<&str> {
        self.overview.as_deref()
    }

    /// Backend names, i.e. the root's direct children
    pub fn backends(&self) -> Vec<&str> {
        self.root.children.keys().map(String::as_str).collect()
    }

    /// Total tools under a backend, `None` if the backend is not in the catalog
    pub fn tool_count(&self, backend: &str) -> Option<usize> {
        self.root.children.get(backend).map(CatalogNode::tool_count)
    }

    /// Resolve an exact, canonical path. The empty path is the root.
    pub fn lookup(&self, path: &str) -> Option<&CatalogNode> {
        if path.is_empty() {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for segment in path.split('/') {
            if segment.is_empty() {
                return None;
            }
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Immediate children of a category, ordered by name.
    pub fn children(&self, path: &str) -> Result<Vec<ChildEntry>, CatalogError> {
        let node = self
            .lookup(path)
            .ok_or_else(|| CatalogError::NotFound(path.to_string()))?;
        if node.is_tool() {
            return Err(CatalogError::NotACategory(path.to_string()));
        }
        Ok(node
            .children
            .iter()
            .map(|(name, child)| ChildEntry {
                path: child.path.clone(),
                name: name.clone(),
                kind: child.kind,
                summary: child.summary.clone(),
            })
            .collect())
    }

    /// Prune tools rejected by per-backend filters.
    pub fn apply_filters(mut self, filters: &HashMap<String, ToolFilter>) -> Self {
        for (backend, filter) in filters {
            if let Some(node) = self.root.children.get_mut(backend) {
                let before = node.tool_count();
                node.retain_tools(filter);
                debug!(
                    backend = %backend,
                    before,
                    after = node.tool_count(),
                    "Applied tool filter"
                );
            }
        }
        self
    }

    /// Make every configured backend a root child, adding empty categories
    /// for backends the catalog does not describe.
    pub fn ensure_backends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if self.root.children.contains_key(name) {
                continue;
            }
            if !is_valid_segment(name) {
                warn!(backend = %name, "Backend name is not a valid catalog segment; not listed");
                continue;
            }
            warn!(backend = %name, "Configured backend has no catalog entry");
            self.root.children.insert(
                name.to_string(),
                CatalogNode::category(
                    name.to_string(),
                    format!("{} (no catalog entry; regenerate the catalog to list its tools)", name),
                ),
            );
        }
        self
    }
}

/// Trim surrounding whitespace and slashes from a caller-supplied path.
pub fn normalize_path(path: &str) -> &str {
    path.trim().trim_matches('/')
}

pub(crate) fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains('\\')
}

pub(crate) fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}

/// First non-empty line, capped in length.
pub fn summarize(description: &str) -> String {
    let line = description
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() <= SUMMARY_MAX_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(SUMMARY_MAX_CHARS - 1).collect();
    cut.push('…');
    cut
}

// ---------------------------------------------------------------------------
// Raw tree shared by the file loader and the builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct RawNode {
    pub description: String,
    pub categories: BTreeMap<String, RawNode>,
    pub tools: BTreeMap<String, RawTool>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RawTool {
    pub description: String,
    pub input_schema: Option<Value>,
    pub maps_to: Option<String>,
    pub server: Option<String>,
}

pub(crate) fn assemble(root: RawNode, overview: Option<String>) -> Result<Catalog, CatalogError> {
    if let Some(name) = root.tools.keys().next() {
        return Err(CatalogError::RootTool(name.clone()));
    }
    let mut node = CatalogNode::category(String::new(), root.description);
    for (backend, raw) in root.categories {
        check_segment("", &backend)?;
        let child = assemble_category(raw, backend.clone(), &backend)?;
        node.children.insert(backend, child);
    }
    Ok(Catalog::from_root(node, overview))
}

fn assemble_category(raw: RawNode, path: String, backend: &str) -> Result<CatalogNode, CatalogError> {
    let mut node = CatalogNode::category(path.clone(), raw.description);

    for (name, sub) in raw.categories {
        check_segment(&path, &name)?;
        let child_path = join_path(&path, &name);
        let child = assemble_category(sub, child_path, backend)?;
        node.children.insert(name, child);
    }

    for (name, tool) in raw.tools {
        check_segment(&path, &name)?;
        let child_path = join_path(&path, &name);
        if node.children.contains_key(&name) {
            return Err(CatalogError::DuplicatePath(child_path));
        }
        if let Some(server) = tool.server.as_deref() {
            if server != backend {
                return Err(CatalogError::BackendMismatch {
                    path: child_path,
                    server: server.to_string(),
                    backend: backend.to_string(),
                });
            }
        }
        let target = ToolTarget {
            backend: backend.to_string(),
            tool: tool.maps_to.unwrap_or_else(|| name.clone()),
        };
        let schema = tool
            .input_schema
            .unwrap_or_else(|| serde_json::json!({ "type": "object" }));
        node.children.insert(
            name,
            CatalogNode::tool(child_path, tool.description, schema, target),
        );
    }

    Ok(node)
}

fn check_segment(parent: &str, segment: &str) -> Result<(), CatalogError> {
    if is_valid_segment(segment) {
        Ok(())
    } else {
        Err(CatalogError::InvalidSegment {
            parent: parent.to_string(),
            segment: segment.to_string(),
        })
    }
}
