//! Reads a catalog directory written by the structure generator.
//!
//! ```text
//! <dir>/root.json                  { "overview", "categories": { "<backend>": ... } }
//! <dir>/<backend>/<backend>.json   { "description", "tools": {..}, "categories": {..} }
//! <dir>/<backend>/<sub>/<sub>.json ...
//! ```
//!
//! A category reference is either a summary string (the node lives in its own
//! file) or an inline node object.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{assemble, is_valid_segment, join_path, Catalog, CatalogError, RawNode, RawTool};

const ROOT_FILE: &str = "root.json";

#[derive(Debug, Default, Deserialize)]
struct RootFile {
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    categories: BTreeMap<String, CategoryRef>,
    #[serde(default)]
    tools: BTreeMap<String, ToolEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    categories: BTreeMap<String, CategoryRef>,
    #[serde(default)]
    tools: BTreeMap<String, ToolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoryRef {
    Summary(String),
    Inline(NodeFile),
}

#[derive(Debug, Default, Deserialize)]
struct ToolEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    input_schema: Option<Value>,
    #[serde(default)]
    maps_to: Option<String>,
    #[serde(default)]
    server: Option<String>,
}

impl From<ToolEntry> for RawTool {
    fn from(entry: ToolEntry) -> Self {
        Self {
            description: entry.description.unwrap_or_default(),
            input_schema: entry.input_schema,
            maps_to: entry.maps_to,
            server: entry.server,
        }
    }
}

pub(super) fn load_dir(dir: &Path) -> Result<Catalog, CatalogError> {
    let root: RootFile = read_json(&dir.join(ROOT_FILE))?;
    if let Some(name) = root.tools.keys().next() {
        return Err(CatalogError::RootTool(name.clone()));
    }

    let mut raw = RawNode {
        description: root.description.unwrap_or_default(),
        ..Default::default()
    };
    for (name, reference) in root.categories {
        let node = load_category(dir, "", &name, reference)?;
        raw.categories.insert(name, node);
    }

    let catalog = assemble(raw, root.overview)?;
    info!(
        dir = %dir.display(),
        backends = catalog.backends().len(),
        tools = catalog.root().tool_count(),
        "Loaded tool catalog"
    );
    Ok(catalog)
}

fn load_category(
    parent_dir: &Path,
    parent_path: &str,
    name: &str,
    reference: CategoryRef,
) -> Result<RawNode, CatalogError> {
    if !is_valid_segment(name) {
        return Err(CatalogError::InvalidSegment {
            parent: parent_path.to_string(),
            segment: name.to_string(),
        });
    }
    let dir = parent_dir.join(name);
    let path = join_path(parent_path, name);

    let (file, summary) = match reference {
        CategoryRef::Inline(file) => (file, None),
        CategoryRef::Summary(summary) => {
            let file_path = dir.join(format!("{}.json", name));
            if !file_path.is_file() {
                warn!(path = %path, file = %file_path.display(), "Catalog node file missing; category is empty");
                return Ok(RawNode {
                    description: summary,
                    ..Default::default()
                });
            }
            debug!(file = %file_path.display(), "Reading catalog node");
            (read_json::<NodeFile>(&file_path)?, Some(summary))
        }
    };

    let description = match (file.description, summary) {
        (Some(d), _) if !d.trim().is_empty() => d,
        (_, Some(s)) => s,
        (d, None) => d.unwrap_or_default(),
    };

    let mut node = RawNode {
        description,
        ..Default::default()
    };
    for (sub, reference) in file.categories {
        let child = load_category(&dir, &path, &sub, reference)?;
        node.categories.insert(sub, child);
    }
    node.tools = file
        .tools
        .into_iter()
        .map(|(name, entry)| (name, RawTool::from(entry)))
        .collect();
    Ok(node)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
