use super::{assemble, is_valid_segment, Catalog, CatalogError, RawNode, RawTool};
use crate::domain::ToolDescriptor;

/// In-memory catalog construction, used for catalogs generated from live
/// tool listings and in tests.
///
/// Builder calls never fail; the first invalid segment is reported by
/// [`CatalogBuilder::build`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    root: RawNode,
    overview: Option<String>,
    invalid: Option<CatalogError>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overview(mut self, text: impl Into<String>) -> Self {
        self.overview = Some(text.into());
        self
    }

    /// Add (or describe) a backend category directly under the root.
    pub fn backend(self, name: &str, description: impl Into<String>) -> Self {
        self.category(name, description)
    }

    /// Add a backend with all of its tools directly under it.
    pub fn backend_tools(
        mut self,
        name: &str,
        description: impl Into<String>,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        self = self.backend(name, description);
        for tool in tools {
            self = self.tool(name, tool);
        }
        self
    }

    /// Add a category at `path`, creating missing parents.
    pub fn category(mut self, path: &str, description: impl Into<String>) -> Self {
        let description = description.into();
        if let Some(node) = self.node_mut(path) {
            node.description = description;
        }
        self
    }

    /// Add a tool to the category at `path`, creating missing parents.
    pub fn tool(mut self, path: &str, tool: ToolDescriptor) -> Self {
        if !is_valid_segment(&tool.name) {
            self.record(path, &tool.name);
            return self;
        }
        if let Some(node) = self.node_mut(path) {
            node.tools.insert(
                tool.name.clone(),
                RawTool {
                    description: tool.description.unwrap_or_default(),
                    input_schema: Some(tool.input_schema),
                    maps_to: Some(tool.name),
                    server: None,
                },
            );
        }
        self
    }

    pub fn build(self) -> Result<Catalog, CatalogError> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        assemble(self.root, self.overview)
    }

    fn node_mut(&mut self, path: &str) -> Option<&mut RawNode> {
        if let Some(bad) = path.split('/').find(|s| !is_valid_segment(s)) {
            let bad = bad.to_string();
            self.record(path, &bad);
            return None;
        }
        let mut node = &mut self.root;
        for segment in path.split('/') {
            node = node.categories.entry(segment.to_string()).or_default();
        }
        Some(node)
    }

    fn record(&mut self, parent: &str, segment: &str) {
        if self.invalid.is_none() {
            self.invalid = Some(CatalogError::InvalidSegment {
                parent: parent.to_string(),
                segment: segment.to_string(),
            });
        }
    }
}
