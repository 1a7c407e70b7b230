//! Built-in tools for servechat.
//!
//! The catalog tools let the assistant explore a catalog → schema →
//! table/volume tree. They read from a fixture supplied in config rather
//! than a live workspace.

pub mod catalog;

use servechat_core::error::ToolError;
use servechat_core::tool::ToolRegistry;
use std::sync::Arc;

pub use catalog::{Catalog, ListCatalogsTool, ListSchemasTool, ListTablesTool, ListVolumesTool};

/// Create the default tool registry over `catalog`.
///
/// Registration order is the order tools are advertised to the model.
pub fn default_registry(catalog: Arc<Catalog>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ListCatalogsTool::new(catalog.clone())))?;
    registry.register(Box::new(ListSchemasTool::new(catalog.clone())))?;
    registry.register(Box::new(ListTablesTool::new(catalog.clone())))?;
    registry.register(Box::new(ListVolumesTool::new(catalog)))?;
    Ok(registry)
}
