//! Catalog exploration tools backed by a static fixture.
//!
//! The fixture comes from the `[[catalog]]` config section, so the loop
//! can be exercised end-to-end without workspace access. Output phrasing
//! matches what the assistant prompt expects ("Tables in main.sales: ...").

use async_trait::async_trait;
use servechat_config::{CatalogConfig, SchemaConfig};
use servechat_core::error::ToolError;
use servechat_core::message::Content;
use servechat_core::tool::Tool;
use std::sync::Arc;
use tracing::debug;

/// The catalog → schema → table/volume tree the tools read from.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    catalogs: Vec<CatalogConfig>,
}

impl Catalog {
    pub fn new(catalogs: Vec<CatalogConfig>) -> Self {
        Self { catalogs }
    }

    pub fn catalog_names(&self) -> Vec<&str> {
        self.catalogs.iter().map(|c| c.name.as_str()).collect()
    }

    fn catalog(&self, name: &str) -> Option<&CatalogConfig> {
        self.catalogs.iter().find(|c| c.name == name)
    }

    fn schema(&self, catalog: &str, schema: &str) -> Option<&SchemaConfig> {
        self.catalog(catalog)?
            .schemas
            .iter()
            .find(|s| s.name == schema)
    }
}

fn str_arg<'a>(
    tool: &str,
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments {
            tool_name: tool.into(),
            reason: format!("missing '{key}'"),
        })
}

fn schema_args_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "catalog_name": {
                "type": "string",
                "description": "Name of the catalog"
            },
            "schema_name": {
                "type": "string",
                "description": "Name of the schema"
            }
        },
        "required": ["catalog_name", "schema_name"]
    })
}

/// Resolve `catalog_name`/`schema_name`, failing with a message the model can act on.
fn resolve_schema<'a>(
    catalog: &'a Catalog,
    tool: &str,
    arguments: &serde_json::Value,
) -> Result<(String, &'a SchemaConfig), ToolError> {
    let c = str_arg(tool, arguments, "catalog_name")?;
    let s = str_arg(tool, arguments, "schema_name")?;
    debug!(tool, catalog = c, schema = s, "Resolving schema");
    if catalog.catalog(c).is_none() {
        return Err(ToolError::failed(tool, format!("catalog '{c}' does not exist")));
    }
    let schema = catalog
        .schema(c, s)
        .ok_or_else(|| ToolError::failed(tool, format!("schema '{c}.{s}' does not exist")))?;
    Ok((format!("{c}.{s}"), schema))
}

pub struct ListCatalogsTool {
    catalog: Arc<Catalog>,
}

impl ListCatalogsTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListCatalogsTool {
    fn name(&self) -> &str {
        "list_catalogs"
    }

    fn description(&self) -> &str {
        "List all available catalogs in the workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Optional case-insensitive filter on catalog names"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
        let query = arguments["query"].as_str().unwrap_or("").to_lowercase();
        let names: Vec<&str> = self
            .catalog
            .catalog_names()
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&query))
            .collect();

        Ok(Content::Text(if names.is_empty() {
            "No catalogs found in the workspace.".into()
        } else {
            format!("Available catalogs: {}", names.join(", "))
        }))
    }
}

pub struct ListSchemasTool {
    catalog: Arc<Catalog>,
}

impl ListSchemasTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListSchemasTool {
    fn name(&self) -> &str {
        "list_schemas"
    }

    fn description(&self) -> &str {
        "List all schemas in a specific catalog. Requires the catalog name as input."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "catalog_name": {
                    "type": "string",
                    "description": "Name of the catalog to list schemas from"
                }
            },
            "required": ["catalog_name"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
        let c = str_arg(self.name(), &arguments, "catalog_name")?;
        let catalog = self.catalog.catalog(c).ok_or_else(|| {
            ToolError::failed(self.name(), format!("catalog '{c}' does not exist"))
        })?;

        let names: Vec<&str> = catalog.schemas.iter().map(|s| s.name.as_str()).collect();
        Ok(Content::Text(if names.is_empty() {
            format!("No schemas found in catalog \"{c}\".")
        } else {
            format!("Schemas in catalog \"{c}\": {}", names.join(", "))
        }))
    }
}

pub struct ListTablesTool {
    catalog: Arc<Catalog>,
}

impl ListTablesTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "list_tables"
    }

    fn description(&self) -> &str {
        "List all tables in a specific schema. Requires catalog and schema names."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_args_schema()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
        let (qualified, schema) = resolve_schema(&self.catalog, self.name(), &arguments)?;

        let tables: Vec<String> = schema
            .tables
            .iter()
            .map(|t| format!("{} ({})", t.name, t.table_type))
            .collect();
        Ok(Content::Text(if tables.is_empty() {
            format!("No tables found in {qualified}.")
        } else {
            format!("Tables in {qualified}: {}", tables.join(", "))
        }))
    }
}

pub struct ListVolumesTool {
    catalog: Arc<Catalog>,
}

impl ListVolumesTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListVolumesTool {
    fn name(&self) -> &str {
        "list_volumes"
    }

    fn description(&self) -> &str {
        "List all volumes in a specific schema. Requires catalog and schema names."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        schema_args_schema()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<Content, ToolError> {
        let (qualified, schema) = resolve_schema(&self.catalog, self.name(), &arguments)?;

        Ok(Content::Text(if schema.volumes.is_empty() {
            format!("No volumes found in {qualified}.")
        } else {
            format!("Volumes in {qualified}: {}", schema.volumes.join(", "))
        }))
    }
}
