//! MCP server manifests
//!
//! Servers arrive as a JSON object (`name -> {command, args?, env?}`) and are
//! written for the backend CLIs as `{"mcpServers": {...}}`. Rewrites only
//! replace the `mcpServers` section; any other top-level keys already in the
//! file are preserved.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level key holding the server map
pub const MCP_SERVERS_KEY: &str = "mcpServers";

/// A local (stdio) MCP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Server name -> config, ordered for stable manifests
pub type McpServers = BTreeMap<String, McpServerConfig>;

/// Parse the server map from its JSON form
pub fn parse_servers(json: &str) -> Result<McpServers> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(McpServers::new());
    }
    serde_json::from_str(trimmed).context("Failed to parse MCP server map")
}

/// Write `servers` into the manifest at `path` (read-merge-write)
pub async fn write_manifest(path: &Path, servers: &McpServers) -> Result<()> {
    let mut root = match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => serde_json::Map::new(),
        Ok(content) => {
            let value: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse existing manifest {:?}", path))?;
            match value {
                serde_json::Value::Object(map) => map,
                _ => bail!("Existing manifest {:?} is not a JSON object", path),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::Map::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {:?}", path));
        }
    };

    root.insert(
        MCP_SERVERS_KEY.to_string(),
        serde_json::to_value(servers).context("Failed to serialize MCP servers")?,
    );

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }

    let mut content = serde_json::to_string_pretty(&serde_json::Value::Object(root))?;
    content.push('\n');
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;

    tracing::info!(
        "Wrote MCP manifest with {} servers to {:?}",
        servers.len(),
        path
    );
    Ok(())
}

/// Read the server map back from a manifest; missing file means no servers
pub async fn read_manifest(path: &Path) -> Result<McpServers> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Manifest {
        #[serde(default)]
        mcp_servers: McpServers,
    }

    if !path.exists() {
        tracing::debug!("No MCP manifest found at {:?}", path);
        return Ok(McpServers::new());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let manifest: Manifest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(manifest.mcp_servers)
}
