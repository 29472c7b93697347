//! cache_purge tool implementation.
//!
//! Purges persisted assets by namespace and drops the matching memory
//! tables so later captures refetch.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stitchcap_client::AssetCache;
use stitchcap_core::{Error, Namespace};

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// Namespaces to clear. All three when omitted.
    #[serde(default)]
    pub namespaces: Option<Vec<Namespace>>,
}

/// Rows removed from one namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PurgedNamespace {
    pub namespace: Namespace,
    pub deleted: u64,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    pub namespaces: Vec<PurgedNamespace>,
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(cache: &AssetCache, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let namespaces = params.namespaces.unwrap_or_else(|| Namespace::ALL.to_vec());
    if namespaces.is_empty() {
        return Err(Error::InvalidInput("namespaces must not be empty; omit it to purge everything".to_string()).into());
    }

    // Pending write-throughs would otherwise land after the purge.
    cache.flush().await;

    let mut purged = Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        if purged.iter().any(|p: &PurgedNamespace| p.namespace == namespace) {
            continue;
        }
        let deleted = cache.persistent().purge(namespace).await?;
        cache.clear(namespace).await;
        tracing::info!(%namespace, deleted, "namespace purged");
        purged.push(PurgedNamespace { namespace, deleted });
    }

    let output = CachePurgeOutput { deleted: purged.iter().map(|p| p.deleted).sum(), namespaces: purged };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
