//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::cache::{CachePurgeParams, purge_impl};
use crate::tools::capture::{PageCaptureParams, capture_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use stitchcap_client::{AssetCache, FetchClient, FetchConfig, Fetcher, HydrationReport};
use stitchcap_core::{AppConfig, AssetStore, Error};

/// Process-wide state shared by every tool call.
pub struct ServerState {
    pub config: AppConfig,
    pub cache: Arc<AssetCache>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// The main MCP server handler for stitchcap.
#[derive(Clone)]
pub struct StitchcapServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl StitchcapServer {
    /// Create a new server handler.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        let fetcher = FetchClient::new(FetchConfig::from(&config))?;
        let cache = Arc::new(AssetCache::new(Arc::new(AssetStore::new(config.db_path.clone()))));
        let state = ServerState { config, cache, fetcher: Arc::new(fetcher) };
        Ok(Self { state: Arc::new(state), tool_router: Self::tool_router() })
    }

    /// Open the asset store and load cached fonts and images into memory.
    ///
    /// A store that cannot be opened is logged; captures then run
    /// memory-only.
    pub async fn warm_up(&self) -> HydrationReport {
        if let Err(e) = self.state.cache.persistent().init().await {
            tracing::warn!(error = %e, "asset store unavailable; continuing memory-only");
        }
        self.state.cache.hydrate().await
    }

    /// Capture page elements into one stitched image.
    ///
    /// Opens the URL in a headless browser, selects the matching elements,
    /// and returns the image together with a JSON summary.
    #[tool(
        description = "Open a URL, select elements with a CSS selector, and stitch them top to bottom into one image (webp, jpeg or png). Optionally saves the image to a directory."
    )]
    async fn page_capture(&self, params: Parameters<PageCaptureParams>) -> Result<CallToolResult, McpError> {
        capture_impl(&self.state, params.0).await
    }

    /// Purge persisted fonts, images and font mappings.
    #[tool(description = "Delete cached font mappings, font data and image data. Clears all namespaces when none are given.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.state.cache, params.0).await
    }
}

impl ServerHandler for StitchcapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "stitchcap".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
