use std::{path::PathBuf, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    catalog_db::Material,
    error::{self, Error},
    ingestion,
    retriever::{DEFAULT_TOP_K, Retriever, SearchHit},
    search::{self, DEFAULT_CONTEXT_CHARS},
};

#[derive(Clone)]
pub struct PreppalMcpServer {
    retriever: Arc<Retriever>,
    tool_router: ToolRouter<Self>,
}

impl PreppalMcpServer {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            retriever: Arc::new(retriever),
            tool_router: Self::tool_router(),
        }
    }

    /// Run retriever work on the blocking pool; embedding and disk I/O
    /// must not stall the async transport.
    async fn blocking<T, F>(
        &self,
        what: &str,
        f: F,
    ) -> Result<T, rmcp::ErrorData>
    where
        F: FnOnce(&Retriever) -> error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let retriever = Arc::clone(&self.retriever);
        tokio::task::spawn_blocking(move || f(&retriever))
            .await
            .map_err(|e| mcp_error("background task failed", e))?
            .map_err(|e| match e {
                Error::NotFound { .. } => {
                    rmcp::ErrorData::invalid_params(e.to_string(), None)
                }
                other => mcp_error(what, other),
            })
    }
}

#[tool_router(router = tool_router)]
impl PreppalMcpServer {
    /// Extract, chunk, embed and index a document.
    #[tool(
        name = "preppal_index",
        description = "Index a PDF, DOCX, XLSX/XLS or TXT file so its passages can be searched. The file is copied into the data directory unless import is false."
    )]
    pub async fn preppal_index(
        &self,
        params: Parameters<IndexParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let path = params.path.clone();
        let import = params.import.unwrap_or(true);

        let outcome = self
            .blocking("indexing failed", move |r| {
                ingestion::add_file(r, &params.path, params.title.as_deref(), import)
            })
            .await?;

        let summary = if outcome.ok {
            format!(
                "Indexed {} as {} ({} chunks, {})",
                path.display(),
                outcome.material_id.as_deref().unwrap_or_default(),
                outcome.chunk_count.unwrap_or_default(),
                outcome.kind
            )
        } else {
            format!(
                "Failed to index {}: {}",
                path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            )
        };

        let structured = serde_json::to_value(&outcome)
            .map_err(|e| mcp_error("failed to serialize outcome", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(!outcome.ok);
        Ok(result)
    }

    /// Semantic search over indexed chunks.
    #[tool(
        name = "preppal_search",
        description = "Find the indexed passages most similar to a query. Returns up to topK chunks (default 5), best first."
    )]
    pub async fn preppal_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = clamp_top_k(params.top_k);
        let query = params.query.clone();

        let hits = self
            .blocking("search failed", move |r| r.search(&params.query, top_k))
            .await?;

        let summary = format_search_summary(&hits, &query);
        let structured = serde_json::to_value(SearchResponse {
            query,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }

    /// Reference material for grounding a prompt.
    #[tool(
        name = "preppal_context",
        description = "Build a reference-material block for a query by joining the best matching passages, capped at maxChars characters (default 4000)."
    )]
    pub async fn preppal_context(
        &self,
        params: Parameters<ContextParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let top_k = clamp_top_k(params.top_k);
        let max_chars = params.max_chars.unwrap_or(DEFAULT_CONTEXT_CHARS);
        let query = params.query.clone();

        let hits = self
            .blocking("search failed", move |r| r.search(&params.query, top_k))
            .await?;
        let context = search::build_context(&hits, max_chars);

        let structured = json!({
            "query": query,
            "hitCount": hits.len(),
            "context": context,
        });

        let mut result = CallToolResult::success(vec![Content::text(context)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }

    /// List indexed materials.
    #[tool(
        name = "preppal_materials",
        description = "List every indexed material with its id, title, kind and chunk count."
    )]
    pub async fn preppal_materials(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let materials = self
            .blocking("failed to list materials", |r| {
                r.catalog().list_materials()
            })
            .await?;

        let summary = format_materials_summary(&materials);
        let structured = json!({ "materials": materials });

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for PreppalMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("preppal", env!("CARGO_PKG_VERSION"))
                    .with_title("preppal MCP"),
            )
            .with_instructions(
                "Use preppal_index to add study materials, preppal_search to find relevant passages and preppal_context to ground a prompt in them.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexParams {
    /// Path of the file to index.
    pub path: PathBuf,
    /// Display title (default: the file name).
    pub title: Option<String>,
    /// Copy the file into the data directory first (default: true).
    pub import: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 5).
    pub top_k: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    /// Query to gather reference material for.
    pub query: String,
    /// Number of passages to draw from (default: 5).
    pub top_k: Option<i64>,
    /// Maximum context length in characters (default: 4000).
    pub max_chars: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

/// Negative counts mean "nothing".
fn clamp_top_k(top_k: Option<i64>) -> usize {
    match top_k {
        None => DEFAULT_TOP_K,
        Some(k) => usize::try_from(k).unwrap_or(0),
    }
}

fn format_search_summary(hits: &[SearchHit], query: &str) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        hits.len(),
        suffix
    ));

    for hit in hits {
        lines.push(format!(
            "{:.3} {} #{}: {}",
            hit.score, hit.title, hit.chunk_index, hit.text
        ));
    }

    lines.join("\n")
}

fn format_materials_summary(materials: &[Material]) -> String {
    if materials.is_empty() {
        return "No materials indexed.".to_string();
    }

    materials
        .iter()
        .map(|m| {
            format!(
                "{} {} ({}, {} chunks)",
                m.material_id, m.title, m.kind, m.chunk_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(retriever: Retriever) -> error::Result<()> {
    let server = PreppalMcpServer::new(retriever);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}
