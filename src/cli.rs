use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    retriever::DEFAULT_TOP_K,
    search::DEFAULT_CONTEXT_CHARS,
};

#[derive(Debug, Parser)]
#[command(
    name = "preppal",
    about = "Index study materials and retrieve the passages that matter"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID, local model path, or `hashing`
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Chunk size in characters
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import and index files or directories
    Add(AddArgs),
    /// Search indexed materials
    Search(SearchArgs),
    /// Print the grounding context for a query
    Context(ContextArgs),
    /// List indexed materials
    Materials(JsonArgs),
    /// Show system status and statistics
    Status(JsonArgs),
    /// Manage the embedding model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Title for the material (single file only; defaults to the file name)
    #[arg(long)]
    pub title: Option<String>,

    /// Index files in place instead of copying them into the data directory
    #[arg(long)]
    pub no_import: bool,

    /// Output outcomes as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Context --

#[derive(Debug, Parser)]
pub struct ContextArgs {
    /// The query to gather reference material for
    pub query: String,

    /// Number of chunks to draw from
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
    pub count: usize,

    /// Maximum length of the context in characters
    #[arg(long, default_value_t = DEFAULT_CONTEXT_CHARS)]
    pub max_chars: usize,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in the catalog
    Set {
        /// Model ID (HuggingFace), local path, or `hashing`
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "preppal",
            &mut std::io::stdout(),
        );
    }
}
