//! preppal - a retrieval engine for study materials.
//!
//! preppal extracts text from uploaded PDF, Word, spreadsheet and plain-text
//! files, splits it into overlapping character windows, embeds every window
//! with a sentence-transformers model run through
//! [candle](https://github.com/huggingface/candle), and answers queries by
//! inner-product search over the stored vectors.
//!
//! # Quick start
//!
//! ```no_run
//! use preppal::{DataDir, ModelManager, Retriever};
//! use preppal::chunking::ChunkingConfig;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let embedder = ModelManager::default().load().unwrap();
//! let retriever =
//!     Retriever::open(data_dir, embedder, ChunkingConfig::default()).unwrap();
//!
//! let outcome = retriever
//!     .index_document("Cell Biology", std::path::Path::new("biology.pdf"))
//!     .unwrap();
//! assert!(outcome.ok);
//!
//! for hit in retriever.search("what does the mitochondria do", 5).unwrap() {
//!     println!("{} #{} ({:.3}): {}", hit.title, hit.chunk_index, hit.score, hit.text);
//! }
//! ```

pub mod catalog_db;
pub mod chunking;
pub mod cli;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingestion;
pub mod mcp;
pub mod metadata_log;
pub mod model_manager;
pub mod retriever;
pub mod search;
pub mod vector_index;
pub mod walker;

pub use catalog_db::CatalogDb;
pub use data_dir::DataDir;
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use extract::DocumentKind;
pub use metadata_log::MetadataLog;
pub use model_manager::ModelManager;
pub use retriever::{IndexOutcome, Retriever, SearchHit};
pub use vector_index::VectorIndex;
