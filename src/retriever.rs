//! Retrieval orchestrator: ingestion and search over the paired vector index
//! and metadata log.
//!
//! The vector at position `i` of the index always describes the record in
//! slot `i` of the metadata log. Ingestion appends and persists vectors
//! before metadata, and every mutation happens under one write lock, so the
//! only divergence a crash can leave behind is a longer tail on one side.
//! [`Retriever::open`] trims that tail.

use std::{
    path::Path,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    catalog_db::{CatalogDb, Material},
    chunking::{ChunkingConfig, chunk_text},
    data_dir::DataDir,
    embedding::Embedder,
    error::{Error, Result},
    extract::{DocumentKind, Extraction, extract},
    metadata_log::{ChunkRecord, MetadataLog},
    vector_index::VectorIndex,
};

/// Number of hits returned when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 5;

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub material_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

/// Structured result of one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    pub kind: DocumentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexOutcome {
    fn indexed(material: &Material) -> Self {
        Self {
            ok: true,
            material_id: Some(material.material_id.clone()),
            chunk_count: Some(material.chunk_count),
            kind: material.kind,
            error: None,
        }
    }

    fn failed(kind: DocumentKind, error: &Error) -> Self {
        Self {
            ok: false,
            material_id: None,
            chunk_count: None,
            kind,
            error: Some(error.to_string()),
        }
    }
}

/// Sizes of the persisted state plus any repairs made when it was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrieverStats {
    pub model_id: String,
    pub dimension: usize,
    pub vectors: usize,
    pub metadata_slots: usize,
    pub malformed_records: usize,
    pub materials: u64,
    pub trimmed_vectors: usize,
    pub trimmed_records: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Repairs {
    trimmed_vectors: usize,
    trimmed_records: usize,
}

struct Stores {
    index: VectorIndex,
    metadata: MetadataLog,
}

impl Stores {
    /// Make index length and metadata slot count equal by trimming the
    /// longer tail.
    fn reconcile(&mut self) -> Result<Repairs> {
        let vectors = self.index.len();
        let slots = self.metadata.len();
        let mut repairs = Repairs::default();

        if vectors > slots {
            warn!(
                vectors,
                slots, "vector index is ahead of the metadata log, trimming"
            );
            self.index.truncate(slots);
            self.index.persist()?;
            repairs.trimmed_vectors = vectors - slots;
        } else if slots > vectors {
            warn!(
                vectors,
                slots, "metadata log is ahead of the vector index, trimming"
            );
            self.metadata.truncate(vectors)?;
            repairs.trimmed_records = slots - vectors;
        }

        Ok(repairs)
    }

    /// Append one document's vectors and records, keeping both stores
    /// aligned on failure.
    fn commit(
        &mut self,
        material_id: &str,
        vectors: &[Vec<f32>],
        records: &[ChunkRecord],
    ) -> Result<()> {
        let start = self.index.len();
        self.index.append(vectors)?;

        if let Err(e) = self.index.persist() {
            self.index.truncate(start);
            return Err(e);
        }

        if let Err(e) = self.metadata.append(records) {
            self.index.truncate(start);
            if let Err(persist_err) = self.index.persist() {
                warn!(
                    material_id,
                    "failed to roll back vector index on disk: {persist_err}"
                );
            }
            return Err(Error::PartialPersistFailure {
                material_id: material_id.to_string(),
                source: Box::new(e),
            });
        }

        Ok(())
    }
}

/// Owns the embedder, both stores and the material catalog.
pub struct Retriever {
    data_dir: DataDir,
    embedder: Box<dyn Embedder>,
    chunking: ChunkingConfig,
    catalog: CatalogDb,
    stores: RwLock<Stores>,
    repairs: Repairs,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("data_dir", &self.data_dir)
            .field("model_id", &self.embedder.model_id())
            .field("chunking", &self.chunking)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Open the stores under `data_dir`, opening the catalog as well.
    pub fn open(
        data_dir: DataDir,
        embedder: Box<dyn Embedder>,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let catalog = CatalogDb::open(&data_dir.catalog_db())?;
        Self::open_with_catalog(data_dir, catalog, embedder, chunking)
    }

    /// Open the stores using an already opened catalog.
    pub fn open_with_catalog(
        data_dir: DataDir,
        catalog: CatalogDb,
        embedder: Box<dyn Embedder>,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let index = VectorIndex::open_or_create(
            &data_dir.vector_index()?,
            embedder.dimension(),
        )?;
        let metadata = MetadataLog::open(&data_dir.metadata_log()?)?;

        let mut stores = Stores { index, metadata };
        let repairs = stores.reconcile()?;

        debug!(
            vectors = stores.index.len(),
            model = embedder.model_id(),
            "opened retriever"
        );

        Ok(Self {
            data_dir,
            embedder,
            chunking,
            catalog,
            stores: RwLock::new(stores),
            repairs,
        })
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn catalog(&self) -> &CatalogDb {
        &self.catalog
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Stores>> {
        self.stores.read().map_err(|_| Error::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Stores>> {
        self.stores.write().map_err(|_| Error::LockPoisoned)
    }

    /// Ingest a document, reporting recoverable failures as an outcome with
    /// `ok == false`.
    pub fn index_document(
        &self,
        title: &str,
        filepath: &Path,
    ) -> Result<IndexOutcome> {
        match self.try_index_document(title, filepath) {
            Ok(material) => Ok(IndexOutcome::indexed(&material)),
            Err(e) if e.is_recoverable() => {
                warn!(path = %filepath.display(), "indexing failed: {e}");
                Ok(IndexOutcome::failed(DocumentKind::from_path(filepath), &e))
            }
            Err(e) => Err(e),
        }
    }

    /// Ingest a document: extract, chunk, embed, then append to both stores
    /// and record it in the catalog.
    pub fn try_index_document(
        &self,
        title: &str,
        filepath: &Path,
    ) -> Result<Material> {
        let Extraction { kind, text } = extract(filepath);
        if text.is_empty() {
            return Err(Error::ExtractionFailed { kind });
        }

        let chunks = chunk_text(&text, self.chunking);
        if chunks.is_empty() {
            return Err(Error::NoValidContent { kind });
        }

        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let vectors = self.embedder.embed(&texts).map_err(|e| match e {
            Error::Embedding(_) => e,
            other => Error::Embedding(other.to_string()),
        })?;
        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        let material_id = uuid::Uuid::new_v4().to_string();
        let filepath_str = filepath.to_string_lossy().to_string();
        let records: Vec<ChunkRecord> = texts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| ChunkRecord {
                material_id: material_id.clone(),
                title: title.to_string(),
                filepath: filepath_str.clone(),
                kind,
                chunk_index,
                text,
            })
            .collect();

        self.write()?.commit(&material_id, &vectors, &records)?;

        let material = Material {
            material_id,
            title: title.to_string(),
            kind,
            filepath: filepath_str,
            chunk_count: records.len(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        if let Err(e) = self.catalog.add_material(&material) {
            warn!(
                material_id = %material.material_id,
                "indexed but could not record material in catalog: {e}"
            );
        }

        info!(
            material_id = %material.material_id,
            title,
            %kind,
            chunks = material.chunk_count,
            "indexed document"
        );
        Ok(material)
    }

    /// Return up to `top_k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 || self.read()?.metadata.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(query)?;

        let stores = self.read()?;
        if stores.index.is_empty() {
            return Ok(Vec::new());
        }

        let neighbors = stores.index.search(&query_vector, top_k)?;
        let hits: Vec<SearchHit> = neighbors
            .into_iter()
            .filter_map(|(position, score)| {
                let record = stores.metadata.get(position)?;
                Some(SearchHit {
                    material_id: record.material_id.clone(),
                    title: record.title.clone(),
                    kind: record.kind,
                    chunk_index: record.chunk_index,
                    text: record.text.clone(),
                    score,
                })
            })
            .collect();

        debug!(query, hits = hits.len(), "search complete");
        Ok(hits)
    }

    /// Every valid chunk record in insertion order.
    pub fn records(&self) -> Result<Vec<ChunkRecord>> {
        Ok(self.read()?.metadata.load_all())
    }

    pub fn stats(&self) -> Result<RetrieverStats> {
        let stores = self.read()?;
        Ok(RetrieverStats {
            model_id: self.embedder.model_id().to_string(),
            dimension: self.embedder.dimension(),
            vectors: stores.index.len(),
            metadata_slots: stores.metadata.len(),
            malformed_records: stores.metadata.holes(),
            materials: self.catalog.material_count()?,
            trimmed_vectors: self.repairs.trimmed_vectors,
            trimmed_records: self.repairs.trimmed_records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    const DIM: usize = 64;

    fn open(tmp: &tempfile::TempDir, chunking: ChunkingConfig) -> Retriever {
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        Retriever::open(data_dir, Box::new(HashingEmbedder::new(DIM)), chunking)
            .unwrap()
    }

    fn write_doc(tmp: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let dir = tmp.path().join("uploads");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn end_to_end_apple() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let path = write_doc(&tmp, "fruit.txt", "apple banana cherry");

        let outcome = retriever.index_document("Fruit", &path).unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.chunk_count, Some(4));
        assert_eq!(outcome.kind, DocumentKind::Text);

        let records = retriever.records().unwrap();
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["apple", "bana", "na ch", "erry"]);
        let indices: Vec<_> = records.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);

        let hits = retriever.search("apple", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "apple");
        assert_eq!(hits[0].title, "Fruit");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn stores_stay_aligned_across_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(20, 5));

        let a = write_doc(&tmp, "a.txt", &"cell membrane ".repeat(10));
        let b = write_doc(&tmp, "b.txt", &"mitochondria ".repeat(7));
        let first = retriever.index_document("A", &a).unwrap();
        let second = retriever.index_document("B", &b).unwrap();
        assert!(first.ok && second.ok);
        assert_ne!(first.material_id, second.material_id);

        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, stats.metadata_slots);
        assert_eq!(
            stats.vectors,
            first.chunk_count.unwrap() + second.chunk_count.unwrap()
        );
        assert_eq!(stats.materials, 2);
    }

    #[test]
    fn search_is_bounded_by_k() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let path = write_doc(&tmp, "three.txt", "aaaaabbbbbccccc");
        retriever.index_document("Three", &path).unwrap();

        assert_eq!(retriever.search("aaaaa", 10).unwrap().len(), 3);
        assert!(retriever.search("aaaaa", 0).unwrap().is_empty());
    }

    #[test]
    fn hits_are_sorted_by_score() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(12, 0));
        let path = write_doc(
            &tmp,
            "bio.txt",
            "photosynthesgeology rockshistory wars",
        );
        retriever.index_document("Bio", &path).unwrap();

        let hits = retriever.search("photosynthes", 3).unwrap();
        assert_eq!(hits[0].text, "photosynthes");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn empty_corpus_returns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::default());
        assert!(retriever.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn unextractable_document_is_a_failed_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::default());

        let pdf = write_doc(&tmp, "broken.pdf", "not a pdf");
        let outcome = retriever.index_document("Broken", &pdf).unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.kind, DocumentKind::Pdf);
        assert!(outcome.error.unwrap().contains("extraction failed"));

        let blank = write_doc(&tmp, "blank.txt", "   \n\t  ");
        let outcome = retriever.index_document("Blank", &blank).unwrap();
        assert!(!outcome.ok);
        let err = retriever.try_index_document("Blank", &blank).unwrap_err();
        assert!(matches!(
            err,
            Error::NoValidContent {
                kind: DocumentKind::Text
            }
        ));

        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.metadata_slots, 0);
        assert_eq!(stats.materials, 0);
    }

    #[test]
    fn try_index_surfaces_error_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::default());
        let path = write_doc(&tmp, "deck.pptx", "slides");

        let err = retriever.try_index_document("Deck", &path).unwrap_err();
        assert!(matches!(
            err,
            Error::ExtractionFailed {
                kind: DocumentKind::Unknown
            }
        ));
    }

    #[test]
    fn outcome_json_omits_absent_fields() {
        let outcome = IndexOutcome::failed(
            DocumentKind::Word,
            &Error::ExtractionFailed {
                kind: DocumentKind::Word,
            },
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["kind"], "docx");
        assert!(json.get("material_id").is_none());
        assert!(json.get("chunk_count").is_none());
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let retriever = open(&tmp, ChunkingConfig::new(5, 0));
            let path = write_doc(&tmp, "fruit.txt", "apple banana cherry");
            retriever.index_document("Fruit", &path).unwrap();
        }

        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let hits = retriever.search("erry", 1).unwrap();
        assert_eq!(hits[0].text, "erry");
        assert_eq!(hits[0].chunk_index, 3);
        assert_eq!(retriever.catalog().list_materials().unwrap().len(), 1);
    }

    #[test]
    fn reopen_trims_extra_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let retriever = open(&tmp, ChunkingConfig::new(5, 0));
            let path = write_doc(&tmp, "fruit.txt", "apple banana cherry");
            retriever.index_document("Fruit", &path).unwrap();
        }

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let index_path = data_dir.vector_index().unwrap();
        let mut index = VectorIndex::open_or_create(&index_path, DIM).unwrap();
        index
            .append(&[vec![0.0; DIM], vec![0.0; DIM]])
            .unwrap();
        index.persist().unwrap();

        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.metadata_slots, 4);
        assert_eq!(stats.trimmed_vectors, 2);

        let reloaded = VectorIndex::open_or_create(&index_path, DIM).unwrap();
        assert_eq!(reloaded.len(), 4);
    }

    #[test]
    fn reopen_trims_extra_records() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let retriever = open(&tmp, ChunkingConfig::new(5, 0));
            let path = write_doc(&tmp, "fruit.txt", "apple banana cherry");
            retriever.index_document("Fruit", &path).unwrap();
        }

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let index_path = data_dir.vector_index().unwrap();
        let mut index = VectorIndex::open_or_create(&index_path, DIM).unwrap();
        index.truncate(1);
        index.persist().unwrap();

        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.metadata_slots, 1);
        assert_eq!(stats.trimmed_records, 3);
        assert_eq!(retriever.search("apple", 5).unwrap()[0].text, "apple");
    }

    #[test]
    fn metadata_append_failure_rolls_back_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let fruit = write_doc(&tmp, "fruit.txt", "apple banana cherry");
        assert!(retriever.index_document("Fruit", &fruit).unwrap().ok);

        let log_path = retriever.data_dir().metadata_log().unwrap();
        let saved = std::fs::read(&log_path).unwrap();
        std::fs::remove_file(&log_path).unwrap();
        std::fs::create_dir(&log_path).unwrap();

        let notes = write_doc(&tmp, "notes.txt", "mitochondria ribosome");
        let err = retriever.try_index_document("Notes", &notes).unwrap_err();
        assert!(matches!(err, Error::PartialPersistFailure { .. }));

        let outcome = retriever.index_document("Notes", &notes).unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.kind, DocumentKind::Text);

        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.metadata_slots, 4);
        assert_eq!(stats.materials, 1);
        drop(retriever);

        let index_path = DataDir::resolve(Some(tmp.path()))
            .unwrap()
            .vector_index()
            .unwrap();
        assert_eq!(
            VectorIndex::open_or_create(&index_path, DIM).unwrap().len(),
            4
        );

        std::fs::remove_dir(&log_path).unwrap();
        std::fs::write(&log_path, saved).unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.trimmed_vectors, 0);
        assert_eq!(stats.trimmed_records, 0);
    }

    #[test]
    fn index_persist_failure_rolls_back_append() {
        let tmp = tempfile::tempdir().unwrap();
        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let fruit = write_doc(&tmp, "fruit.txt", "apple banana cherry");
        assert!(retriever.index_document("Fruit", &fruit).unwrap().ok);

        let index_path = retriever.data_dir().vector_index().unwrap();
        let tmp_path = index_path.with_extension("idx.tmp");
        std::fs::create_dir(&tmp_path).unwrap();

        let notes = write_doc(&tmp, "notes.txt", "mitochondria ribosome");
        let err = retriever.index_document("Notes", &notes).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.metadata_slots, 4);
        assert_eq!(stats.materials, 1);

        std::fs::remove_dir(&tmp_path).unwrap();
        let outcome = retriever.index_document("Notes", &notes).unwrap();
        assert!(outcome.ok);
        let stats = retriever.stats().unwrap();
        assert_eq!(stats.vectors, stats.metadata_slots);
        assert_eq!(stats.vectors, 4 + outcome.chunk_count.unwrap());
    }

    #[test]
    fn malformed_metadata_line_keeps_alignment() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let retriever = open(&tmp, ChunkingConfig::new(5, 0));
            let path = write_doc(&tmp, "fruit.txt", "apple banana cherry");
            retriever.index_document("Fruit", &path).unwrap();
        }

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let log_path = data_dir.metadata_log().unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        let mut lines: Vec<String> =
            contents.lines().map(str::to_string).collect();
        lines[1] = "{corrupted".to_string();
        std::fs::write(&log_path, lines.join("\n") + "\n").unwrap();

        let retriever = open(&tmp, ChunkingConfig::new(5, 0));
        let stats = retriever.stats().unwrap();
        assert_eq!(stats.metadata_slots, 4);
        assert_eq!(stats.malformed_records, 1);
        assert_eq!(retriever.records().unwrap().len(), 3);

        let hits = retriever.search("na ch", 4).unwrap();
        assert_eq!(hits[0].text, "na ch");
        assert_eq!(hits.len(), 3);
    }
}
