//! Hybrid long-term memory: episodic stores (SQLite/FTS5, state-file,
//! in-memory), a knowledge graph, layered core/semantic/procedural stores,
//! multi-retriever recall with reciprocal-rank fusion, scoring, rerank,
//! compression, context assembly, and the extraction pipeline.

pub mod compression;
pub mod context;
pub mod engine;
mod engine_association;
mod engine_recall;
pub mod extract;
pub mod kg;
pub mod kg_store;
pub mod layers;
pub mod layers_sqlite;
pub mod layers_state;
pub mod maintenance;
pub mod pipeline;
pub mod retrieval;
pub mod scorers;
pub mod sqlite_store;
pub mod store;
pub mod types;
pub mod vector;

pub use context::MemoryContextBuilder;
pub use engine::{MemoryEngine, MemoryEngineParts};
pub use pipeline::{LayerWriter, MemoryPipeline};
pub use types::{CoreProfile, KgTriple, MemoryRecord, MemoryResult, ProceduralHabit, SemanticFact};
