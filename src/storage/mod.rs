// FILE: src/storage/mod.rs
pub mod catalog;
pub mod connection;
pub mod generation;
pub mod registry;
pub mod schema;
pub mod store;

// Common exports
pub use catalog::CatalogRepository;
pub use generation::{Generation, GenerationRef};
pub use registry::{CollectionRegistry, RegistryEntry};
pub use schema::{SchemaManager, TagColumn};
pub use store::{BuildToken, CollectionStore};
