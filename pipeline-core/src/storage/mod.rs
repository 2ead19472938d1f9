// pipeline-core/src/storage/mod.rs

//! Storage abstraction for dataset sources.
//!
//! Source readers never touch the filesystem directly: they resolve file
//! locators and open files through a [`StorageBackend`], so the same
//! pipeline can run against the local filesystem or an in-memory table.
//!
//! # Example
//!
//! ```no_run
//! use pipeline_core::config::StorageConfig;
//! use pipeline_core::storage::{LocalStorage, StorageBackend};
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//! let files = storage.glob("data/*.csv").unwrap();
//! let mut reader = storage.open_read(Path::new(&files[0])).unwrap();
//! let head = reader.read_range(0, 128).unwrap();
//! ```

mod local;
mod memory;
mod traits;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::{ObjectMeta, StorageBackend, StorageReader};
