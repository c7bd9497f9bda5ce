//! Storage backends for the Detour redirection index.

pub mod memory;
pub mod mysql;

pub use detour_core::repository::{ReadRepository, RedirectionIter, Repository, Result};
pub use detour_core::{StorageError, Write, WriteBatch};
pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;
