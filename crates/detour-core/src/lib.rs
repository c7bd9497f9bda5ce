//! Core types and traits for the Detour redirection store.
//!
//! This crate provides the redirection record, its validated building blocks
//! (paths, host patterns, status codes), the repository contract implemented
//! by storage backends and the [`RedirectionStorage`] contract implemented by
//! the engine.

pub mod error;
pub mod host;
pub mod path;
pub mod redirection;
pub mod repository;
pub mod status;
pub mod storage;

pub use error::{CoreError, RedirectionError, StorageError};
pub use host::{normalize_request_host, HostPattern};
pub use path::{SourcePath, TargetPath};
pub use redirection::{Redirection, RedirectionKey};
pub use repository::{ReadRepository, RedirectionIter, Repository, Write, WriteBatch};
pub use status::StatusCode;
pub use storage::{AddRedirection, RedirectionStorage};
