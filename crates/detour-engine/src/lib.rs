//! Redirect resolution and write-time chain compression on top of a
//! [`Repository`][detour_core::Repository].
//!
//! [`RedirectionEngine`] implements [`RedirectionStorage`][detour_core::RedirectionStorage]
//! for any repository; the `detour` binary drives it from the command line.

mod cascade;
pub mod config;
pub mod engine;
pub mod hit_counter;
pub mod matcher;

pub use config::EngineConfig;
pub use engine::RedirectionEngine;
pub use hit_counter::HitCounter;
pub use matcher::HostMatcher;
