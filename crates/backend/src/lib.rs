//! Client-side contracts for the mnemo backend.
//!
//! The backend serves translation files, a semantic memory store, and a
//! trackable-unit ("chunk") registry. This crate holds the wire types, the
//! collaborator traits the core runtime is written against, an HTTP
//! implementation, and a scriptable in-process mock.

pub mod http;
pub mod mock;
pub mod provider;
pub mod types;

pub use provider::{
    BackendError, ChunkRegistry, MemoryBackend, StaticTranslations, TranslationProvider,
};
