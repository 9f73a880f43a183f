//! Client runtime for the memory plugin: localized text resolution plus
//! chat ingestion and retrieval augmentation against the memory service.

pub mod config;
pub mod error;
pub mod i18n;
pub mod io;
pub mod memory;
pub mod session;
pub mod settings;
pub mod types;

pub use config::{MnemoCfg, SharedCfg};
pub use error::MnemoError;
pub use session::{Backends, Session};
