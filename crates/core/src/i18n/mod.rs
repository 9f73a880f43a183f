//! Localized text resolution.
//!
//! Lookups never fail: a key falls through the active variant, the enriched
//! default set, the bundled constants, and finally renders as itself.

pub mod builtin;
pub mod catalog;
pub mod fallback;
pub mod locale;
pub mod resolver;

pub use catalog::ResourceCatalog;
pub use fallback::{Replacements, render, resolve};
pub use resolver::ResourceResolver;
