pub mod timeline;

pub use timeline::{MemoryTimeline, Timeline};
