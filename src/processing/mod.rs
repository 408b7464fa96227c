//! Frame processing applied between capture and the muxer

pub mod compositor;

pub use compositor::{composite, try_composite, CompositeStage};
