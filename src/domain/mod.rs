//! Domain specific structures, implementations, and logic

mod event;
mod subject;
mod subscription;

pub use event::*;
pub use subject::Subject;
pub use subscription::*;
