//! Type definitions

pub mod import;
pub mod messages;
pub mod teacher;

pub use import::*;
pub use messages::*;
pub use teacher::*;
