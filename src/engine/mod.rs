//! Module loading and tracking.
//!
//! A [`Module`] is the in-memory image of one compiled binary under analysis.
//! Each session owns exactly one [`ModuleResolver`], which binds loaded modules
//! to their canonical source path and forgets them on demand.

mod module;
mod resolver;

pub use module::Module;
pub use resolver::ModuleResolver;
