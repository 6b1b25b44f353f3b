mod defs;
pub use crate::defs::*;

mod canonical;
pub use crate::canonical::*;

mod analysis;
pub use crate::analysis::*;

mod cache;
pub use crate::cache::*;

mod partition;
pub use crate::partition::*;

mod gcov;
pub use crate::gcov::*;

mod file_walker;
pub use crate::file_walker::*;

mod config;
pub use crate::config::*;

mod coordinator;
pub use crate::coordinator::*;

mod summary;
pub use crate::summary::*;

mod output;
pub use crate::output::*;
