pub mod context;
pub mod counter;
pub mod hierarchy;
pub mod mcc;
pub mod permutations;
pub mod registration;
pub mod retry;
pub mod state;
pub mod tsv;

pub use context::*;
pub use counter::*;
pub use hierarchy::*;
pub use mcc::*;
pub use permutations::*;
pub use registration::*;
pub use retry::{retry, RetryError, RetryPolicy};
pub use state::*;
pub use tsv::*;
