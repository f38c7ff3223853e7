pub mod common;
pub mod experiment;
pub mod external_id;
pub mod factor;
pub mod person;
pub mod pool;
pub mod registration;
pub mod sample;
pub mod vocabulary;

pub use common::*;
pub use experiment::*;
pub use external_id::*;
pub use factor::*;
pub use person::*;
pub use pool::*;
pub use registration::*;
pub use sample::*;
pub use vocabulary::*;
