pub mod memory;
pub mod postgres;
pub mod session_cache;
pub mod traits;

pub use memory::*;
pub use postgres::*;
pub use session_cache::*;
pub use traits::*;
