pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::*;
pub use postgres::*;
pub use store::*;
