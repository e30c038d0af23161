pub mod session;
pub mod sweeper;

pub use session::*;
pub use sweeper::*;
