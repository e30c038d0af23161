pub mod device;
pub mod session;
pub mod user;

pub use device::*;
pub use session::*;
pub use user::*;
