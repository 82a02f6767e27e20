pub mod account;
pub mod enums;
pub mod event;
pub mod symbol;

pub use account::*;
pub use enums::*;
pub use event::*;
pub use symbol::*;
