pub mod identity;
pub mod member;
pub mod target;

pub use identity::*;
pub use member::*;
pub use target::*;
