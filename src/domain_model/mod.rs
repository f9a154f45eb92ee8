mod analysis;
mod event;
mod token;
mod user;

pub use analysis::*;
pub use event::*;
pub use token::*;
pub use user::*;
