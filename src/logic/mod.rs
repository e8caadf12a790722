pub mod commit;
pub mod notify;
pub mod parse;
pub mod permission;
pub mod query;
pub mod refresh;

pub use commit::*;
pub use notify::*;
pub use parse::*;
pub use permission::*;
pub use query::*;
pub use refresh::*;
