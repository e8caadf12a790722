pub mod common;
pub mod entity;
pub mod notification;
pub mod ops;

pub use common::*;
pub use entity::*;
pub use notification::*;
pub use ops::*;
