pub mod encode;
pub mod loader;
pub mod sink;
pub mod source;
pub mod typing;

pub use crate::domain::ports::{Catalog, Storage, TabularProvider};
pub use crate::utils::error::Result;
