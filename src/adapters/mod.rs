// Adapters layer: concrete implementations of the domain ports (storage, grids, catalog).

pub mod catalog;
pub mod ddl;
pub mod grid;
pub mod local;
