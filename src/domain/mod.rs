// Domain layer: core models and ports (interfaces). Vendor types never appear here.

pub mod model;
pub mod ports;
pub mod table;
