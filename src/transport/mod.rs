//! Transport module - TCP stream setup.

mod tcp;

pub use tcp::connect_tcp;
