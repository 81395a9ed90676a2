pub mod bluez;

pub use bluez::*;
