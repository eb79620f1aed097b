#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod climate;
pub mod engine;
pub mod protocol;
