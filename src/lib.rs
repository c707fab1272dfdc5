#[macro_use]
extern crate log;

pub mod chain;
pub mod config;
pub mod crypto;
pub mod p2p;
pub mod protocol;
