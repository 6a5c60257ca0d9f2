#[macro_use]
extern crate tracing;

pub mod controller;
pub mod crd;
pub mod error;
pub mod filter;
pub mod store;
pub mod webhook;
