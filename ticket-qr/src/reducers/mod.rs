//! Reducers for the rolling QR generator.

pub mod generator;

pub use generator::{BOOTSTRAP, EXPIRY_TIMER, GeneratorReducer, RETRY_TIMER, TICK_TIMER};
