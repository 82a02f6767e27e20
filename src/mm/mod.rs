//! Synthetic market making: price walk, per-symbol maker, registry.

pub mod config;
pub mod maker;
pub mod quoter;
pub mod random;
pub mod registry;
pub mod walk;
