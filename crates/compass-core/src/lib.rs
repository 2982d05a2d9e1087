//! Core types, traits, and services for the Compass control plane.
//!
//! This crate has no HTTP or database dependencies. Storage
//! backends implement [`store::ControlPlaneStore`]; the destination service
//! transport implements [`destination::DestinationService`].

pub mod assignment;
pub mod constraint;
pub mod destination;
pub mod engine;
pub mod error;
pub mod formation;
pub mod formation_service;
pub mod label;
pub mod operators;
pub mod orchestrator;
pub mod resource;
pub mod store;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
