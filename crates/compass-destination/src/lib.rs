//! HTTP transport for the destination service.
//!
//! [`DestinationServiceClient`] implements
//! [`compass_core::destination::DestinationService`] with `reqwest`, using
//! OAuth2 client-credential tokens cached per subaccount.

mod client;
mod config;
mod token;

pub mod error;

pub use client::DestinationServiceClient;
pub use config::DestinationServiceConfig;
pub use error::{Error, Result};
