//! Backend API client and authentication.
//!
//! This module provides the [`AwsJsonClient`] for calling JSON-protocol
//! table and stream APIs, along with the [`Auth`] header settings and the
//! [`ServiceError`] raised for error responses.

mod auth;
mod aws;

pub use auth::Auth;
pub use aws::{AwsJsonClient, Protocol, ServiceError};
