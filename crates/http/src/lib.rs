//! ServiceGPT HTTP client
//!
//! Typed access to the ServiceGPT chat API: authentication, chat listing and
//! message exchange. Authorized calls go through a wrapper that refreshes an
//! expired access token exactly once and replays every request that failed
//! while the refresh was in flight.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod types;

pub use client::{
    ApiClient, ApiClientBuilder, ApiRequest, ClientConfig, RefreshMode,
    error::ClientError,
    listener::SessionListener,
    session::{AccessToken, RefreshCredential, SessionStore},
    storage::{CredentialStorage, FileStorage, MemoryStorage},
};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
