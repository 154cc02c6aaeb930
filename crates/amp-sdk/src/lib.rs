//! Asynchronous client for the CubeCoders AMP panel API.
//!
//! Every call is an authenticated POST. The session token returned by
//! `Core/Login` is cached per credential set and shared across clones of the
//! client, so concurrent callers reuse one login.

pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod session;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ApiClient, ApiClientBuilder, SESSION_FIELD};
pub use credentials::{Credentials, CredentialsError, Settings};
pub use endpoints::{DeployRequest, PostCreateAction, RemoteUser, Template};
pub use error::ApiError;
pub use session::{AuthError, SessionCache, SessionStore, DEFAULT_SESSION_TTL};
