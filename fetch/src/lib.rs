//! JSON-over-HTTP requests that settle a `Deferred`.
//!
//! Status codes of 400 and above reject with [`FetchError::Status`]; anything
//! that prevents a response from arriving rejects with
//! [`FetchError::Transport`].

mod client;
mod types;

pub use client::{Fetcher, fetch};
pub use types::{DEFAULT_TIMEOUT_SECS, FetchConfig, FetchError, FetchRequest, FetchResponse};

pub use reqwest::Method;
