//! Request fabric for calls to leaf services.
//!
//! Every call runs under an [`OperationContext`](common::OperationContext):
//! tenant and span headers are attached by decorators, each attempt gets a
//! fresh timeout, and the whole call aborts when the context is cancelled.

pub mod backoff;
pub mod client;
pub mod error;
pub mod options;

pub use backoff::Backoff;
pub use client::{RestClient, host_from_env};
pub use error::{RequestError, Result};
pub use options::{HeaderDecorator, RequestOptions};
