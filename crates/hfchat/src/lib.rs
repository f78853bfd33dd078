//! hfchat turns structured conversations into prompts for instruction-tuned
//! models and runs them against a text-generation-inference endpoint.
//!
//! # Overview
//! - [`format`] flattens system/human/assistant messages into one prompt with
//!   the model family's control tokens.
//! - [`generation`] describes a remote text-generation endpoint (single shot
//!   and streaming) and the sans-IO seam providers implement.
//! - [`adapters`] drives a provider over HTTP and builds chat models on top.
//! - [`blocking`] offers the same operations to synchronous callers.

/// Chat messages, results and the chat model trait
pub mod chat;

/// Conversation to prompt formatting
pub mod format;

/// Text-generation endpoint abstraction
pub mod generation;

/// Error types and handling
pub mod error;

/// Generation parameters
pub mod params;

#[cfg(feature = "http-client")]
pub mod outbound;

#[cfg(feature = "http-client")]
pub mod adapters;

#[cfg(feature = "http-client")]
pub mod blocking;

pub use params::GenerationParams;
