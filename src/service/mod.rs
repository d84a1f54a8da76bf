//! Service integrations for the kChat platform.
//!
//! This module contains:
//! - The kChat REST API trait and its HTTP client
//! - The websocket event stream
//! - The backend that ties both to the plugin chain
//!
//! The API defines a generic trait and a concrete implementation,
//! allowing for extensibility and easy testing.

pub mod api;
pub mod backend;
pub mod websocket;
