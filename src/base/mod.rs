//! Core components, types, and utilities for the kchat-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Error taxonomy for the kChat API and backend.
//! - Message body preparation.
//! - Common types and result handling.

pub mod config;
pub mod error;
pub mod text;
pub mod types;
