//! # Transcribe Relay
//!
//! WebSocket relay between browsers and a realtime speech-transcription service.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **error**: HTTP errors and the relay error taxonomy
//! - **relay**: Sessions, bridges, registry and connection acceptance
//! - **websocket**: The `/ws` endpoint and its per-connection actor
//! - **state**: Shared application state and metrics
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request metrics

pub mod config;      // Configuration management
pub mod error;       // Error types and HTTP error responses
pub mod health;      // Health check endpoints
pub mod middleware;  // Custom middleware
pub mod relay;       // Streaming relay core
pub mod state;       // Application state management
pub mod websocket;   // Browser WebSocket endpoint
