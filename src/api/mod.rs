//! # REST API Module
//!
//! This module defines all HTTP endpoints exposed to collaborators.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/ice` | ICE servers for WebRTC clients |
//! | GET | `/wallet/:user` | Tokens owned by a user |
//! | GET | `/market/listings` | Open listings |
//! | POST | `/market/listings` | Create a listing |
//! | POST | `/market/listings/:id/cancel` | Cancel a listing |
//! | POST | `/market/listings/:id/fulfill` | Buy against a listing |
//! | GET | `/market/supply` | Treasury supply for a year |
//! | POST | `/admin/mint` | Mint treasury tokens |
//! | POST | `/payments/webhook` | Payment processor events |
//! | POST | `/billing/start` | Start billing a call |
//! | POST | `/billing/stop` | Stop billing a call |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
