//! HTTP gateway over a ledger endpoint.
//!
//! Where the spammer drives open-loop load, the gateway is closed-loop: each
//! `POST /submit` signs one transaction, submits it and answers only once the
//! transaction is observed in a block (or with `504` once the confirmation
//! timeout passes). This lets external load tools such as HTTP benchmarkers
//! measure end-to-end confirmation latency per request.
//!
//! ```text
//! POST /submit?kind=transfer|invoke|cross-chain
//!     200 {"hash", "block_height", "delay_ms"}
//!     400 unknown or disabled kind
//!     502 submission rejected by the ledger
//!     503 no identity or submission slot available
//!     504 not confirmed in time
//! GET  /health
//! ```

pub mod config;
pub mod error;
pub mod server;

pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use server::{router, Gateway, GatewayState, HealthResponse, SubmitResponse};
