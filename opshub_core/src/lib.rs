//! # OpsHub Core
//!
//! Shared contracts for the OpsHub platform services:
//! - Data model: principals, devices, LLM providers and request shapes
//! - Token service: HMAC-signed access/refresh credentials
//! - Error taxonomy: one closed set of failure shapes -> HTTP envelope
//! - Domain events and the event-bus adapter
//! - Middlewares shared by the gateway and the downstream services

pub mod bus;
pub mod error;
pub mod events;
pub mod jwt;
pub mod logging;
pub mod middlewares;
pub mod models;

pub use bus::EventBus;
pub use error::{AuthReason, CoreError, ErrorEnvelope, UpstreamKind};
pub use events::{
  DeviceEventKind, DomainEvent, EventMetadata, LlmEventKind, Priority, WsMessage, WsMessageType,
  WsMetadata,
};
pub use jwt::{TokenClaims, TokenError, TokenManager, TokenType};
pub use middlewares::{request_id_middleware, TokenVerifier};
pub use models::auth::{Principal, Role};
