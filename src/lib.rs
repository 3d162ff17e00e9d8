//! Fluxgate - Multi-tenant Integration Gateway
//!
//! Ingests business events from heterogeneous sources (polled relational
//! tables, Kafka topics, HTTP push), evaluates per-tenant routing rules,
//! transforms payloads, and delivers them reliably to external HTTP
//! endpoints with:
//! - Durable per-source checkpoints and at-least-once delivery
//! - Fingerprint deduplication with a TTL window
//! - Declarative and sandboxed-script transformations
//! - Per-rule rate limits and circuit breakers
//! - Retry with full-jitter backoff and a dead-letter queue
//! - Script-driven delayed and recurring deliveries

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
