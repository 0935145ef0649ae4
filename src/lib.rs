//! Straylight: tool dispatch and orchestration engine for the Braid CRM
//! backend.
//!
//! Every LLM-initiated action flows through one [`dispatch::Engine`]
//! invocation: access-token and policy gating, argument canonicalization,
//! read-through caching with write invalidation, rate limiting, real-time
//! metrics, asynchronous audit, and role-gated field redaction around a
//! single call into the external tool executor. [`chain::ChainExecutor`]
//! sequences dispatches with conditions, templating, and best-effort
//! rollback; [`graph::DependencyAnalyzer`] answers static impact questions
//! over the tool surface.

pub mod audit;
pub mod cache;
pub mod canon;
pub mod chain;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod filter;
pub mod gate;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod summary;
pub mod types;
