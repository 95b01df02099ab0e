//! Per-message processing pipeline.
//!
//! Every candidate message flows through the same ordered steps:
//! 1. `Classifier::classify()` — deterministic routing, LLM fallback
//! 2. `Orchestrator::process()` — conditional ingest, conditional draft,
//!    notify, commit marker
//!
//! The processed label is the only durable state: it is applied strictly
//! after notification succeeds, and a message without it is re-selected on
//! the next poll.

pub mod classifier;
pub mod orchestrator;
pub mod types;
