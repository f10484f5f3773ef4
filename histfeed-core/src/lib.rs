//! histfeed core — the ingestion and reconciliation pipeline.
//!
//! This crate contains the parts of the system that know nothing about
//! storage or notification:
//! - The wide date×symbol close-price table and its invariants
//! - The missing-close repair cascade
//! - Batch planning, provider alternation, and rate-window pacing
//! - The merge engine with the range-preservation guard
//! - The quote-provider capability and its two upstream sides
//! - The Eastern trading-session guard
//! - The run-scoped info/warning log

pub mod calendar;
pub mod dataset;
pub mod merge;
pub mod provider;
pub mod repair;
pub mod runlog;
pub mod schedule;
