// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure policy types for the gateway control plane. Apart from config loading
//! nothing here performs I/O, and time is always passed in by the caller.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Guardrails, error taxonomy, limits, lifecycle clocks, breaker

pub mod error;
pub mod guardrail;
pub mod rate_limit;
pub mod lifecycle;
pub mod circuit_breaker;
pub mod cache;
pub mod exec_session;
pub mod outbound_queue;
pub mod gateway_config;
