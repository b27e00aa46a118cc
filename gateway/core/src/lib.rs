// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workspace Gateway Core
//!
//! Security and reliability control plane that sits between an untrusted
//! browser client and the per-tenant sandbox backend.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Guardrailed proxying, capability/session tokens, rate limiting,
//!   circuit breaking and bounded WebSocket dispatch

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
