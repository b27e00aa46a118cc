// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod capability;
pub mod error_normalizer;
pub mod exec_backend;
pub mod internal_auth;
pub mod proxy_client;
pub mod redaction;
pub mod services_client;
pub mod session_token;
