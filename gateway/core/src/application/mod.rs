// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context;
pub mod exec_sessions;
pub mod supervisor;
pub mod ws_lifecycle;
