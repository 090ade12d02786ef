// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! iaas Server - Infrastructure Provisioning Service
//!
//! This crate is the control plane for composing containerised building
//! blocks into operable units:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        External Clients (HTTP)                        │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        iaas-server (This Crate)                       │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ ┌─────────────┐  │
//! │  │ Postgres │ │  NGINX   │ │  Single  │ │  Stack  │ │Reconciliation│ │
//! │  │ Cluster  │ │ Cluster  │ │ Services │ │ Engine  │ │    Loop      │ │
//! │  └──────────┘ └──────────┘ └──────────┘ └─────────┘ └─────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ container ops                 │ state                │ events
//!          ▼                               ▼                      ▼
//!   Container runtime              Metadata store            Event bus
//!   (iaas-runtime)                 (iaas-core)               + websocket
//! ```
//!
//! Data flows top-down for creation (API → service → runtime adapter →
//! store + event bus) and bottom-up for status (runtime event stream →
//! reconciliation loop → store + cache invalidation + broadcast).
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`context`]: Per-request context (principal + cancellation)
//! - [`services`]: Provisioning engines for every resource type
//! - [`reconciler`]: The runtime-event consumer projecting status
//! - [`broadcast`]: Real-time status fan-out for websocket clients
//! - [`redis_bus`]: Redis-backed lifecycle event bus
//! - [`api`]: HTTP surface (axum)
//! - [`runtime`]: Embeddable runtime wiring everything together

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Per-request context carrying principal and cancellation.
pub mod context;

/// Provisioning engines.
pub mod services;

/// Runtime-event consumer projecting authoritative status.
pub mod reconciler;

/// Real-time status broadcast channel.
pub mod broadcast;

/// Redis-backed lifecycle event bus.
pub mod redis_bus;

/// HTTP API surface.
pub mod api;

/// Embeddable runtime for iaas-server.
pub mod runtime;

pub use config::Config;
pub use context::Ctx;
