// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-server
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// JWT validation.
pub mod auth;
/// The socket bus and connection loop.
pub mod bus;
/// The command lane.
pub mod commands;
/// Environment configuration and preflight.
pub mod config;
/// HTTP admin facade.
pub mod http;
/// Facade request metrics.
pub mod metrics;
/// Tier-Omega lane.
pub mod omega;
/// Standard operator pack.
pub mod pack;

pub use auth::{Claims, JwtAuthError, issue_hs256_token, validate_jwt};
pub use bus::{BusCore, SocketBus, build_ws_router, serve};
pub use commands::{COMMANDS, CommandError, CommandSpec, find_command};
pub use config::{ArqonBusConfig, InfraProtocol, PreflightError};
pub use http::{AdminSignal, AdminState, build_admin_app};
pub use omega::OmegaLane;
