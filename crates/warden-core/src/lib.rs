//! # warden-core
//!
//! Foundation types for the warden in-app security pipeline.
//!
//! This crate provides the shared vocabulary the runtime crate builds on:
//!
//! - **Rules**: [`rules::Rule`] with purpose/dry-run/block flags,
//!   [`rules::ExceptionCap`] auto-disable policy, [`rules::Phase`] and
//!   [`rules::Status`] closed enums
//! - **Telemetry**: [`telemetry::Attack`], [`telemetry::Observation`],
//!   [`telemetry::DataPoint`], [`telemetry::ExceptionEvent`]
//! - **Errors**: [`errors::CallbackError`] returned by rule bodies,
//!   [`errors::CoreError`]
//! - **Logging**: [`logging::init_logging`] tracing bootstrap
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `warden-settings` and `warden-runtime`.

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod rules;
pub mod telemetry;
