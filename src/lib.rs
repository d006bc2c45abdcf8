//! Forwardgate - a web control plane for ephemeral TCP forwards
//!
//! This library launches and supervises instances of an external forwarding
//! tool (socat by default):
//! - Validates base/remote endpoints and spawns one forwarder per request
//! - Tracks each forwarder by an opaque id until it is stopped or dies
//! - Detects forwarders that die on their own with a liveness sweep
//! - Keeps a bounded, newest-first event log of starts, stops, and deaths
//! - Serves a status page and a small JSON API over HTTP

pub mod config;
pub mod error;
pub mod eventlog;
pub mod forward;
pub mod liveness;
pub mod page;
pub mod supervisor;
pub mod web;
