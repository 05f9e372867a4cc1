//! Peacefair — driver for Peacefair energy meters behind RTU-over-IP gateways
//!
//! The meter speaks Modbus RTU frames; a gateway carries those frames
//! verbatim over a TCP stream or UDP datagrams. This crate exposes a
//! [`Session`] that owns the one socket to a meter and serializes every
//! request/response exchange, and a [`PowerMeter`] that turns the raw input
//! registers into a scaled [`Reading`].
//!
//! Frame encoding and decoding lives in the `peacefair_protocol` package and
//! is re-exported as [`protocol`].

pub mod api;

pub use api::*;
pub use peacefair_protocol as protocol;
