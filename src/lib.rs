//! Two-way ranging engine for UWB tags
//!
//! The entry point is [`TwrEngine`], which owns a [`Radio`] implementation, a
//! delay source and a [`HostLink`] towards the host computer. It drives
//! single- and double-sided two-way ranging exchanges, answers exchanges
//! initiated by peer tags, and can passively reconstruct exchanges between
//! other tags.
//!
//! Received frames reach the engine through the bounded handoff in
//! [`dispatcher`]: the radio interrupt only copies the frame into the queue,
//! the processing context then calls [`TwrEngine::process_pending`].
//!
//! Host commands are decoded by [`host::Command::parse`] and executed by
//! [`host::execute`].
//!
//! The register-level access to the transceiver is not part of this crate.
//! Implement [`Radio`] on top of your driver of choice.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod cir;
pub mod configs;
pub mod diagnostics;
pub mod dispatcher;
pub mod frame;
pub mod host;
pub mod radio;
pub mod time;
pub mod twr;

#[cfg(any(test, feature = "std"))]
pub mod sim;

pub use crate::{
    configs::{Config, TwrConfig},
    diagnostics::Diagnostics,
    frame::{Frame, FrameError, MessageType},
    host::HostLink,
    radio::{Radio, SendTime},
    twr::{Error, PassiveReport, RangingResult, TwrEngine},
};
