//! Acquisition core of the Tournesol environmental logger.
//!
//! # Overview
//!
//! The station sleeps until a DS3231 alarm pulls its wake line low, then
//! runs one acquisition cycle:
//!
//! - read the time from the RTC
//! - power the instruments and re-initialize them
//! - read every instrument into a checksummed binary frame
//! - append the frame to the log and power everything down again
//!
//! Everything here is hardware agnostic and builds on `embedded-hal` 1.0
//! traits, so the whole cycle runs on the host under test. The STM32L0
//! firmware binary (`firmware` feature) only wires real peripherals in.
//!
//! # Module Organization
//!
//! - [`time`] - Unix timestamp and BCD calendar conversions
//! - [`clock`] - DS3231 driver and alarm programming
//! - [`power`] - Instrument rails and the excitation relay
//! - [`sensors`] - Instrument drivers and the ordered registry
//! - [`frame`] - Frame layout and checksum
//! - [`storage`] - Append-only frame log on NOR flash
//! - [`sleep`] - Wake flag and the sleep/wake state machine
//! - [`status`] - Busy and fault indicator
//! - [`station`] - Boot and wake cycle orchestration

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible in every module
mod fmt;

pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod power;
pub mod sensors;
pub mod sleep;
pub mod station;
pub mod status;
pub mod storage;
pub mod time;

pub use error::{ErrorMask, FrameError, StorageError};
