//! LTE eNodeB MAC radio resource scheduler.
//!
//! Every millisecond (one TTI) the scheduler decides, for a single FDD cell,
//! which bits go on the air: broadcast and paging, random-access responses,
//! and per-user downlink/uplink data, packed into the resource-block-group
//! grid with a collision-free PDCCH. The output of [`Scheduler::dl_sched`]
//! and [`Scheduler::ul_sched`] is handed to a PHY layer that executes it.
//!
//! The crate is `no_std` + `alloc`: allocation only happens when cells and
//! users are configured, never on the TTI hot path.

#![no_std]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;
#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
pub mod interface;
pub mod phy;
pub mod sched;
pub mod tti;

pub use crate::config::{CellConfig, SchedArgs, SibConfig, UeBearerConfig, UeConfig};
pub use crate::error::SchedError;
pub use crate::interface::{
	DlMetric, DlSchedResult, RrcPaging, UlAlloc, UlMetric, UlSchedResult,
};
pub use crate::sched::Scheduler;
