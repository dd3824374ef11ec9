//! Scheduler error values.
//!
//! Only control-plane failures surface as errors. Hot-path conditions (CCE
//! exhaustion, RAR window expiry, a HARQ process missing for Msg3) are
//! recoverable: the affected emission is skipped and logged, other emissions
//! proceed, and no error ever aborts a TTI.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedError {
	/// Feedback or configuration for an RNTI that is not in the UE database.
	#[error("user rnti={0:#06x} not found")]
	UnknownRnti(u16),
	/// `dl_rach_info` found no free slot in the pending-RAR ring.
	#[error("maximum number of pending RAR exceeded")]
	NoFreeRarSlot,
	/// `cell_cfg` rejected the configuration.
	#[error("invalid cell configuration: {0}")]
	InvalidCellCfg(&'static str),
	/// The Format 1A MCS search exhausted indices 0..=26.
	#[error("no Format 1A MCS carries {0} bytes")]
	TbsTooLarge(u32),
}
