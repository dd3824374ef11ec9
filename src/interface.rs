//! Collaborator seams and per-TTI result payloads.
//!
//! The scheduler consumes three capabilities injected at configuration time:
//! the RRC paging oracle and the downlink/uplink metrics that pick which HARQ
//! process each user is served on. Metrics hand back a process *id* rather
//! than a reference; the scheduler owns the UE database and resolves the id
//! while it still holds the user.

use alloc::collections::BTreeMap;

use heapless::Vec;

use crate::config::{
	MAX_BC_LIST, MAX_DATA_LIST, MAX_PDU_LIST, MAX_PHICH_LIST, MAX_PUSCH_LIST, MAX_RAR_GRANTS,
	MAX_RAR_LIST,
};
use crate::phy::ra::{DciFormat0, DciFormat1, DciFormat1a, DciLocation};
use crate::sched::ue::SchedUe;

/// RRC collaborator: paging schedule.
pub trait RrcPaging: Send {
	/// Pending paging payload in bytes for `tti`, or 0.
	fn is_paging_opportunity(&mut self, tti: u32) -> u32;
}

/// Downlink metric: picks the DL HARQ process to serve per user.
pub trait DlMetric: Send {
	fn new_tti(
		&mut self,
		ue_db: &BTreeMap<u16, SchedUe>,
		start_rbg: u32,
		avail_rbg: u32,
		nof_ctrl_symbols: u32,
		tti: u32,
	);

	/// Returns the id of the DL HARQ process to serve, after staking out the
	/// RBGs it will occupy, or `None` to skip this user in this TTI.
	fn get_user_allocation(&mut self, ue: &mut SchedUe) -> Option<usize>;
}

/// Uplink metric: places users on the PUSCH PRB grid.
pub trait UlMetric: Send {
	fn new_tti(&mut self, ue_db: &BTreeMap<u16, SchedUe>, nof_prb: u32, tti: u32);

	/// Marks a PRB interval as reserved (Msg3, PUCCH).
	fn update_allocation(&mut self, alloc: UlAlloc);

	/// Returns the id of the UL HARQ process to serve, after writing its PRB
	/// allocation into the process, or `None` to skip this user.
	fn get_user_allocation(&mut self, ue: &mut SchedUe) -> Option<usize>;
}

/// A contiguous uplink PRB interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UlAlloc {
	pub rb_start: u32,
	pub l: u32,
}

/// Broadcast element class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcType {
	Bcch,
	Pcch,
}

/// One broadcast (SIB or paging) emission.
#[derive(Debug, Clone)]
pub struct DlSchedBc {
	pub bc_type: BcType,
	/// SIB index for BCCH elements.
	pub index: u32,
	pub dci: DciFormat1a,
	pub dci_location: DciLocation,
	/// Bits for paging, bytes for SIBs (the configured payload length).
	pub tbs: u32,
}

/// The uplink grant carried inside a RAR.
#[derive(Debug, Clone, Copy)]
pub struct RarGrant {
	pub ra_id: u32,
	pub tpc_pusch: u32,
	pub trunc_mcs: u32,
	/// Type-2 RIV of the Msg3 allocation.
	pub rba: u32,
}

/// One random access response emission.
#[derive(Debug, Clone)]
pub struct DlSchedRar {
	pub rarnti: u16,
	pub dci: DciFormat1a,
	pub dci_location: DciLocation,
	pub tbs: u32,
	pub grants: Vec<RarGrant, MAX_RAR_GRANTS>,
}

/// One MAC PDU slice: a logical channel id (or MAC CE code) and its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduItem {
	pub lcid: u8,
	pub nbytes: u32,
}

/// One per-user downlink data emission.
#[derive(Debug, Clone)]
pub struct DlSchedData {
	pub rnti: u16,
	pub dci: DciFormat1,
	pub dci_location: DciLocation,
	pub tbs: u32,
	pub pdu: Vec<PduItem, MAX_PDU_LIST>,
}

/// One PUSCH grant.
#[derive(Debug, Clone)]
pub struct UlSchedPusch {
	pub rnti: u16,
	pub needs_pdcch: bool,
	pub dci: DciFormat0,
	pub dci_location: DciLocation,
	pub tbs: u32,
	pub alloc: UlAlloc,
}

/// PHICH content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhichValue {
	Ack,
	Nack,
}

/// One PHICH emission.
#[derive(Debug, Clone, Copy)]
pub struct UlSchedPhich {
	pub rnti: u16,
	pub phich: PhichValue,
}

/// Result of one `dl_sched` call.
#[derive(Debug, Clone, Default)]
pub struct DlSchedResult {
	pub cfi: u32,
	pub bc: Vec<DlSchedBc, MAX_BC_LIST>,
	pub rar: Vec<DlSchedRar, MAX_RAR_LIST>,
	pub data: Vec<DlSchedData, MAX_DATA_LIST>,
}

/// Result of one `ul_sched` call.
#[derive(Debug, Clone, Default)]
pub struct UlSchedResult {
	pub pusch: Vec<UlSchedPusch, MAX_PUSCH_LIST>,
	pub phich: Vec<UlSchedPhich, MAX_PHICH_LIST>,
}
