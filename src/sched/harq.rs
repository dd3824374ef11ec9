//! HARQ process state.
//!
//! Each UE owns eight processes per direction. Downlink processes are picked
//! by the metric and matched to feedback by their scheduling TTI; uplink
//! processes are synchronous, `tti % 8` names the process transmitting in
//! `tti`. The FDD round trip is 8 TTIs.

use crate::interface::UlAlloc;
use crate::phy::ra;
use crate::tti;

/// FDD HARQ round-trip time in TTIs.
pub const HARQ_RTT: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
struct HarqCommon {
	active: bool,
	ndi: bool,
	tti: u32,
	n_rtx: u32,
	max_retx: u32,
}

impl HarqCommon {
	fn new_tx(&mut self, tti: u32) {
		self.active = true;
		self.ndi = !self.ndi;
		self.tti = tti;
		self.n_rtx = 0;
	}

	/// Applies feedback. Returns `true` if the retry budget is exhausted and
	/// the transport block was dropped.
	fn set_feedback(&mut self, positive: bool) -> bool {
		if positive {
			self.active = false;
			return false;
		}
		self.n_rtx += 1;
		if self.n_rtx >= self.max_retx {
			self.active = false;
			return true;
		}
		false
	}
}

/// Outcome of downlink ACK/NACK feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlAckOutcome {
	/// Positive feedback; carries the acknowledged TBS in bytes.
	Acked(u32),
	/// Negative feedback; a retransmission is due after the round trip.
	NackPending,
	/// Negative feedback exhausted the retry budget; the block is dropped.
	Dropped,
}

/// One downlink HARQ process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DlHarqProc {
	id: usize,
	c: HarqCommon,
	rbg_mask: u32,
	mcs: u32,
	tbs: u32,
}

impl DlHarqProc {
	pub(crate) fn new(id: usize) -> Self {
		Self {
			id,
			..Self::default()
		}
	}

	pub fn get_id(&self) -> usize {
		self.id
	}

	pub fn is_empty(&self) -> bool {
		!self.c.active
	}

	pub fn get_tti(&self) -> u32 {
		self.c.tti
	}

	pub fn nof_retx(&self) -> u32 {
		self.c.n_rtx
	}

	pub fn ndi(&self) -> bool {
		self.c.ndi
	}

	pub fn get_mcs(&self) -> u32 {
		self.mcs
	}

	pub fn get_tbs(&self) -> u32 {
		self.tbs
	}

	pub fn get_rbgmask(&self) -> u32 {
		self.rbg_mask
	}

	/// Stakes out the RBGs of the next new transmission (metric side).
	pub fn set_rbgmask(&mut self, mask: u32) {
		self.rbg_mask = mask;
	}

	/// Redundancy version of the next (re)transmission.
	pub fn rv(&self) -> u32 {
		ra::rv_idx(self.c.n_rtx)
	}

	/// A retransmission is due once the round trip since the last
	/// transmission has elapsed without positive feedback.
	pub fn has_pending_retx(&self, tti: u32) -> bool {
		self.c.active && tti::tti_interval(tti, self.c.tti) >= HARQ_RTT
	}

	pub(crate) fn set_max_retx(&mut self, max_retx: u32) {
		self.c.max_retx = max_retx;
	}

	pub(crate) fn new_tx(&mut self, tti: u32, mcs: u32, tbs: u32, rbg_mask: u32) {
		self.c.new_tx(tti);
		self.mcs = mcs;
		self.tbs = tbs;
		self.rbg_mask = rbg_mask;
	}

	/// Re-arms the process for a retransmission in `tti` on the same mask.
	pub(crate) fn new_retx(&mut self, tti: u32) {
		self.c.tti = tti;
	}

	pub(crate) fn set_ack(&mut self, ack: bool) -> DlAckOutcome {
		if ack {
			let tbs = self.tbs;
			self.c.active = false;
			return DlAckOutcome::Acked(tbs);
		}
		if self.c.set_feedback(false) {
			DlAckOutcome::Dropped
		} else {
			DlAckOutcome::NackPending
		}
	}
}

/// One uplink HARQ process (synchronous).
#[derive(Debug, Clone, Copy, Default)]
pub struct UlHarqProc {
	id: usize,
	c: HarqCommon,
	alloc: UlAlloc,
	mcs: u32,
	tbs: u32,
	/// ACK value owed on PHICH, set by CRC feedback.
	pending_phich: Option<bool>,
	/// MCS forced by a RAR grant for the upcoming Msg3.
	rar_mcs: Option<u32>,
	/// The pending retransmission was moved to new PRBs and needs a DCI.
	adaptive: bool,
}

impl UlHarqProc {
	pub(crate) fn new(id: usize) -> Self {
		Self {
			id,
			..Self::default()
		}
	}

	pub fn get_id(&self) -> usize {
		self.id
	}

	pub fn is_empty(&self) -> bool {
		!self.c.active
	}

	pub fn get_tti(&self) -> u32 {
		self.c.tti
	}

	pub fn nof_retx(&self) -> u32 {
		self.c.n_rtx
	}

	pub fn ndi(&self) -> bool {
		self.c.ndi
	}

	pub fn get_tbs(&self) -> u32 {
		self.tbs
	}

	pub fn get_alloc(&self) -> UlAlloc {
		self.alloc
	}

	/// Places the next transmission on a PRB interval (metric side).
	pub fn set_alloc(&mut self, alloc: UlAlloc) {
		self.alloc = alloc;
	}

	/// Marks the pending retransmission as moved (grant must be re-signalled).
	pub fn set_adaptive(&mut self, adaptive: bool) {
		self.adaptive = adaptive;
	}

	/// A retransmission that keeps its original PRBs rides on PHICH alone.
	pub fn is_nonadaptive_retx(&self) -> bool {
		self.c.active && self.c.n_rtx > 0 && !self.adaptive
	}

	/// A retransmission is due once the round trip since the last
	/// transmission has elapsed without positive feedback (a lost CRC report
	/// counts as negative).
	pub fn has_pending_retx(&self, tti: u32) -> bool {
		self.c.active && tti::tti_interval(tti, self.c.tti) >= HARQ_RTT
	}

	pub fn has_pending_ack(&self) -> bool {
		self.pending_phich.is_some()
	}

	pub(crate) fn take_pending_ack(&mut self) -> Option<bool> {
		self.pending_phich.take()
	}

	pub(crate) fn set_rar_mcs(&mut self, mcs: u32) {
		self.rar_mcs = Some(mcs);
	}

	pub(crate) fn take_rar_mcs(&mut self) -> Option<u32> {
		self.rar_mcs.take()
	}

	pub(crate) fn set_max_retx(&mut self, max_retx: u32) {
		self.c.max_retx = max_retx;
	}

	pub(crate) fn new_tx(&mut self, tti: u32, mcs: u32, tbs: u32, alloc: UlAlloc) {
		self.c.new_tx(tti);
		self.mcs = mcs;
		self.tbs = tbs;
		self.alloc = alloc;
		self.adaptive = false;
	}

	pub(crate) fn new_retx(&mut self, tti: u32) {
		self.c.tti = tti;
	}

	/// Redundancy version of the next (re)transmission.
	pub fn rv(&self) -> u32 {
		ra::rv_idx(self.c.n_rtx)
	}

	pub fn get_mcs(&self) -> u32 {
		self.mcs
	}

	/// Applies decoder feedback and arms the PHICH. Returns `true` when the
	/// retry budget is exhausted and the block was dropped.
	pub(crate) fn set_crc(&mut self, crc_ok: bool) -> bool {
		self.pending_phich = Some(crc_ok);
		self.c.set_feedback(crc_ok)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dl_ack_cycle() {
		let mut h = DlHarqProc::new(0);
		h.set_max_retx(4);
		h.new_tx(12, 10, 256, 0b1111);
		assert!(!h.is_empty());
		assert_eq!(h.rv(), 0);
		assert!(!h.has_pending_retx(16));
		assert!(h.has_pending_retx(20));

		// NACK at the round trip: same mask, next redundancy version.
		assert_eq!(h.set_ack(false), DlAckOutcome::NackPending);
		assert_eq!(h.nof_retx(), 1);
		assert_eq!(h.rv(), 2);
		assert_eq!(h.get_rbgmask(), 0b1111);

		h.new_retx(20);
		assert_eq!(h.set_ack(true), DlAckOutcome::Acked(256));
		assert!(h.is_empty());
	}

	#[test]
	fn dl_retry_budget() {
		let mut h = DlHarqProc::new(1);
		h.set_max_retx(2);
		h.new_tx(0, 0, 16, 0b1);
		assert_eq!(h.set_ack(false), DlAckOutcome::NackPending);
		assert_eq!(h.set_ack(false), DlAckOutcome::Dropped);
		assert!(h.is_empty());
	}

	#[test]
	fn dl_ndi_toggles_per_new_tx() {
		let mut h = DlHarqProc::new(2);
		h.set_max_retx(4);
		h.new_tx(0, 0, 16, 0b1);
		let first = h.ndi();
		h.set_ack(true);
		h.new_tx(8, 0, 16, 0b1);
		assert_ne!(h.ndi(), first);
	}

	#[test]
	fn ul_crc_and_phich() {
		let mut h = UlHarqProc::new(0);
		h.set_max_retx(4);
		h.new_tx(8, 0, 7, UlAlloc { rb_start: 2, l: 3 });
		assert!(!h.has_pending_ack());

		assert!(!h.set_crc(false));
		assert_eq!(h.take_pending_ack(), Some(false));
		assert!(!h.has_pending_ack());
		assert!(h.has_pending_retx(16));
		assert!(h.is_nonadaptive_retx());
		assert_eq!(h.rv(), 2);

		h.set_adaptive(true);
		assert!(!h.is_nonadaptive_retx());

		assert!(!h.set_crc(true));
		assert_eq!(h.take_pending_ack(), Some(true));
		assert!(h.is_empty());
	}

	#[test]
	fn ul_rar_mcs_is_one_shot() {
		let mut h = UlHarqProc::new(3);
		h.set_rar_mcs(0);
		assert_eq!(h.take_rar_mcs(), Some(0));
		assert_eq!(h.take_rar_mcs(), None);
	}
}
