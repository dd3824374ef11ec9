//! Default round-robin metrics.
//!
//! The downlink metric serves pending retransmissions first (a DL
//! retransmission must reuse its original RBG mask, so it is skipped when any
//! of those RBGs is already taken) and then fills new transmissions from the
//! lowest free RBGs, capped at a fair share of the TTI. The uplink metric
//! keeps non-adaptive retransmissions on their original PRBs when possible,
//! moves them otherwise, and packs new transmissions around the reserved
//! intervals (Msg3, PUCCH).

use alloc::collections::BTreeMap;

use bit_field::BitField;

use crate::interface::{DlMetric, UlAlloc, UlMetric};
use crate::sched::ue::SchedUe;

/// Round-robin downlink metric.
#[derive(Debug, Default)]
pub struct DlMetricRr {
	tti: u32,
	avail_mask: u32,
	fair_rbg: u32,
}

impl DlMetric for DlMetricRr {
	fn new_tti(
		&mut self,
		ue_db: &BTreeMap<u16, SchedUe>,
		start_rbg: u32,
		avail_rbg: u32,
		_nof_ctrl_symbols: u32,
		tti: u32,
	) {
		self.tti = tti;
		self.avail_mask = 0;
		for rbg in start_rbg..start_rbg + avail_rbg {
			self.avail_mask.set_bit(rbg as usize, true);
		}
		let users = ue_db
			.values()
			.filter(|ue| {
				ue.get_pending_dl_new_data(tti) > 0 || ue.dl_harq_with_pending_retx(tti).is_some()
			})
			.count() as u32;
		self.fair_rbg = if users > 0 {
			avail_rbg.div_ceil(users)
		} else {
			avail_rbg
		};
	}

	fn get_user_allocation(&mut self, ue: &mut SchedUe) -> Option<usize> {
		if let Some(pid) = ue.dl_harq_with_pending_retx(self.tti) {
			let mask = ue.dl_harq(pid).get_rbgmask();
			if mask & !self.avail_mask == 0 {
				self.avail_mask &= !mask;
				return Some(pid);
			}
			// The original mask is taken; try again next TTI.
			return None;
		}

		let req_bytes = ue.get_pending_dl_new_data(self.tti);
		if req_bytes == 0 {
			return None;
		}
		let pid = ue.find_empty_dl_harq()?;
		let req_prb = ue.get_required_prb_dl(req_bytes);
		let req_rbg = req_prb
			.div_ceil(ue.cell_rbg_size())
			.clamp(1, self.fair_rbg.max(1));

		let mut mask = 0u32;
		let mut taken = 0;
		for rbg in 0..u32::BITS {
			if taken == req_rbg {
				break;
			}
			if self.avail_mask.get_bit(rbg as usize) {
				mask.set_bit(rbg as usize, true);
				taken += 1;
			}
		}
		if taken == 0 {
			return None;
		}
		self.avail_mask &= !mask;
		ue.dl_harq_mut(pid).set_rbgmask(mask);
		Some(pid)
	}
}

/// Interval-packing uplink metric.
#[derive(Debug, Default)]
pub struct UlMetricRr {
	tti: u32,
	nof_prb: u32,
	used: u128,
}

impl UlMetricRr {
	fn is_free(&self, alloc: UlAlloc) -> bool {
		alloc.rb_start + alloc.l <= self.nof_prb
			&& (alloc.rb_start..alloc.rb_start + alloc.l)
				.all(|prb| !self.used.get_bit(prb as usize))
	}

	fn mark(&mut self, alloc: UlAlloc) {
		for prb in alloc.rb_start..(alloc.rb_start + alloc.l).min(self.nof_prb) {
			self.used.set_bit(prb as usize, true);
		}
	}

	/// Longest free run, truncated to `len` PRBs.
	fn find_interval(&self, len: u32) -> Option<UlAlloc> {
		let mut best = UlAlloc::default();
		let mut run = UlAlloc::default();
		for prb in 0..self.nof_prb {
			if self.used.get_bit(prb as usize) {
				run = UlAlloc::default();
				continue;
			}
			if run.l == 0 {
				run.rb_start = prb;
			}
			run.l += 1;
			if run.l > best.l {
				best = run;
			}
			if best.l >= len {
				break;
			}
		}
		if best.l == 0 {
			return None;
		}
		best.l = best.l.min(len);
		Some(best)
	}
}

impl UlMetric for UlMetricRr {
	fn new_tti(&mut self, _ue_db: &BTreeMap<u16, SchedUe>, nof_prb: u32, tti: u32) {
		self.tti = tti;
		self.nof_prb = nof_prb;
		self.used = 0;
	}

	fn update_allocation(&mut self, alloc: UlAlloc) {
		self.mark(alloc);
	}

	fn get_user_allocation(&mut self, ue: &mut SchedUe) -> Option<usize> {
		let pid = (self.tti % 8) as usize;

		if ue.ul_harq(pid).has_pending_retx(self.tti) {
			let alloc = ue.ul_harq(pid).get_alloc();
			if self.is_free(alloc) {
				self.mark(alloc);
				ue.ul_harq_mut(pid).set_adaptive(false);
				return Some(pid);
			}
			// Original PRBs are reserved; move the retransmission.
			let moved = self.find_interval(alloc.l).filter(|m| m.l == alloc.l)?;
			self.mark(moved);
			let h = ue.ul_harq_mut(pid);
			h.set_alloc(moved);
			h.set_adaptive(true);
			return Some(pid);
		}

		if !ue.ul_harq(pid).is_empty() || !ue.ul_grant_needed(self.tti) {
			return None;
		}
		let req_bytes = ue.get_pending_ul_new_data(self.tti).max(1);
		let req_prb = ue.get_required_prb_ul(req_bytes);
		let alloc = self.find_interval(req_prb)?;
		self.mark(alloc);
		ue.ul_harq_mut(pid).set_alloc(alloc);
		Some(pid)
	}
}
