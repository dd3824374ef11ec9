//! Random access response scheduling.
//!
//! RACH detections wait in a fixed ring until their RAR window opens
//! (`rar_tti + 3`) and are discarded once it closes
//! (`rar_tti + prach_rar_window + 3`, inclusive). At most one RAR element
//! goes on the air per TTI, answering a single detection; further detections
//! from the same RACH TTI stay pending and are answered in a later TTI of
//! their window. Scheduling a RAR reserves the uplink PRBs its Msg3 will use
//! six TTIs later.

use heapless::Vec;

use crate::config::{MAX_PENDING_RAR, MAX_RAR_LIST};
use crate::error::SchedError;
use crate::interface::{DlSchedRar, RarGrant};
use crate::phy::ra;
use crate::sched::{CellState, TtiScratch};
use crate::tti;

/// Msg3 grant parameters fixed by the RAR uplink grant.
const MSG3_L_PRB: u32 = 3;
const MSG3_RB_START: u32 = 2;
const MSG3_MCS: u32 = 0;
/// PRACH detection to earliest RAR delay.
const RAR_MIN_DELAY: u32 = 3;
/// RAR emission to Msg3 transmission delay.
const MSG3_DELAY: u32 = 6;

#[derive(Debug, Clone, Copy)]
struct PendingRar {
	ra_id: u32,
	rnti: u16,
	rar_tti: u32,
	buf_rar: u32,
}

/// An uplink reservation for the Msg3 a scheduled RAR implies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingMsg3 {
	pub rnti: u16,
	pub rb_start: u32,
	pub l: u32,
	pub mcs: u32,
}

#[derive(Debug, Default)]
pub(crate) struct RarScheduler {
	pending: [Option<PendingRar>; MAX_PENDING_RAR],
	msg3: [Option<PendingMsg3>; 10],
}

impl RarScheduler {
	pub fn reset(&mut self) {
		self.pending = [None; MAX_PENDING_RAR];
		self.msg3 = [None; 10];
	}

	/// Files a PRACH detection into the first free ring slot.
	pub fn record_rach(
		&mut self,
		tti: u32,
		ra_id: u32,
		rnti: u16,
		estimated_size: u32,
	) -> Result<(), SchedError> {
		for slot in &mut self.pending {
			if slot.is_none() {
				*slot = Some(PendingRar {
					ra_id,
					rnti,
					rar_tti: tti,
					buf_rar: estimated_size,
				});
				return Ok(());
			}
		}
		warn!(
			"SCHED: new RACH discarded, maximum number of pending RAR exceeded ({MAX_PENDING_RAR})"
		);
		Err(SchedError::NoFreeRarSlot)
	}

	/// Emits at most one RAR for this TTI and expires stale detections.
	pub fn schedule(
		&mut self,
		cell: &CellState,
		scratch: &mut TtiScratch,
		out: &mut Vec<DlSchedRar, MAX_RAR_LIST>,
	) {
		for i in 0..MAX_PENDING_RAR {
			let Some(entry) = self.pending[i] else {
				continue;
			};
			let delta = tti::tti_interval(scratch.tti, entry.rar_tti);
			if delta > cell.cfg.prach_rar_window + RAR_MIN_DELAY {
				info!(
					"SCHED: could not transmit RAR within the window (RA tti={}, window={}, now={})",
					entry.rar_tti, cell.cfg.prach_rar_window, scratch.tti
				);
				self.pending[i] = None;
				continue;
			}
			if delta < RAR_MIN_DELAY || scratch.avail_rbg < cell.rar_n_rb {
				continue;
			}

			let locations =
				&cell.rar_locations[(scratch.cfi - 1) as usize][scratch.sf_idx as usize];
			let Some(location) =
				scratch
					.pdcch
					.allocate(locations, scratch.rar_aggr_level, scratch.tti, None)
			else {
				// The search space is shared by every entry this TTI.
				warn!(
					"SCHED: could not schedule DCI for RAR tti={}, L={}",
					entry.rar_tti, scratch.rar_aggr_level
				);
				return;
			};

			let (dci, _) = match ra::format1a(
				scratch.start_rbg * cell.p,
				cell.rar_n_rb,
				entry.buf_rar,
				0,
				cell.cfg.nof_prb,
			) {
				Ok(ok) => ok,
				Err(err) => {
					error!("SCHED: allocating RAR Format 1A grant: {err}");
					return;
				}
			};

			// Only 1 RA is responded at a time; detections sharing this RACH
			// TTI stay pending and get their own RAR while the window lasts.
			for other in self.pending[i + 1..].iter().flatten() {
				if other.rar_tti == entry.rar_tti {
					warn!(
						"SCHED: only 1 RA responded at a time, ra_id={} stays pending for tti={}",
						other.ra_id, other.rar_tti
					);
				}
			}

			let rar_sfidx = (entry.rar_tti + 1) % 10;
			let mut grants = Vec::new();
			grants
				.push(RarGrant {
					ra_id: entry.ra_id,
					tpc_pusch: 3,
					trunc_mcs: MSG3_MCS,
					rba: ra::type2_to_riv(MSG3_L_PRB, MSG3_RB_START, cell.cfg.nof_prb),
				})
				.ok();

			let msg3_slot = (tti::tti_add(scratch.tti, MSG3_DELAY) % 10) as usize;
			self.msg3[msg3_slot] = Some(PendingMsg3 {
				rnti: entry.rnti,
				rb_start: MSG3_RB_START,
				l: MSG3_L_PRB,
				mcs: MSG3_MCS,
			});
			self.pending[i] = None;

			info!(
				"SCHED: RAR, ra_id={}, rnti={:#06x}, rarnti_idx={rar_sfidx}, start_rb={}, n_rb={}, rar_grant_rba={}, rar_grant_mcs={MSG3_MCS}",
				entry.ra_id,
				entry.rnti,
				scratch.start_rbg * cell.p,
				cell.rar_n_rb,
				ra::type2_to_riv(MSG3_L_PRB, MSG3_RB_START, cell.cfg.nof_prb),
			);
			let pushed = out.push(DlSchedRar {
				rarnti: rar_sfidx as u16,
				dci,
				dci_location: location,
				tbs: entry.buf_rar,
				grants,
			});
			if pushed.is_ok() {
				scratch.avail_rbg -= cell.rar_n_rb;
				scratch.start_rbg += cell.rar_n_rb;
			}
			return;
		}
	}

	/// The Msg3 reservation for this uplink TTI, if any.
	pub fn msg3_pending(&self, tti: u32) -> Option<PendingMsg3> {
		self.msg3[(tti % 10) as usize]
	}

	/// Consumes the Msg3 reservation for this uplink TTI.
	pub fn take_msg3(&mut self, tti: u32) -> Option<PendingMsg3> {
		self.msg3[(tti % 10) as usize].take()
	}

	/// A reservation its UE never claimed dies with its TTI; letting it
	/// survive would replay it in the same subframe of the next frame.
	pub fn clear_stale_msg3(&mut self, tti: u32) {
		if let Some(msg3) = self.take_msg3(tti) {
			debug!(
				"SCHED: dropping unclaimed Msg3 reservation for rnti={:#06x}",
				msg3.rnti
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::CellConfig;
	use crate::sched::{CellState, TtiScratch};

	fn cell() -> CellState {
		CellState::derive(CellConfig {
			nof_prb: 50,
			prach_rar_window: 3,
			..CellConfig::default()
		})
	}

	fn scratch_at(tti: u32, cell: &CellState) -> TtiScratch {
		TtiScratch {
			tti,
			sfn: tti / 10,
			sf_idx: tti % 10,
			cfi: 3,
			avail_rbg: cell.nof_rbg,
			start_rbg: 0,
			bc_aggr_level: 2,
			rar_aggr_level: 2,
			..TtiScratch::default()
		}
	}

	#[test]
	fn ring_overflow_is_rejected() {
		let mut rar = RarScheduler::default();
		for i in 0..MAX_PENDING_RAR as u32 {
			rar.record_rach(0, i, 0x46 + i as u16, 7).unwrap();
		}
		assert_eq!(
			rar.record_rach(0, 99, 0x99, 7),
			Err(SchedError::NoFreeRarSlot)
		);
	}

	#[test]
	fn respects_min_delay_and_window() {
		let cell = cell();
		let mut rar = RarScheduler::default();
		rar.record_rach(100, 7, 0x46, 7).unwrap();

		// Too early at +2.
		let mut scratch = scratch_at(102, &cell);
		let mut out = Vec::new();
		rar.schedule(&cell, &mut scratch, &mut out);
		assert!(out.is_empty());

		// Eligible at +3.
		let mut scratch = scratch_at(103, &cell);
		rar.schedule(&cell, &mut scratch, &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].rarnti, 1);
		assert_eq!(out[0].grants[0].ra_id, 7);
		assert_eq!(out[0].grants[0].rba, ra::type2_to_riv(3, 2, 50));
		assert!(rar.msg3_pending(109).is_some());

		// The consumed entry never re-emits.
		let mut scratch = scratch_at(104, &cell);
		rar.schedule(&cell, &mut scratch, &mut out);
		assert_eq!(out.len(), 1);
	}

	#[test]
	fn window_upper_bound_is_inclusive() {
		let cell = cell();
		let mut rar = RarScheduler::default();
		rar.record_rach(0, 1, 0x46, 7).unwrap();

		// prach_rar_window = 3: last eligible TTI is 6, discard happens at 7.
		let mut scratch = scratch_at(6, &cell);
		let mut out = Vec::new();
		rar.schedule(&cell, &mut scratch, &mut out);
		assert_eq!(out.len(), 1);

		let mut rar = RarScheduler::default();
		rar.record_rach(0, 1, 0x46, 7).unwrap();
		let mut scratch = scratch_at(7, &cell);
		let mut out = Vec::new();
		rar.schedule(&cell, &mut scratch, &mut out);
		assert!(out.is_empty());
		// One full wrap later the slot is still gone, not retained.
		let mut scratch = scratch_at(tti::tti_add(6, tti::NOF_TTI - 1), &cell);
		rar.schedule(&cell, &mut scratch, &mut out);
		assert!(out.is_empty());
	}

	#[test]
	fn pdcch_exhaustion_retains_entry_until_expiry() {
		let cell = cell();
		let mut rar = RarScheduler::default();
		rar.record_rach(0, 5, 0x46, 7).unwrap();

		// Occupy the whole RAR search space for TTIs 3..=6.
		for tti in 3..=6 {
			let mut scratch = scratch_at(tti, &cell);
			let locations = &cell.rar_locations[2][(tti % 10) as usize];
			while scratch.pdcch.allocate(locations, 2, tti, None).is_some() {}
			let mut out = Vec::new();
			rar.schedule(&cell, &mut scratch, &mut out);
			assert!(out.is_empty());
		}

		// Window closed at 7: the pending slot is discarded silently.
		let mut scratch = scratch_at(7, &cell);
		let mut out = Vec::new();
		rar.schedule(&cell, &mut scratch, &mut out);
		assert!(out.is_empty());
		assert!(rar.msg3_pending(13).is_none());
	}

	#[test]
	fn msg3_reservation_is_consumed_once() {
		let mut rar = RarScheduler::default();
		rar.msg3[9] = Some(PendingMsg3 {
			rnti: 0x46,
			rb_start: 2,
			l: 3,
			mcs: 0,
		});
		assert!(rar.msg3_pending(109).is_some());
		assert!(rar.take_msg3(109).is_some());
		assert!(rar.msg3_pending(109).is_none());
		assert!(rar.take_msg3(109).is_none());
	}

	#[test]
	fn wrap_around_window() {
		let cell = cell();
		let mut rar = RarScheduler::default();
		rar.record_rach(10238, 2, 0x46, 7).unwrap();

		// 10238 + 3 wraps to TTI 1.
		let mut scratch = scratch_at(1, &cell);
		let mut out = Vec::new();
		rar.schedule(&cell, &mut scratch, &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].rarnti, (10239 % 10) as u16);
		assert!(rar.msg3_pending(7).is_some());
	}
}
