//! SIB and paging broadcast scheduling.
//!
//! SIB1 (index 0) is permanently in window: it transmits in subframe 5 of
//! every even frame, cycling four redundancy versions. Every other SIB owns a
//! periodic window of `si_window_ms` TTIs, subdivided into up to four equal
//! chunks with one transmission per chunk in subframe 1.

use heapless::Vec;

use crate::config::{MAX_BC_LIST, MAX_SIBS};
use crate::interface::{BcType, DlSchedBc, RrcPaging};
use crate::phy::ra;
use crate::sched::{CellState, TtiScratch};
use crate::tti;

#[derive(Debug, Clone, Copy, Default)]
struct SibState {
	in_window: bool,
	window_start: u32,
	n_tx: u32,
}

#[derive(Debug, Default)]
pub(crate) struct BcScheduler {
	pending: [SibState; MAX_SIBS],
}

/// Transmissions an SI window is split into.
fn window_nof_tx(si_window_ms: u32) -> u32 {
	match si_window_ms {
		0..=10 => 1,
		11..=20 => 2,
		21..=30 => 3,
		_ => 4,
	}
}

impl BcScheduler {
	pub fn reset(&mut self) {
		self.pending = [SibState::default(); MAX_SIBS];
	}

	/// Opens and closes the per-SIB windows for this TTI.
	fn update_windows(&mut self, cell: &CellState, scratch: &TtiScratch) {
		for (i, state) in self.pending.iter_mut().enumerate() {
			let sib = &cell.cfg.sibs[i];
			if sib.len == 0 || sib.period_rf == 0 {
				continue;
			}
			if !state.in_window {
				let (x, sf) = if i > 0 {
					let x = (i as u32 - 1) * cell.cfg.si_window_ms;
					(x, x % 10)
				} else {
					(0, 5)
				};
				if scratch.sfn % sib.period_rf == x / 10 && scratch.sf_idx == sf {
					state.in_window = true;
					state.window_start = scratch.tti;
					state.n_tx = 0;
				}
			} else if i > 0 {
				if tti::tti_interval(scratch.tti, state.window_start) > cell.cfg.si_window_ms {
					state.in_window = false;
					state.window_start = 0;
				}
			} else if state.n_tx == 4 {
				// SIB1 never leaves its window, the repetition count wraps.
				state.n_tx = 0;
			}
		}
	}

	/// Emits the SIBs due in this TTI, then one paging record if the RRC has
	/// one pending and broadcast left room.
	pub fn schedule(
		&mut self,
		cell: &CellState,
		scratch: &mut TtiScratch,
		rrc: Option<&mut (dyn RrcPaging + 'static)>,
		out: &mut Vec<DlSchedBc, MAX_BC_LIST>,
	) {
		self.update_windows(cell, scratch);

		for i in 0..MAX_SIBS {
			let sib = &cell.cfg.sibs[i];
			let state = self.pending[i];
			if sib.len == 0
				|| !state.in_window
				|| state.n_tx >= 4
				|| scratch.avail_rbg <= cell.si_n_rbg
			{
				continue;
			}
			let due = if i == 0 {
				scratch.sfn % 2 == 0 && scratch.sf_idx == 5
			} else {
				let nof_tx = window_nof_tx(cell.cfg.si_window_ms);
				let n_sf = tti::tti_interval(scratch.tti, state.window_start);
				n_sf >= (cell.cfg.si_window_ms / nof_tx) * state.n_tx && scratch.sf_idx == 1
			};
			if !due {
				continue;
			}

			let rv = ra::rv_idx(state.n_tx);
			let locations = &cell.common_locations[(scratch.cfi - 1) as usize];
			let Some(location) =
				scratch
					.pdcch
					.allocate(locations, scratch.bc_aggr_level, scratch.tti, None)
			else {
				warn!(
					"SCHED: could not schedule DCI for SIB{}, L={}",
					i + 1,
					scratch.bc_aggr_level
				);
				continue;
			};
			match ra::format1a(
				scratch.start_rbg * cell.p,
				cell.si_n_rbg * cell.p,
				sib.len,
				rv,
				cell.cfg.nof_prb,
			) {
				Ok((dci, _)) => {
					debug!(
						"SCHED: SIB{}, start_rb={}, n_rb={}, rv={}, len={}, period={}",
						i + 1,
						scratch.start_rbg * cell.p,
						cell.si_n_rbg * cell.p,
						rv,
						sib.len,
						sib.period_rf
					);
					let pushed = out.push(DlSchedBc {
						bc_type: BcType::Bcch,
						index: i as u32,
						dci,
						dci_location: location,
						tbs: sib.len,
					});
					if pushed.is_ok() {
						self.pending[i].n_tx += 1;
						scratch.avail_rbg -= cell.si_n_rbg;
						scratch.start_rbg += cell.si_n_rbg;
					}
				}
				Err(err) => {
					error!("SCHED: could not allocate Format 1A for SIB{}: {err}", i + 1);
				}
			}
		}

		let Some(rrc) = rrc else {
			return;
		};
		let paging_payload = rrc.is_paging_opportunity(scratch.tti);
		if paging_payload == 0 || scratch.avail_rbg <= cell.si_n_rbg {
			return;
		}
		let locations = &cell.common_locations[(scratch.cfi - 1) as usize];
		let Some(location) =
			scratch
				.pdcch
				.allocate(locations, scratch.bc_aggr_level, scratch.tti, None)
		else {
			return;
		};
		if let Ok((dci, tbs)) = ra::format1a(
			scratch.start_rbg * cell.p,
			cell.si_n_rbg * cell.p,
			paging_payload,
			0,
			cell.cfg.nof_prb,
		) {
			info!(
				"SCHED: PCH start_rb={}, tbs={tbs}",
				scratch.start_rbg * cell.p
			);
			let pushed = out.push(DlSchedBc {
				bc_type: BcType::Pcch,
				index: 0,
				dci,
				dci_location: location,
				tbs,
			});
			if pushed.is_ok() {
				scratch.avail_rbg -= cell.si_n_rbg;
				scratch.start_rbg += cell.si_n_rbg;
			}
		}
	}
}
