//! The scheduler proper: thread-safe control plane and TTI orchestration.
//!
//! All state lives behind one ticket mutex. Control-plane ingress (UE and
//! bearer configuration, HARQ feedback, channel reports, RACH detections)
//! and the two hot-path entry points [`Scheduler::dl_sched`] /
//! [`Scheduler::ul_sched`] each hold the lock for the duration of one call;
//! the critical sections never block, allocate on the hot path, or perform
//! I/O.
//!
//! `ul_sched(tti)` computes the uplink of `tti` four TTIs ahead, so it pairs
//! with `dl_sched(tti - 4)`: the two share the PDCCH bitmap of that downlink
//! TTI, and whichever runs first resets it (`last_reset_tti` marker).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::collections::btree_map::Entry;

use hermit_sync::TicketMutex;

use crate::config::{CellConfig, NOF_HARQ_PROC, SchedArgs, UeBearerConfig, UeConfig};
use crate::error::SchedError;
use crate::interface::{
	DlMetric, DlSchedData, DlSchedResult, PhichValue, RrcPaging, UlAlloc, UlMetric, UlSchedPhich,
	UlSchedPusch, UlSchedResult,
};
use crate::phy::pdcch::{self, CceLocations};
use crate::phy::ra;
use crate::sched::bc::BcScheduler;
use crate::sched::cce::PdcchScratch;
use crate::sched::harq::DlAckOutcome;
use crate::sched::metric::{DlMetricRr, UlMetricRr};
use crate::sched::rar::RarScheduler;
use crate::sched::ue::{SchedUe, UeCellParams};
use crate::tti;

mod bc;
mod cce;
pub mod harq;
pub mod metric;
mod rar;
pub mod ue;

/// Cell configuration plus everything derived from it at `cell_cfg` time.
/// Read-only on the hot path.
pub(crate) struct CellState {
	pub cfg: CellConfig,
	/// Type-0 RBG size.
	pub p: u32,
	pub nof_rbg: u32,
	/// RBGs one SIB or paging record occupies.
	pub si_n_rbg: u32,
	/// PRBs one RAR occupies.
	pub rar_n_rb: u32,
	pub nof_cce: [u32; 3],
	pub common_locations: [CceLocations; 3],
	/// RA-RNTI search spaces per (CFI - 1, subframe index).
	pub rar_locations: [[CceLocations; 10]; 3],
}

impl CellState {
	pub(crate) fn derive(cfg: CellConfig) -> Self {
		let p = ra::type0_rbg_size(cfg.nof_prb);
		let mut nof_cce = [0u32; 3];
		let mut common_locations = [CceLocations::default(); 3];
		let mut rar_locations = [[CceLocations::default(); 10]; 3];
		for cfi in 1..=3u32 {
			let idx = (cfi - 1) as usize;
			nof_cce[idx] = pdcch::nof_cce(cfg.nof_prb, cfg.nof_ports, cfi);
			common_locations[idx] = pdcch::common_locations(nof_cce[idx]);
			for sf in 0..10u32 {
				// RA-RNTI for subframe n is 1 + n.
				rar_locations[idx][sf as usize] =
					pdcch::ue_locations(nof_cce[idx], sf, (1 + sf) as u16);
			}
		}
		let nof_rbg = ra::nof_rbg(cfg.nof_prb);
		Self {
			cfg,
			p,
			nof_rbg,
			si_n_rbg: 4 / p,
			rar_n_rb: 3,
			nof_cce,
			common_locations,
			rar_locations,
		}
	}

	fn ue_params(&self) -> UeCellParams {
		UeCellParams {
			nof_prb: self.cfg.nof_prb,
			nof_ports: self.cfg.nof_ports,
			p: self.p,
			n1_pucch_an: self.cfg.n1_pucch_an,
			nof_cce: self.nof_cce,
		}
	}
}

/// Per-TTI scratch, reset on entry to each hot-path call.
#[derive(Debug, Default)]
pub(crate) struct TtiScratch {
	pub tti: u32,
	pub sfn: u32,
	pub sf_idx: u32,
	pub cfi: u32,
	pub avail_rbg: u32,
	pub start_rbg: u32,
	pub bc_aggr_level: u32,
	pub rar_aggr_level: u32,
	pub pdcch: PdcchScratch,
}

struct Inner {
	args: SchedArgs,
	cell: Option<CellState>,
	ue_db: BTreeMap<u16, SchedUe>,
	bc: BcScheduler,
	rar: RarScheduler,
	scratch: TtiScratch,
	/// Downlink TTI whose PDCCH bitmap `scratch.pdcch` currently holds.
	last_reset_tti: Option<u32>,
	dl_metric: Box<dyn DlMetric>,
	ul_metric: Box<dyn UlMetric>,
	rrc: Option<Box<dyn RrcPaging>>,
}

impl Inner {
	fn ue_mut(&mut self, rnti: u16) -> Result<&mut SchedUe, SchedError> {
		self.ue_db.get_mut(&rnti).ok_or_else(|| {
			error!("SCHED: user rnti={rnti:#06x} not found");
			SchedError::UnknownRnti(rnti)
		})
	}

	fn clear(&mut self) {
		self.ue_db.clear();
		self.bc.reset();
		self.rar.reset();
		self.cell = None;
		self.last_reset_tti = None;
	}
}

/// The per-cell MAC scheduler.
pub struct Scheduler {
	inner: TicketMutex<Inner>,
}

impl Default for Scheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl Scheduler {
	/// A fresh, unconfigured scheduler with the default round-robin metrics.
	pub fn new() -> Self {
		Self {
			inner: TicketMutex::new(Inner {
				args: SchedArgs::default(),
				cell: None,
				ue_db: BTreeMap::new(),
				bc: BcScheduler::default(),
				rar: RarScheduler::default(),
				scratch: TtiScratch::default(),
				last_reset_tti: None,
				dl_metric: Box::new(DlMetricRr::default()),
				ul_metric: Box::new(UlMetricRr::default()),
				rrc: None,
			}),
		}
	}

	/// Installs the RRC collaborator and restores the default arguments.
	pub fn init(&self, rrc: Option<Box<dyn RrcPaging>>) {
		let mut inner = self.inner.lock();
		inner.args = SchedArgs::default();
		inner.rrc = rrc;
		inner.clear();
	}

	/// Drops all cell, UE, SIB and RAR state.
	pub fn reset(&self) {
		self.inner.lock().clear();
	}

	pub fn set_sched_cfg(&self, args: SchedArgs) {
		let mut inner = self.inner.lock();
		inner.args = args;
		// The CFI must stay in 1..=3; everything downstream indexes by it.
		inner.args.nof_ctrl_symbols = args.nof_ctrl_symbols.clamp(1, 3);
	}

	/// Replaces the allocation policies. Call before the first TTI.
	pub fn set_metric(&self, dl_metric: Box<dyn DlMetric>, ul_metric: Box<dyn UlMetric>) {
		let mut inner = self.inner.lock();
		inner.dl_metric = dl_metric;
		inner.ul_metric = ul_metric;
	}

	/// Configures the cell. Everything derived (RBG geometry, search spaces)
	/// is computed here once; the hot path only reads it.
	pub fn cell_cfg(&self, cfg: CellConfig) -> Result<(), SchedError> {
		if let Err(reason) = cfg.validate() {
			error!("SCHED: invalid cell configuration: {reason}");
			return Err(SchedError::InvalidCellCfg(reason));
		}
		self.inner.lock().cell = Some(CellState::derive(cfg));
		Ok(())
	}

	/// Adds or reconfigures a user.
	pub fn ue_cfg(&self, rnti: u16, cfg: UeConfig) -> Result<(), SchedError> {
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		let Some(cell) = inner.cell.as_ref() else {
			error!("SCHED: ue_cfg rnti={rnti:#06x} before cell_cfg");
			return Err(SchedError::InvalidCellCfg("cell not configured"));
		};
		let params = cell.ue_params();
		let args = inner.args;
		let ue = match inner.ue_db.entry(rnti) {
			Entry::Occupied(entry) => {
				let ue = entry.into_mut();
				ue.set_cfg(cfg);
				ue
			}
			Entry::Vacant(entry) => entry.insert(SchedUe::new(rnti, cfg, params)),
		};
		ue.set_max_mcs(args.pusch_max_mcs, args.pdsch_max_mcs);
		ue.set_fixed_mcs(args.pusch_mcs, args.pdsch_mcs);
		Ok(())
	}

	/// Removes a user. Its pending HARQ processes die with it; later feedback
	/// for this RNTI reports [`SchedError::UnknownRnti`].
	pub fn ue_rem(&self, rnti: u16) -> Result<(), SchedError> {
		let mut inner = self.inner.lock();
		if inner.ue_db.remove(&rnti).is_some() {
			Ok(())
		} else {
			error!("SCHED: user rnti={rnti:#06x} not found");
			Err(SchedError::UnknownRnti(rnti))
		}
	}

	pub fn ue_exists(&self, rnti: u16) -> bool {
		self.inner.lock().ue_db.contains_key(&rnti)
	}

	pub fn phy_config_enabled(&self, rnti: u16, enabled: bool) -> Result<(), SchedError> {
		let mut inner = self.inner.lock();
		let tti = inner.scratch.tti;
		inner.ue_mut(rnti)?.phy_config_enabled(tti, enabled);
		Ok(())
	}

	pub fn bearer_ue_cfg(
		&self,
		rnti: u16,
		lcid: u8,
		cfg: UeBearerConfig,
	) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.set_bearer_cfg(lcid, cfg);
		Ok(())
	}

	pub fn bearer_ue_rem(&self, rnti: u16, lcid: u8) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.rem_bearer(lcid);
		Ok(())
	}

	/// Pending downlink bytes of a user as the scheduler sees them.
	pub fn get_dl_buffer(&self, rnti: u16) -> u32 {
		let mut inner = self.inner.lock();
		let tti = inner.scratch.tti;
		inner
			.ue_mut(rnti)
			.map(|ue| ue.get_pending_dl_new_data(tti))
			.unwrap_or(0)
	}

	/// Pending uplink bytes of a user as the scheduler sees them.
	pub fn get_ul_buffer(&self, rnti: u16) -> u32 {
		let mut inner = self.inner.lock();
		let tti = inner.scratch.tti;
		inner
			.ue_mut(rnti)
			.map(|ue| ue.get_pending_ul_new_data(tti))
			.unwrap_or(0)
	}

	pub fn dl_rlc_buffer_state(
		&self,
		rnti: u16,
		lcid: u8,
		tx_queue: u32,
		retx_queue: u32,
	) -> Result<(), SchedError> {
		self.inner
			.lock()
			.ue_mut(rnti)?
			.dl_buffer_state(lcid, tx_queue, retx_queue);
		Ok(())
	}

	pub fn dl_mac_buffer_state(&self, rnti: u16, ce_code: u8) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.mac_buffer_state(ce_code);
		Ok(())
	}

	/// Applies DL ACK/NACK feedback for the transmission scheduled at `tti`.
	/// Returns the acknowledged TBS in bytes (0 for NACK).
	pub fn dl_ack_info(&self, tti: u32, rnti: u16, ack: bool) -> Result<u32, SchedError> {
		let mut inner = self.inner.lock();
		match inner.ue_mut(rnti)?.set_ack_info(tti, ack) {
			Some((_, DlAckOutcome::Acked(tbs))) => Ok(tbs),
			Some((pid, DlAckOutcome::NackPending)) => {
				debug!("SCHED: NACK rnti={rnti:#06x}, pid={pid}, tti={tti}");
				Ok(0)
			}
			Some((pid, DlAckOutcome::Dropped)) => {
				warn!("SCHED: DL retry budget exhausted, dropping TB rnti={rnti:#06x}, pid={pid}");
				Ok(0)
			}
			None => {
				warn!("SCHED: DL ACK for unknown TTI {tti}, rnti={rnti:#06x}");
				Ok(0)
			}
		}
	}

	/// Applies UL CRC feedback for the transmission at `tti - 4`.
	pub fn ul_crc_info(&self, tti: u32, rnti: u16, crc: bool) -> Result<(), SchedError> {
		let mut inner = self.inner.lock();
		match inner.ue_mut(rnti)?.set_ul_crc(tti, crc) {
			Some((pid, true)) => {
				warn!("SCHED: UL retry budget exhausted, dropping TB rnti={rnti:#06x}, pid={pid}");
			}
			Some(_) => {}
			None => warn!("SCHED: stale UL CRC for tti={tti}, rnti={rnti:#06x}"),
		}
		Ok(())
	}

	pub fn dl_cqi_info(&self, tti: u32, rnti: u16, cqi: u8) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.set_dl_cqi(tti, cqi);
		Ok(())
	}

	pub fn ul_cqi_info(
		&self,
		tti: u32,
		rnti: u16,
		cqi: u8,
		ul_ch_code: u32,
	) -> Result<(), SchedError> {
		self.inner
			.lock()
			.ue_mut(rnti)?
			.set_ul_cqi(tti, cqi, ul_ch_code);
		Ok(())
	}

	/// Files a PRACH detection; answered by a RAR in a later TTI.
	pub fn dl_rach_info(
		&self,
		tti: u32,
		ra_id: u32,
		rnti: u16,
		estimated_size: u32,
	) -> Result<(), SchedError> {
		self.inner
			.lock()
			.rar
			.record_rach(tti, ra_id, rnti, estimated_size)
	}

	pub fn ul_bsr(&self, rnti: u16, lcid: u8, bsr: u32) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.ul_buffer_state(lcid, bsr);
		Ok(())
	}

	pub fn ul_recv_len(&self, rnti: u16, lcid: u8, len: u32) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.ul_recv_len(lcid, len);
		Ok(())
	}

	pub fn ul_phr(&self, rnti: u16, phr: i32) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.ul_phr(phr);
		Ok(())
	}

	pub fn ul_sr_info(&self, _tti: u32, rnti: u16) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.set_sr();
		Ok(())
	}

	pub fn tpc_inc(&self, rnti: u16) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.tpc_inc();
		Ok(())
	}

	pub fn tpc_dec(&self, rnti: u16) -> Result<(), SchedError> {
		self.inner.lock().ue_mut(rnti)?.tpc_dec();
		Ok(())
	}

	/// Computes the downlink schedule of `tti`: broadcast, then RAR, then
	/// per-user data, in that order on the RBG grid.
	pub fn dl_sched(&self, tti: u32) -> DlSchedResult {
		let mut result = DlSchedResult::default();
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		let Some(cell) = inner.cell.as_ref() else {
			return result;
		};

		// Reset the PDCCH bitmap unless ul_sched already did for this TTI.
		if inner.last_reset_tti != Some(tti) {
			inner.scratch.pdcch.reset();
			inner.last_reset_tti = Some(tti);
		}

		let scratch = &mut inner.scratch;
		scratch.tti = tti;
		scratch.sfn = tti::sfn(tti);
		scratch.sf_idx = tti::sf_idx(tti);
		scratch.cfi = inner.args.nof_ctrl_symbols;
		scratch.avail_rbg = cell.nof_rbg;
		scratch.start_rbg = 0;
		scratch.bc_aggr_level = 2;
		scratch.rar_aggr_level = 2;
		result.cfi = scratch.cfi;

		inner
			.bc
			.schedule(cell, scratch, inner.rrc.as_deref_mut(), &mut result.bc);
		inner.rar.schedule(cell, scratch, &mut result.rar);

		// Small cells borrow one extra symbol for control.
		let nof_ctrl_symbols = if cell.cfg.nof_prb < 10 {
			scratch.cfi + 1
		} else {
			scratch.cfi
		};
		inner.dl_metric.new_tti(
			&inner.ue_db,
			scratch.start_rbg,
			scratch.avail_rbg,
			nof_ctrl_symbols,
			tti,
		);

		let dci_bits = ra::dci_format1_sizeof(cell.cfg.nof_prb, cell.cfg.nof_ports);
		for (&rnti, ue) in inner.ue_db.iter_mut() {
			let Some(pid) = inner.dl_metric.get_user_allocation(ue) else {
				continue;
			};
			if pid >= NOF_HARQ_PROC {
				warn!("SCHED: DL metric returned invalid pid {pid} for rnti={rnti:#06x}");
				continue;
			}
			let aggr_level = ue.get_aggr_level(dci_bits);
			let location = {
				let locations = ue.get_locations(scratch.cfi, scratch.sf_idx);
				scratch
					.pdcch
					.allocate(locations, aggr_level, tti, Some(&*ue))
			};
			let Some(location) = location else {
				warn!("SCHED: could not schedule DL DCI for rnti={rnti:#06x}, pid={pid}");
				continue;
			};

			let is_newtx = ue.dl_harq(pid).is_empty();
			let mut elem = DlSchedData {
				rnti,
				dci: Default::default(),
				dci_location: location,
				tbs: 0,
				pdu: Default::default(),
			};
			match ue.generate_format1(pid, &mut elem, tti, scratch.cfi) {
				Some(tbs) => {
					info!(
						"SCHED: DL {} rnti={rnti:#06x}, pid={pid}, mask={:#x}, dci=({},{}), n_rtx={}, tbs={tbs}, buffer={}",
						if is_newtx { "tx" } else { "retx" },
						elem.dci.rbg_mask,
						location.l,
						location.ncce,
						ue.dl_harq(pid).nof_retx(),
						ue.get_pending_dl_new_data(tti),
					);
					if result.data.push(elem).is_err() {
						warn!("SCHED: DL data list full, dropping grant for rnti={rnti:#06x}");
					}
				}
				None => {
					warn!(
						"SCHED: error DL {} rnti={rnti:#06x}, pid={pid}",
						if is_newtx { "tx" } else { "retx" },
					);
				}
			}
		}

		result
	}

	/// Computes the uplink schedule of `tti` (called four TTIs ahead):
	/// PHICH, then PUSCH grants packed around Msg3 and PUCCH reservations.
	pub fn ul_sched(&self, tti: u32) -> UlSchedResult {
		let mut result = UlSchedResult::default();
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		let Some(cell) = inner.cell.as_ref() else {
			return result;
		};

		// The paired dl_sched runs for tti - 4; share its PDCCH bitmap.
		let dl_tti = tti::tti_sub(tti, 4);
		if inner.last_reset_tti != Some(dl_tti) {
			inner.scratch.pdcch.reset();
			inner.last_reset_tti = Some(dl_tti);
			inner.scratch.cfi = inner.args.nof_ctrl_symbols;
		}

		let scratch = &mut inner.scratch;
		scratch.tti = tti;
		scratch.sfn = tti::sfn(tti);
		// The grant's PDCCH goes out in the paired downlink subframe.
		scratch.sf_idx = tti::sf_idx(dl_tti);

		let sync_pid = (tti % 8) as usize;
		for (&rnti, ue) in inner.ue_db.iter_mut() {
			if let Some(ack) = ue.ul_harq_mut(sync_pid).take_pending_ack() {
				let elem = UlSchedPhich {
					rnti,
					phich: if ack { PhichValue::Ack } else { PhichValue::Nack },
				};
				if result.phich.push(elem).is_err() {
					warn!("SCHED: PHICH list full, dropping ack for rnti={rnti:#06x}");
				}
			}
		}

		inner.ul_metric.new_tti(&inner.ue_db, cell.cfg.nof_prb, tti);

		if let Some(msg3) = inner.rar.msg3_pending(tti) {
			inner.ul_metric.update_allocation(UlAlloc {
				rb_start: msg3.rb_start,
				l: msg3.l,
			});
		}

		for ue in inner.ue_db.values() {
			if let Some((prb_idx, l)) = ue.get_pucch_sched(tti) {
				for rb_start in prb_idx {
					inner.ul_metric.update_allocation(UlAlloc { rb_start, l });
				}
			}
		}

		let dci_bits = ra::dci_format0_sizeof(cell.cfg.nof_prb, cell.cfg.nof_ports);
		let msg3 = inner.rar.msg3_pending(tti);
		for (&rnti, ue) in inner.ue_db.iter_mut() {
			let mut is_rar = false;
			let pid = if let Some(m3) = msg3.filter(|m3| m3.rnti == rnti) {
				if ue.ul_harq(sync_pid).is_empty() {
					let h = ue.ul_harq_mut(sync_pid);
					h.set_alloc(UlAlloc {
						rb_start: m3.rb_start,
						l: m3.l,
					});
					h.set_rar_mcs(m3.mcs);
					inner.rar.take_msg3(tti);
					is_rar = true;
					Some(sync_pid)
				} else {
					warn!("SCHED: no HARQ process available for transmission of Msg3");
					None
				}
			} else {
				inner.ul_metric.get_user_allocation(ue)
			};
			let Some(pid) = pid else {
				continue;
			};
			if pid >= NOF_HARQ_PROC {
				warn!("SCHED: UL metric returned invalid pid {pid} for rnti={rnti:#06x}");
				continue;
			}

			let is_newtx = ue.ul_harq(pid).is_empty();
			let needs_pdcch = !ue.ul_harq(pid).is_nonadaptive_retx() && !is_rar;
			if is_newtx {
				let max_retx = if is_rar {
					cell.cfg.maxharq_msg3tx
				} else {
					ue.get_max_retx()
				};
				ue.ul_harq_mut(pid).set_max_retx(max_retx);
			}

			let mut elem = UlSchedPusch {
				rnti,
				needs_pdcch: false,
				dci: Default::default(),
				dci_location: Default::default(),
				tbs: 0,
				alloc: UlAlloc::default(),
			};
			if needs_pdcch {
				let aggr_level = ue.get_aggr_level(dci_bits);
				let location = {
					let locations = ue.get_locations(scratch.cfi, scratch.sf_idx);
					scratch
						.pdcch
						.allocate(locations, aggr_level, tti, Some(&*ue))
				};
				let Some(location) = location else {
					warn!(
						"SCHED: could not schedule UL DCI rnti={rnti:#06x}, pid={pid}, L={aggr_level}"
					);
					continue;
				};
				elem.needs_pdcch = true;
				elem.dci_location = location;
			}

			let cqi_request = ue.needs_cqi(tti);
			match ue.generate_format0(pid, &mut elem, tti, cqi_request) {
				Some(tbs) => {
					if is_newtx {
						ue.unset_sr();
					}
					info!(
						"SCHED: {} {} rnti={rnti:#06x}, pid={pid}, dci=({},{}), grant=({},{}), n_rtx={}, tbs={tbs}, bsr={}",
						if is_rar { "RAR" } else { "UL" },
						if is_newtx { "tx" } else { "retx" },
						elem.dci_location.l,
						elem.dci_location.ncce,
						elem.alloc.rb_start,
						elem.alloc.l,
						ue.ul_harq(pid).nof_retx(),
						ue.get_pending_ul_new_data(tti),
					);
					if result.pusch.push(elem).is_err() {
						warn!("SCHED: PUSCH list full, dropping grant for rnti={rnti:#06x}");
					}
				}
				None => {
					warn!(
						"SCHED: error {} {} rnti={rnti:#06x}, pid={pid}",
						if is_rar { "RAR" } else { "UL" },
						if is_newtx { "tx" } else { "retx" },
					);
				}
			}
		}

		// A reservation nobody claimed must not leak into the next frame.
		inner.rar.clear_stale_msg3(tti);

		result
	}
}
