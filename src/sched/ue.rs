//! Per-UE scheduler state.
//!
//! A `SchedUe` owns everything the scheduler knows about one C-RNTI: bearer
//! configuration, downlink/uplink buffer occupancy, MAC CE queue, the HARQ
//! pools, channel quality history, the PUCCH/SR reservation, and the TPC
//! accumulator. Grants are materialized here (`generate_format1` /
//! `generate_format0`) so buffer accounting and HARQ state advance in one
//! place.

use alloc::collections::VecDeque;

use bit_field::BitField;

use crate::config::{BearerDirection, UeBearerConfig, UeConfig, MAX_LC, NOF_HARQ_PROC};
use crate::interface::{DlSchedData, PduItem, UlSchedPusch};
use crate::phy::pdcch::CceLocations;
use crate::phy::ra::{self, DciFormat0, DciFormat1};
use crate::sched::harq::{DlAckOutcome, DlHarqProc, UlHarqProc};
use crate::tti;

/// Cell geometry snapshot handed to each UE at configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct UeCellParams {
	pub nof_prb: u32,
	pub nof_ports: u32,
	/// Type-0 RBG size.
	pub p: u32,
	pub n1_pucch_an: u32,
	/// CCEs in the PDCCH region per CFI.
	pub nof_cce: [u32; 3],
}

#[derive(Debug, Clone, Copy, Default)]
struct LcState {
	cfg: Option<UeBearerConfig>,
	buf_tx: u32,
	buf_retx: u32,
	bsr: u32,
}

/// DL-SCH MAC CE sizes by LCID code (subheader excluded).
fn ce_size(ce_code: u8) -> u32 {
	match ce_code {
		// UE contention resolution identity
		28 => 6,
		// Timing advance command
		29 => 1,
		// DRX command
		_ => 0,
	}
}

pub struct SchedUe {
	rnti: u16,
	cfg: UeConfig,
	cell: UeCellParams,
	/// UE-specific PDCCH candidates per (CFI - 1, subframe index).
	locations: [[CceLocations; 10]; 3],
	lch: [LcState; MAX_LC],
	pending_ces: VecDeque<u8>,
	dl_harq: [DlHarqProc; NOF_HARQ_PROC],
	ul_harq: [UlHarqProc; NOF_HARQ_PROC],
	dl_cqi: u8,
	dl_cqi_tti: Option<u32>,
	ul_cqi: [u8; 2],
	ul_cqi_tti: [Option<u32>; 2],
	sr: bool,
	phr: i32,
	tpc: i32,
	fixed_mcs_dl: i32,
	fixed_mcs_ul: i32,
	max_mcs_dl: u32,
	max_mcs_ul: u32,
	phy_enabled: bool,
}

impl SchedUe {
	pub(crate) fn new(rnti: u16, cfg: UeConfig, cell: UeCellParams) -> Self {
		let mut locations = [[CceLocations::default(); 10]; 3];
		for (cfi_idx, per_sf) in locations.iter_mut().enumerate() {
			for (sf, loc) in per_sf.iter_mut().enumerate() {
				*loc = crate::phy::pdcch::ue_locations(cell.nof_cce[cfi_idx], sf as u32, rnti);
			}
		}

		let mut lch = [LcState::default(); MAX_LC];
		for (lc, bearer) in lch.iter_mut().zip(cfg.bearers.iter()) {
			lc.cfg = *bearer;
		}

		let mut dl_harq = [DlHarqProc::default(); NOF_HARQ_PROC];
		let mut ul_harq = [UlHarqProc::default(); NOF_HARQ_PROC];
		for (id, h) in dl_harq.iter_mut().enumerate() {
			*h = DlHarqProc::new(id);
		}
		for (id, h) in ul_harq.iter_mut().enumerate() {
			*h = UlHarqProc::new(id);
		}

		Self {
			rnti,
			cfg,
			cell,
			locations,
			lch,
			pending_ces: VecDeque::new(),
			dl_harq,
			ul_harq,
			dl_cqi: 0,
			dl_cqi_tti: None,
			ul_cqi: [0; 2],
			ul_cqi_tti: [None; 2],
			sr: false,
			phr: 0,
			tpc: 0,
			fixed_mcs_dl: -1,
			fixed_mcs_ul: -1,
			max_mcs_dl: 28,
			max_mcs_ul: 28,
			phy_enabled: false,
		}
	}

	pub fn rnti(&self) -> u16 {
		self.rnti
	}

	/// Reconfigures the UE. HARQ state and buffers survive.
	pub(crate) fn set_cfg(&mut self, cfg: UeConfig) {
		for (lc, bearer) in self.lch.iter_mut().zip(cfg.bearers.iter()) {
			if bearer.is_some() {
				lc.cfg = *bearer;
			}
		}
		self.cfg = cfg;
	}

	pub(crate) fn set_max_mcs(&mut self, pusch_max: i32, pdsch_max: i32) {
		self.max_mcs_ul = if pusch_max >= 0 { pusch_max as u32 } else { 28 };
		self.max_mcs_dl = if pdsch_max >= 0 { pdsch_max as u32 } else { 28 };
	}

	pub(crate) fn set_fixed_mcs(&mut self, pusch: i32, pdsch: i32) {
		self.fixed_mcs_ul = pusch;
		self.fixed_mcs_dl = pdsch;
	}

	pub(crate) fn set_bearer_cfg(&mut self, lcid: u8, cfg: UeBearerConfig) {
		if let Some(lc) = self.lch.get_mut(lcid as usize) {
			lc.cfg = Some(cfg);
		}
	}

	pub(crate) fn rem_bearer(&mut self, lcid: u8) {
		if let Some(lc) = self.lch.get_mut(lcid as usize) {
			*lc = LcState::default();
		}
	}

	pub(crate) fn phy_config_enabled(&mut self, _tti: u32, enabled: bool) {
		self.phy_enabled = enabled;
	}

	pub(crate) fn dl_buffer_state(&mut self, lcid: u8, tx_bytes: u32, retx_bytes: u32) {
		if let Some(lc) = self.lch.get_mut(lcid as usize) {
			lc.buf_tx = tx_bytes;
			lc.buf_retx = retx_bytes;
		}
	}

	pub(crate) fn mac_buffer_state(&mut self, ce_code: u8) {
		self.pending_ces.push_back(ce_code);
	}

	pub(crate) fn ul_buffer_state(&mut self, lcid: u8, bsr: u32) {
		if let Some(lc) = self.lch.get_mut(lcid as usize) {
			lc.bsr = bsr;
		}
	}

	pub(crate) fn ul_recv_len(&mut self, lcid: u8, len: u32) {
		if let Some(lc) = self.lch.get_mut(lcid as usize) {
			lc.bsr = lc.bsr.saturating_sub(len);
		}
	}

	pub(crate) fn ul_phr(&mut self, phr: i32) {
		self.phr = phr;
	}

	pub fn get_phr(&self) -> i32 {
		self.phr
	}

	pub(crate) fn set_sr(&mut self) {
		self.sr = true;
	}

	pub(crate) fn unset_sr(&mut self) {
		self.sr = false;
	}

	pub fn sr_pending(&self) -> bool {
		self.sr
	}

	pub(crate) fn tpc_inc(&mut self) {
		self.tpc = (self.tpc + 1).min(4);
	}

	pub(crate) fn tpc_dec(&mut self) {
		self.tpc = (self.tpc - 1).max(-4);
	}

	/// Drains one step of the TPC accumulator into a 2-bit DCI command.
	fn take_tpc_cmd(&mut self) -> u32 {
		match self.tpc {
			i32::MIN..=-1 => {
				self.tpc += 1;
				0
			}
			0 => 1,
			_ => {
				self.tpc -= 1;
				2
			}
		}
	}

	pub(crate) fn set_dl_cqi(&mut self, tti: u32, cqi: u8) {
		self.dl_cqi = cqi;
		self.dl_cqi_tti = Some(tti);
	}

	pub(crate) fn set_ul_cqi(&mut self, tti: u32, cqi: u8, ul_ch_code: u32) {
		let idx = (ul_ch_code as usize).min(self.ul_cqi.len() - 1);
		self.ul_cqi[idx] = cqi;
		self.ul_cqi_tti[idx] = Some(tti);
	}

	/// Applies DL ACK/NACK feedback to the process scheduled at `tti`.
	pub(crate) fn set_ack_info(&mut self, tti: u32, ack: bool) -> Option<(usize, DlAckOutcome)> {
		self.dl_harq
			.iter_mut()
			.find(|h| !h.is_empty() && h.get_tti() == tti)
			.map(|h| (h.get_id(), h.set_ack(ack)))
	}

	/// Applies UL CRC feedback to the synchronous process of `tti - 4`.
	/// Returns the process id, or `None` for a stale report.
	pub(crate) fn set_ul_crc(&mut self, tti: u32, crc_ok: bool) -> Option<(usize, bool)> {
		let tx_tti = tti::tti_sub(tti, 4);
		let h = &mut self.ul_harq[(tx_tti % 8) as usize];
		if h.is_empty() || h.get_tti() != tx_tti {
			return None;
		}
		let dropped = h.set_crc(crc_ok);
		Some((h.get_id(), dropped))
	}

	/// Pending downlink bytes not yet put on the air: RLC queues plus MAC CEs.
	pub fn get_pending_dl_new_data(&self, _tti: u32) -> u32 {
		let rlc: u32 = self
			.lch
			.iter()
			.filter(|lc| {
				lc.cfg
					.is_some_and(|c| !matches!(c.direction, BearerDirection::Ul))
			})
			.map(|lc| lc.buf_tx + lc.buf_retx)
			.sum();
		let ces: u32 = self.pending_ces.iter().map(|&ce| ce_size(ce) + 1).sum();
		rlc + ces
	}

	/// Reported uplink backlog minus what active UL HARQs already carry.
	pub fn get_pending_ul_new_data(&self, _tti: u32) -> u32 {
		let bsr: u32 = self
			.lch
			.iter()
			.filter(|lc| {
				lc.cfg
					.is_some_and(|c| !matches!(c.direction, BearerDirection::Dl))
			})
			.map(|lc| lc.bsr)
			.sum();
		let in_flight: u32 = self
			.ul_harq
			.iter()
			.filter(|h| !h.is_empty())
			.map(UlHarqProc::get_tbs)
			.sum();
		bsr.saturating_sub(in_flight)
	}

	/// An uplink grant is warranted by backlog or a pending scheduling request.
	pub fn ul_grant_needed(&self, tti: u32) -> bool {
		self.get_pending_ul_new_data(tti) > 0 || self.sr
	}

	fn sr_opportunity(&self, tti: u32) -> bool {
		match &self.cfg.pucch {
			Some(p) if self.phy_enabled && p.sr_period_ms > 0 => {
				tti % p.sr_period_ms == p.sr_offset % p.sr_period_ms
			}
			_ => false,
		}
	}

	fn cqi_opportunity(&self, tti: u32) -> bool {
		match &self.cfg.pucch {
			Some(p) if self.phy_enabled && p.cqi_period_ms > 0 => {
				tti % p.cqi_period_ms == p.cqi_offset % p.cqi_period_ms
			}
			_ => false,
		}
	}

	/// True when the SR resource of this UE collides with the implicit
	/// HARQ-ACK PUCCH resource of CCE `ncce` in `tti`.
	pub fn pucch_sr_collision(&self, tti: u32, ncce: u32) -> bool {
		let Some(p) = &self.cfg.pucch else {
			return false;
		};
		self.sr_opportunity(tti) && p.n_pucch_sr == self.cell.n1_pucch_an + ncce
	}

	/// PUCCH PRBs `(prb per slot, L)` this UE occupies in `tti`, if any.
	pub fn get_pucch_sched(&self, tti: u32) -> Option<([u32; 2], u32)> {
		let p = self.cfg.pucch.as_ref()?;
		if !self.sr_opportunity(tti) && !self.cqi_opportunity(tti) {
			return None;
		}
		// Format 1 resources map to the outermost PRBs, mirrored across slots.
		let prb = (p.n_pucch_sr / 36).min(self.cell.nof_prb - 1);
		Some(([prb, self.cell.nof_prb - 1 - prb], 1))
	}

	/// An aperiodic CQI report is requested when the DL channel state is stale.
	pub fn needs_cqi(&self, tti: u32) -> bool {
		self.phy_enabled
			&& self
				.dl_cqi_tti
				.is_none_or(|last| tti::tti_interval(tti, last) > 100)
	}

	pub fn get_locations(&self, cfi: u32, sf_idx: u32) -> &CceLocations {
		&self.locations[(cfi - 1) as usize][sf_idx as usize]
	}

	fn wideband_cqi(&self) -> u8 {
		if self.dl_cqi_tti.is_some() {
			self.dl_cqi
		} else {
			self.cfg.default_dl_cqi
		}
	}

	/// Aggregation level exponent for a DCI of `nof_bits` payload bits.
	pub fn get_aggr_level(&self, nof_bits: u32) -> u32 {
		let mut l: u32 = match self.wideband_cqi() {
			0..=4 => 3,
			5..=7 => 2,
			8..=11 => 1,
			_ => 0,
		};
		// A CCE carries 72 coded bits; stay below ~3/4 code rate.
		while l < 3 && (72u32 << l) * 3 / 4 < nof_bits + 16 {
			l += 1;
		}
		l
	}

	pub fn get_max_retx(&self) -> u32 {
		self.cfg.maxharq_tx
	}

	fn dl_mcs(&self) -> u32 {
		if self.fixed_mcs_dl >= 0 {
			self.fixed_mcs_dl as u32
		} else {
			ra::cqi_to_mcs(self.wideband_cqi()).min(self.max_mcs_dl)
		}
	}

	fn ul_mcs(&self) -> u32 {
		if self.fixed_mcs_ul >= 0 {
			return self.fixed_mcs_ul as u32;
		}
		// Latest report across channel codes; BSR-only UEs start conservative.
		let cqi = self
			.ul_cqi_tti
			.iter()
			.zip(self.ul_cqi.iter())
			.filter_map(|(tti, &cqi)| tti.map(|t| (t, cqi)))
			.max_by_key(|&(t, _)| t)
			.map_or(1, |(_, cqi)| cqi);
		ra::cqi_to_mcs(cqi).min(self.max_mcs_ul)
	}

	pub fn cell_nof_prb(&self) -> u32 {
		self.cell.nof_prb
	}

	pub fn cell_rbg_size(&self) -> u32 {
		self.cell.p
	}

	/// PRBs covered by a type-0 RBG mask (the last group may be short).
	pub fn nof_prb_of_rbgmask(&self, mask: u32) -> u32 {
		let nof_rbg = ra::nof_rbg(self.cell.nof_prb);
		(0..nof_rbg)
			.filter(|&i| mask.get_bit(i as usize))
			.map(|i| self.cell.p.min(self.cell.nof_prb - i * self.cell.p))
			.sum()
	}

	/// Fewest PRBs whose TBS at the current DL MCS carries `req_bytes`.
	pub fn get_required_prb_dl(&self, req_bytes: u32) -> u32 {
		let itbs = ra::dl_mcs_to_itbs(self.dl_mcs());
		(1..=self.cell.nof_prb)
			.find(|&n| ra::tbs_from_idx(itbs, n).is_some_and(|t| t >= req_bytes * 8))
			.unwrap_or(self.cell.nof_prb)
	}

	/// Fewest PRBs whose TBS at the current UL MCS carries `req_bytes`.
	pub fn get_required_prb_ul(&self, req_bytes: u32) -> u32 {
		let itbs = ra::ul_mcs_to_itbs(self.ul_mcs());
		(1..=self.cell.nof_prb)
			.find(|&n| ra::tbs_from_idx(itbs, n).is_some_and(|t| t >= req_bytes * 8))
			.unwrap_or(self.cell.nof_prb)
	}

	pub fn dl_harq(&self, pid: usize) -> &DlHarqProc {
		&self.dl_harq[pid]
	}

	pub fn dl_harq_mut(&mut self, pid: usize) -> &mut DlHarqProc {
		&mut self.dl_harq[pid]
	}

	pub fn ul_harq(&self, pid: usize) -> &UlHarqProc {
		&self.ul_harq[pid]
	}

	pub fn ul_harq_mut(&mut self, pid: usize) -> &mut UlHarqProc {
		&mut self.ul_harq[pid]
	}

	/// The process with a retransmission due in `tti`, if any.
	pub fn dl_harq_with_pending_retx(&self, tti: u32) -> Option<usize> {
		self.dl_harq
			.iter()
			.find(|h| h.has_pending_retx(tti))
			.map(DlHarqProc::get_id)
	}

	pub fn find_empty_dl_harq(&self) -> Option<usize> {
		self.dl_harq
			.iter()
			.find(|h| h.is_empty())
			.map(DlHarqProc::get_id)
	}

	/// Materializes a Format 1 grant on process `pid` for this TTI.
	pub(crate) fn generate_format1(
		&mut self,
		pid: usize,
		data: &mut DlSchedData,
		tti: u32,
		_cfi: u32,
	) -> Option<u32> {
		let tpc = self.take_tpc_cmd();
		let is_newtx = self.dl_harq[pid].is_empty();
		let (mcs, tbs) = if is_newtx {
			let mcs = self.dl_mcs();
			let mask = self.dl_harq[pid].get_rbgmask();
			let n_prb = self.nof_prb_of_rbgmask(mask);
			let tbs = ra::tbs_from_idx(ra::dl_mcs_to_itbs(mcs), n_prb)? / 8;
			if tbs == 0 {
				return None;
			}
			self.dl_harq[pid].set_max_retx(self.cfg.maxharq_tx);
			self.dl_harq[pid].new_tx(tti, mcs, tbs, mask);
			self.build_dl_pdus(data, tbs);
			(mcs, tbs)
		} else {
			self.dl_harq[pid].new_retx(tti);
			(self.dl_harq[pid].get_mcs(), self.dl_harq[pid].get_tbs())
		};

		let h = &self.dl_harq[pid];
		data.rnti = self.rnti;
		data.tbs = tbs;
		data.dci = DciFormat1 {
			rbg_mask: h.get_rbgmask(),
			mcs_idx: mcs,
			rv_idx: h.rv(),
			ndi: h.ndi(),
			harq_pid: pid as u32,
			tpc,
		};
		Some(tbs)
	}

	/// Splits a fresh transport block over pending MAC CEs and RLC bytes.
	fn build_dl_pdus(&mut self, data: &mut DlSchedData, tbs_bytes: u32) {
		let mut rem = tbs_bytes;
		while let Some(&ce) = self.pending_ces.front() {
			let need = ce_size(ce) + 1;
			if need > rem
				|| data
					.pdu
					.push(PduItem {
						lcid: ce,
						nbytes: ce_size(ce),
					})
					.is_err()
			{
				break;
			}
			self.pending_ces.pop_front();
			rem -= need;
		}
		for (lcid, lc) in self.lch.iter_mut().enumerate() {
			if rem == 0 || data.pdu.is_full() {
				break;
			}
			if !lc
				.cfg
				.is_some_and(|c| !matches!(c.direction, BearerDirection::Ul))
			{
				continue;
			}
			let queued = lc.buf_retx + lc.buf_tx;
			if queued == 0 {
				continue;
			}
			let take = queued.min(rem);
			if data
				.pdu
				.push(PduItem {
					lcid: lcid as u8,
					nbytes: take,
				})
				.is_err()
			{
				break;
			}
			// Retransmission bytes drain first.
			let from_retx = take.min(lc.buf_retx);
			lc.buf_retx -= from_retx;
			lc.buf_tx = lc.buf_tx.saturating_sub(take - from_retx);
			rem -= take;
		}
	}

	/// Materializes a Format 0 grant on process `pid` for this TTI.
	pub(crate) fn generate_format0(
		&mut self,
		pid: usize,
		pusch: &mut UlSchedPusch,
		tti: u32,
		cqi_request: bool,
	) -> Option<u32> {
		let tpc = self.take_tpc_cmd();
		let is_newtx = self.ul_harq[pid].is_empty();
		let alloc = self.ul_harq[pid].get_alloc();
		if alloc.l == 0 {
			return None;
		}
		let (mcs, tbs) = if is_newtx {
			let mcs = match self.ul_harq[pid].take_rar_mcs() {
				Some(mcs) => mcs,
				None => self.ul_mcs(),
			};
			let tbs = ra::tbs_from_idx(ra::ul_mcs_to_itbs(mcs), alloc.l)? / 8;
			if tbs == 0 {
				return None;
			}
			self.ul_harq[pid].new_tx(tti, mcs, tbs, alloc);
			(mcs, tbs)
		} else {
			self.ul_harq[pid].new_retx(tti);
			(self.ul_harq[pid].get_mcs(), self.ul_harq[pid].get_tbs())
		};

		let h = &self.ul_harq[pid];
		pusch.rnti = self.rnti;
		pusch.tbs = tbs;
		pusch.alloc = alloc;
		pusch.dci = DciFormat0 {
			riv: ra::type2_to_riv(alloc.l, alloc.rb_start, self.cell.nof_prb),
			rb_start: alloc.rb_start,
			l_prb: alloc.l,
			mcs_idx: mcs,
			rv_idx: h.rv(),
			ndi: h.ndi(),
			tpc,
			cqi_request,
		};
		Some(tbs)
	}
}
