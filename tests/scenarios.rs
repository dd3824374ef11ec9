//! End-to-end scheduler scenarios: an idle broadcasting cell, the random
//! access sequence through Msg3, downlink contention between users, HARQ
//! retransmission timing, RAR expiry, and PUCCH/PDCCH collision avoidance.

use enb_sched::config::{CellConfig, PucchConfig, SibConfig, UeConfig};
use enb_sched::interface::{BcType, PhichValue};
use enb_sched::phy::{pdcch, ra};
use enb_sched::{SchedError, Scheduler};

fn cell(nof_prb: u32) -> CellConfig {
	CellConfig {
		nof_prb,
		..CellConfig::default()
	}
}

fn cell_with_sib1(nof_prb: u32) -> CellConfig {
	let mut cfg = cell(nof_prb);
	cfg.sibs[0] = SibConfig {
		len: 18,
		period_rf: 8,
	};
	cfg
}

fn configured(cfg: CellConfig) -> Scheduler {
	let sched = Scheduler::new();
	sched.cell_cfg(cfg).unwrap();
	sched
}

fn cce_span(location: enb_sched::phy::ra::DciLocation) -> std::ops::Range<u32> {
	location.ncce..location.ncce + (1 << location.l)
}

fn spans_overlap(a: &std::ops::Range<u32>, b: &std::ops::Range<u32>) -> bool {
	a.start < b.end && b.start < a.end
}

/// S1: an idle 50 PRB cell only broadcasts SIB1, in subframe 5 of every even
/// frame, cycling the four redundancy versions.
#[test]
fn idle_cell_broadcasts_sib1_only() {
	let sched = configured(cell_with_sib1(50));

	let mut emissions = Vec::new();
	for tti in 0..160 {
		let result = sched.dl_sched(tti);
		assert!(result.rar.is_empty());
		assert!(result.data.is_empty());
		for bc in &result.bc {
			assert_eq!(bc.bc_type, BcType::Bcch);
			assert_eq!(bc.index, 0);
			assert_eq!(bc.tbs, 18);
			emissions.push((tti, bc.dci.rv_idx));
		}
	}

	let ttis: Vec<u32> = emissions.iter().map(|&(tti, _)| tti).collect();
	assert_eq!(ttis, vec![5, 25, 45, 65, 85, 105, 125, 145]);
	for (tti, _) in &emissions {
		assert_eq!(tti % 10, 5);
		assert_eq!((tti / 10) % 2, 0);
	}
	let rvs: Vec<u32> = emissions.iter().map(|&(_, rv)| rv).collect();
	assert_eq!(rvs, vec![0, 2, 3, 1, 0, 2, 3, 1]);
}

/// S2: one RACH detection leads to exactly one RAR three TTIs later and a
/// PDCCH-less Msg3 grant on the reserved PRBs six TTIs after that.
#[test]
fn single_rach_to_msg3() {
	let sched = configured(cell(50));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_rach_info(100, 7, 0x46, 7).unwrap();

	let mut rars = Vec::new();
	let mut puschs = Vec::new();
	for tti in 100..=105 {
		let dl = sched.dl_sched(tti);
		for rar in &dl.rar {
			rars.push((tti, rar.clone()));
		}
		let ul = sched.ul_sched(tti + 4);
		for pusch in &ul.pusch {
			puschs.push((tti + 4, pusch.clone()));
		}
	}

	assert_eq!(rars.len(), 1);
	let (rar_tti, rar) = &rars[0];
	assert_eq!(*rar_tti, 103);
	assert_eq!(rar.rarnti, (100 + 1) % 10);
	assert_eq!(rar.grants.len(), 1);
	assert_eq!(rar.grants[0].ra_id, 7);
	assert_eq!(rar.grants[0].trunc_mcs, 0);
	assert_eq!(rar.grants[0].tpc_pusch, 3);
	assert_eq!(rar.grants[0].rba, ra::type2_to_riv(3, 2, 50));

	assert_eq!(puschs.len(), 1);
	let (msg3_tti, msg3) = &puschs[0];
	assert_eq!(*msg3_tti, 109);
	assert_eq!(msg3.rnti, 0x46);
	assert!(!msg3.needs_pdcch);
	assert_eq!(msg3.alloc.rb_start, 2);
	assert_eq!(msg3.alloc.l, 3);
	assert_eq!(msg3.dci.mcs_idx, 0);
	assert_eq!(msg3.tbs, 7);

	// The reservation was consumed: the same subframe next frame is clean.
	let ul = sched.ul_sched(119);
	assert!(ul.pusch.is_empty());
}

/// S3: two buffer-loaded users share one TTI with disjoint RBG masks and
/// non-overlapping PDCCH allocations.
#[test]
fn two_ues_contend_for_downlink() {
	let sched = configured(cell(25));
	for rnti in [0x46u16, 0x47] {
		sched.ue_cfg(rnti, UeConfig::default()).unwrap();
		sched.dl_cqi_info(0, rnti, 10).unwrap();
		sched.dl_rlc_buffer_state(rnti, 0, 1500, 0).unwrap();
	}

	let result = sched.dl_sched(10);
	assert_eq!(result.cfi, 3);
	assert_eq!(result.data.len(), 2);
	// Ascending RNTI order is part of the contract.
	assert_eq!(result.data[0].rnti, 0x46);
	assert_eq!(result.data[1].rnti, 0x47);

	let first = &result.data[0];
	let second = &result.data[1];
	assert_ne!(first.dci.rbg_mask, 0);
	assert_ne!(second.dci.rbg_mask, 0);
	assert_eq!(first.dci.rbg_mask & second.dci.rbg_mask, 0);
	assert!(!spans_overlap(
		&cce_span(first.dci_location),
		&cce_span(second.dci_location)
	));
	for data in [first, second] {
		assert!(data.tbs > 0);
		assert_eq!(data.dci.rv_idx, 0);
		assert!(!data.pdu.is_empty());
	}
}

/// S4: a NACK brings the same process back after the 8 TTI round trip, on
/// the identical RBG mask, with the next redundancy version and no new PDUs.
#[test]
fn nack_drives_retransmission() {
	let sched = configured(cell(25));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_cqi_info(0, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 1500, 0).unwrap();

	let first = sched.dl_sched(12);
	assert_eq!(first.data.len(), 1);
	let tx = first.data[0].clone();
	assert_eq!(tx.dci.rv_idx, 0);

	// ACK/NACK received at TTI 20 for the transmission scheduled at TTI 12.
	assert_eq!(sched.dl_ack_info(12, 0x46, false), Ok(0));

	let second = sched.dl_sched(20);
	assert_eq!(second.data.len(), 1);
	let retx = &second.data[0];
	assert_eq!(retx.dci.rbg_mask, tx.dci.rbg_mask);
	assert_eq!(retx.dci.rv_idx, 2);
	assert_eq!(retx.dci.ndi, tx.dci.ndi);
	assert_eq!(retx.dci.harq_pid, tx.dci.harq_pid);
	assert_eq!(retx.tbs, tx.tbs);
	assert!(retx.pdu.is_empty());

	// A positive ACK empties the process and returns its TBS.
	assert_eq!(sched.dl_ack_info(20, 0x46, true), Ok(tx.tbs));
}

/// S5: a detection whose window lapsed before any RAR could go out is
/// dropped; the ra_id never shows up again.
#[test]
fn rar_window_expiry_abandons_detection() {
	let sched = configured(cell(50));
	sched.dl_rach_info(0, 9, 0x46, 7).unwrap();

	// No scheduling happened during the whole window (TTIs 3..=6).
	for tti in 7..40 {
		let result = sched.dl_sched(tti);
		assert!(result.rar.is_empty());
	}
}

/// S6: a candidate whose CCEs collide with the UE's PUCCH SR resource is
/// skipped in favor of the next one.
#[test]
fn pucch_sr_collision_moves_dci() {
	let nof_cce = pdcch::nof_cce(25, 1, 3);
	// First aggregation-2 candidate of rnti 0x46 in subframe 0.
	let blocked = u32::from(pdcch::ue_locations(nof_cce, 0, 0x46).candidates(1)[0]);

	let mut cfg = cell(25);
	cfg.n1_pucch_an = 0;
	let sched = configured(cfg);
	let ue_cfg = UeConfig {
		pucch: Some(PucchConfig {
			n_pucch_sr: blocked,
			sr_period_ms: 10,
			sr_offset: 0,
			cqi_period_ms: 0,
			cqi_offset: 0,
		}),
		..UeConfig::default()
	};
	sched.ue_cfg(0x46, ue_cfg).unwrap();
	sched.phy_config_enabled(0x46, true).unwrap();
	sched.dl_cqi_info(0, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 100, 0).unwrap();

	// TTI 50 is an SR opportunity (period 10, offset 0) in subframe 0.
	let result = sched.dl_sched(50);
	assert_eq!(result.data.len(), 1);
	assert_ne!(result.data[0].dci_location.ncce, blocked);
}

/// Within one TTI, broadcast precedes RAR precedes data on the RBG grid.
#[test]
fn emission_order_is_bc_rar_data() {
	let sched = configured(cell_with_sib1(50));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_cqi_info(0, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 500, 0).unwrap();
	sched.dl_rach_info(2, 3, 0x47, 7).unwrap();

	// TTI 5: SIB1 due, RAR window open (5 - 2 = 3), data pending.
	let result = sched.dl_sched(5);
	assert_eq!(result.bc.len(), 1);
	assert_eq!(result.rar.len(), 1);
	assert_eq!(result.data.len(), 1);

	// SIB1 sits at the bottom of the grid, the RAR right above it
	// (si_n_rbg = 1 RBG = 3 PRBs in a 50 PRB cell).
	assert_eq!(result.bc[0].dci.rb_start, 0);
	assert_eq!(result.rar[0].dci.rb_start, 3);
	// Data starts above everything the broadcast path consumed.
	let mask = result.data[0].dci.rbg_mask;
	assert_eq!(mask & 0b1111, 0);

	// All PDCCH allocations of the TTI are disjoint.
	let spans = [
		cce_span(result.bc[0].dci_location),
		cce_span(result.rar[0].dci_location),
		cce_span(result.data[0].dci_location),
	];
	for (i, a) in spans.iter().enumerate() {
		for b in &spans[i + 1..] {
			assert!(!spans_overlap(a, b));
		}
	}
}

/// `dl_sched(t)` and `ul_sched(t + 4)` share one PDCCH bitmap; their grants
/// never overlap regardless of call order.
#[test]
fn dl_and_ul_share_pdcch_bitmap() {
	let sched = configured(cell(25));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_cqi_info(0, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 800, 0).unwrap();
	sched.ul_bsr(0x46, 0, 300).unwrap();

	let dl = sched.dl_sched(10);
	let ul = sched.ul_sched(14);
	assert_eq!(dl.data.len(), 1);
	assert_eq!(ul.pusch.len(), 1);
	assert!(ul.pusch[0].needs_pdcch);
	assert!(!spans_overlap(
		&cce_span(dl.data[0].dci_location),
		&cce_span(ul.pusch[0].dci_location)
	));
}

/// UL CRC feedback rides back on PHICH two calls later and a failed CRC
/// retransmits without a new PDCCH on the same PRBs.
#[test]
fn ul_crc_drives_phich_and_retx() {
	let sched = configured(cell(25));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.ul_bsr(0x46, 0, 300).unwrap();

	let first = sched.ul_sched(16);
	assert_eq!(first.pusch.len(), 1);
	let grant = first.pusch[0].clone();
	assert!(grant.needs_pdcch);

	// PUSCH at 16, CRC reported at 20, PHICH and retx in the TTI 24 result.
	sched.ul_crc_info(20, 0x46, false).unwrap();
	let second = sched.ul_sched(24);
	assert_eq!(second.phich.len(), 1);
	assert_eq!(second.phich[0].rnti, 0x46);
	assert_eq!(second.phich[0].phich, PhichValue::Nack);
	assert_eq!(second.pusch.len(), 1);
	let retx = &second.pusch[0];
	assert!(!retx.needs_pdcch);
	assert_eq!(retx.alloc, grant.alloc);
	assert_eq!(retx.dci.rv_idx, 2);
}

/// HARQ timing survives the TTI wrap at 10240.
#[test]
fn harq_timing_wraps() {
	let sched = configured(cell(25));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_cqi_info(10230, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 400, 0).unwrap();

	let first = sched.dl_sched(10236);
	assert_eq!(first.data.len(), 1);
	sched.dl_ack_info(10236, 0x46, false).unwrap();

	// 10236 + 8 wraps to TTI 4.
	let second = sched.dl_sched(4);
	assert_eq!(second.data.len(), 1);
	assert_eq!(second.data[0].dci.rbg_mask, first.data[0].dci.rbg_mask);
	assert_eq!(second.data[0].dci.rv_idx, 2);
}

/// Removing a UE mid-flight makes later feedback an error instead of a hit
/// on somebody else's HARQ state.
#[test]
fn removed_ue_feedback_is_unknown_rnti() {
	let sched = configured(cell(25));
	sched.ue_cfg(0x46, UeConfig::default()).unwrap();
	sched.dl_cqi_info(0, 0x46, 10).unwrap();
	sched.dl_rlc_buffer_state(0x46, 0, 400, 0).unwrap();

	let result = sched.dl_sched(10);
	assert_eq!(result.data.len(), 1);

	sched.ue_rem(0x46).unwrap();
	assert_eq!(
		sched.dl_ack_info(10, 0x46, true),
		Err(SchedError::UnknownRnti(0x46))
	);
	// The next TTI simply schedules nobody.
	let result = sched.dl_sched(11);
	assert!(result.data.is_empty());
}
