//! Static configuration of the cell, the scheduler, and its users.

/// Maximum number of SIBs a cell may broadcast.
pub const MAX_SIBS: usize = 16;
/// Capacity of the pending-RAR ring.
pub const MAX_PENDING_RAR: usize = 8;
/// Logical channels per UE.
pub const MAX_LC: usize = 6;
/// HARQ processes per direction per UE (FDD).
pub const NOF_HARQ_PROC: usize = 8;

/// Capacities of the per-TTI result payload lists.
pub const MAX_BC_LIST: usize = 8;
pub const MAX_RAR_LIST: usize = 8;
pub const MAX_RAR_GRANTS: usize = 4;
pub const MAX_DATA_LIST: usize = 32;
pub const MAX_PDU_LIST: usize = MAX_LC + 4;
pub const MAX_PUSCH_LIST: usize = 32;
pub const MAX_PHICH_LIST: usize = 32;

/// One system information block: payload length in bytes and period in radio
/// frames. `len == 0` means the SIB is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SibConfig {
	pub len: u32,
	pub period_rf: u32,
}

/// Cell configuration, immutable after `cell_cfg`.
#[derive(Debug, Clone)]
pub struct CellConfig {
	/// Cell bandwidth in PRBs (6..=100).
	pub nof_prb: u32,
	/// Number of antenna ports (1, 2 or 4).
	pub nof_ports: u32,
	pub sibs: [SibConfig; MAX_SIBS],
	/// SI window length in ms (1..=40).
	pub si_window_ms: u32,
	/// RAR window length in TTIs.
	pub prach_rar_window: u32,
	/// Maximum number of Msg3 HARQ transmissions.
	pub maxharq_msg3tx: u32,
	/// PUCCH format 1 resource offset `N^(1)_PUCCH`; the implicit HARQ-ACK
	/// resource of CCE `n` is `n1_pucch_an + n`.
	pub n1_pucch_an: u32,
}

impl Default for CellConfig {
	fn default() -> Self {
		Self {
			nof_prb: 25,
			nof_ports: 1,
			sibs: [SibConfig::default(); MAX_SIBS],
			si_window_ms: 40,
			prach_rar_window: 3,
			maxharq_msg3tx: 5,
			n1_pucch_an: 0,
		}
	}
}

impl CellConfig {
	/// Checks the invariants `cell_cfg` relies on.
	pub fn validate(&self) -> Result<(), &'static str> {
		if self.si_window_ms == 0 {
			return Err("si-window length 0 ms");
		}
		if !(6..=100).contains(&self.nof_prb) {
			return Err("nof_prb outside 6..=100");
		}
		if !matches!(self.nof_ports, 1 | 2 | 4) {
			return Err("nof_ports not in {1, 2, 4}");
		}
		Ok(())
	}
}

/// Mutable scheduler arguments. A fixed MCS of `-1` means "derive from CQI,
/// bounded by the corresponding maximum".
#[derive(Debug, Clone, Copy)]
pub struct SchedArgs {
	pub pdsch_mcs: i32,
	pub pdsch_max_mcs: i32,
	pub pusch_mcs: i32,
	pub pusch_max_mcs: i32,
	/// The CFI (1..=3).
	pub nof_ctrl_symbols: u32,
}

impl Default for SchedArgs {
	fn default() -> Self {
		Self {
			pdsch_mcs: -1,
			pdsch_max_mcs: 28,
			pusch_mcs: -1,
			pusch_max_mcs: 28,
			nof_ctrl_symbols: 3,
		}
	}
}

/// Per-bearer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeBearerConfig {
	pub priority: u8,
	pub direction: BearerDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerDirection {
	Dl,
	Ul,
	Both,
}

impl Default for UeBearerConfig {
	fn default() -> Self {
		Self {
			priority: 1,
			direction: BearerDirection::Both,
		}
	}
}

/// PUCCH/SR configuration of one UE. Inert until `phy_config_enabled`.
#[derive(Debug, Clone, Copy)]
pub struct PucchConfig {
	/// The SR resource `n^(1)_PUCCH,SRI`.
	pub n_pucch_sr: u32,
	/// SR opportunity period in TTIs.
	pub sr_period_ms: u32,
	/// SR opportunity offset within the period.
	pub sr_offset: u32,
	/// Periodic CQI reporting period in TTIs; 0 disables periodic CQI.
	pub cqi_period_ms: u32,
	pub cqi_offset: u32,
}

/// Per-UE configuration supplied by `ue_cfg`.
#[derive(Debug, Clone)]
pub struct UeConfig {
	/// Maximum HARQ transmissions for regular data.
	pub maxharq_tx: u32,
	/// Wideband CQI assumed until the first report arrives.
	pub default_dl_cqi: u8,
	pub pucch: Option<PucchConfig>,
	/// Initially configured bearers, indexed by LCID.
	pub bearers: [Option<UeBearerConfig>; MAX_LC],
}

impl Default for UeConfig {
	fn default() -> Self {
		// SRB0 exists from the start.
		let mut bearers = [None; MAX_LC];
		bearers[0] = Some(UeBearerConfig::default());
		Self {
			maxharq_tx: 5,
			default_dl_cqi: 1,
			pucch: None,
			bearers,
		}
	}
}
