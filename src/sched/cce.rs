//! Per-TTI PDCCH bookkeeping.
//!
//! One bitmap of used CCEs is shared by `dl_sched` and `ul_sched` of the same
//! TTI pairing; whichever entry point runs first resets it (tracked by a
//! `last_reset_tti` marker in the scheduler, not here). Allocation walks the
//! search space candidates of the requested aggregation level and takes the
//! first span that neither overlaps an earlier grant nor collides with the
//! user's PUCCH/SR reservation.

use bit_field::BitField;

use crate::phy::pdcch::CceLocations;
use crate::phy::ra::DciLocation;
use crate::sched::ue::SchedUe;

/// Used-CCE bitmap of one TTI.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PdcchScratch {
	used: u128,
}

impl PdcchScratch {
	pub const fn new() -> Self {
		Self { used: 0 }
	}

	pub fn reset(&mut self) {
		self.used = 0;
	}

	#[cfg(test)]
	pub fn is_used(&self, ncce: u32) -> bool {
		self.used.get_bit(ncce as usize)
	}

	/// Reserves `2^l` CCEs at the first eligible candidate of `locations`.
	pub fn allocate(
		&mut self,
		locations: &CceLocations,
		l: u32,
		tti: u32,
		user: Option<&SchedUe>,
	) -> Option<DciLocation> {
		let span = 1u32 << l;
		for &start in locations.candidates(l) {
			let ncce = u32::from(start);
			let collides = (ncce..ncce + span).any(|cce| {
				self.used.get_bit(cce as usize)
					|| user.is_some_and(|ue| ue.pucch_sr_collision(tti, cce))
			});
			if collides {
				continue;
			}
			for cce in ncce..ncce + span {
				self.used.set_bit(cce as usize, true);
			}
			debug!("SCHED: allocated DCI L={l}, ncce={ncce}");
			return Some(DciLocation { l, ncce });
		}
		None
	}
}
