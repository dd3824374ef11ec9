//! PHY-facing primitives: resource allocation coding, transport block
//! sizing, and PDCCH search space geometry.

pub mod pdcch;
pub mod ra;
