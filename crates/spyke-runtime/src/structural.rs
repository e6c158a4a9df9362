//! Structural plasticity collaborator interface
//!
//! Rewiring runs between timesteps, after the drain for the closing step has
//! finished and before the next spike is routed, so it never overlaps a
//! lookup.

use crate::error::Result;
use crate::routing::RoutingTable;

/// Rewrites the routing table between timesteps
pub trait StructuralPlasticity {
    /// Called once per timer tick before `time` begins
    fn rewire(&mut self, time: u32, routing: &mut RoutingTable) -> Result<()>;
}

/// Leaves the routing table unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewiring;

impl StructuralPlasticity for NoRewiring {
    fn rewire(&mut self, _time: u32, _routing: &mut RoutingTable) -> Result<()> {
        Ok(())
    }
}
