//! Drop or pass decisions for batches of buffer lists
//!
//! The unit of decision is the buffer list, since that's also the unit the
//! OS completes. A list is only dropped from the OS path if the switch
//! consumed every packet in it, otherwise the whole list passes through
//! unmodified.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use ndis_rs::{NblChain, NblFlags, NblQueue, NetBufferList, SourceHandle};

use crate::convert::buffer_to_sg_into;
use crate::instance::FilterInstance;
use crate::sg::SgBuf;
use crate::switch::Direction;

/// Data path counters of one filter module
#[derive(Debug, Default)]
pub struct ForwardStats {
    offered: AtomicU64,
    consumed: AtomicU64,
    passed_lists: AtomicU64,
    dropped_lists: AtomicU64,
    loopback_drops: AtomicU64,
    conversion_failures: AtomicU64,
}

/// A point in time copy of [`ForwardStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardStatsSnapshot {
    /// Packets offered to the switch
    pub offered: u64,
    /// Packets the switch consumed
    pub consumed: u64,
    pub passed_lists: u64,
    pub dropped_lists: u64,
    /// Lists dropped as loopbacks of our own packets
    pub loopback_drops: u64,
    /// Packets that couldn't be described to the switch
    pub conversion_failures: u64,
}

impl ForwardStats {
    pub fn snapshot(&self) -> ForwardStatsSnapshot {
        ForwardStatsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            passed_lists: self.passed_lists.load(Ordering::Relaxed),
            dropped_lists: self.dropped_lists.load(Ordering::Relaxed),
            loopback_drops: self.loopback_drops.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything besides the instance a forwarding decision depends on
#[derive(Debug, Clone, Copy)]
pub struct ForwardContext<'a> {
    /// Source handle our own injected buffer lists are tagged with
    pub owner: SourceHandle,
    /// Let the host see VM traffic, see [`FilterConfig`]
    ///
    /// [`FilterConfig`]: crate::config::FilterConfig
    pub pass_vm_traffic_to_host: bool,
    /// Whether the host stack itself asked for promiscuous mode
    pub host_promiscuous: bool,
    pub stats: &'a ForwardStats,
}

/// The result of forwarding a batch
#[derive(Debug, Default)]
pub struct ForwardOutcome {
    /// Lists to pass on unmodified
    pub pass: NblQueue,
    /// Lists to complete (or return) right away
    pub drop: NblQueue,
}

/// Decides for every list in `lists` whether to drop or pass it, handing the
/// packets to the switch along the way.
///
/// Without an `instance` (or with one that isn't active) everything passes.
/// All of the work happens synchronously, so this is fine to call for
/// batches that can't be pended.
pub fn forward_batch(
    instance: Option<&Arc<FilterInstance>>,
    lists: NblChain,
    direction: Direction,
    ctx: &ForwardContext<'_>,
) -> ForwardOutcome {
    let mut outcome = ForwardOutcome::default();

    for nbl in lists {
        let drop_it = match instance.and_then(|instance| instance.try_retain_if_active()) {
            // Bypassed
            None => false,
            Some(busy) => decide(&busy, &nbl, direction, ctx),
        };

        if drop_it {
            ForwardStats::bump(&ctx.stats.dropped_lists);
            outcome.drop.push_back(nbl);
        } else {
            ForwardStats::bump(&ctx.stats.passed_lists);
            outcome.pass.push_back(nbl);
        }
    }

    outcome
}

fn decide(
    instance: &FilterInstance,
    nbl: &NetBufferList,
    direction: Direction,
    ctx: &ForwardContext<'_>,
) -> bool {
    if nbl.flags().contains(NblFlags::IS_LOOPBACK_PACKET)
        && nbl.source_handle() == Some(ctx.owner)
    {
        if ctx.pass_vm_traffic_to_host {
            return false;
        }

        // Already reached its destination when we injected it
        ForwardStats::bump(&ctx.stats.loopback_drops);
        return true;
    }

    let all_consumed = offer_all(instance, nbl, direction, ctx.stats);

    if ctx.pass_vm_traffic_to_host && ctx.host_promiscuous {
        return false;
    }

    all_consumed
}

/// Offers every packet of `nbl` to the switch, returning whether all of them
/// were consumed. An empty list counts as not consumed.
fn offer_all(
    instance: &FilterInstance,
    nbl: &NetBufferList,
    direction: Direction,
    stats: &ForwardStats,
) -> bool {
    let mut sg = SgBuf::new();
    let mut packets = 0usize;
    let mut all_consumed = true;

    for nb in nbl.nb_chain().iter() {
        packets += 1;

        if let Err(err) = buffer_to_sg_into(&mut sg, nb) {
            trace!("{}: not offering packet: {err}", instance.name());
            ForwardStats::bump(&stats.conversion_failures);
            all_consumed = false;
            continue;
        }

        ForwardStats::bump(&stats.offered);
        if instance.deliver_to_switch(&sg, direction) {
            ForwardStats::bump(&stats.consumed);
        } else {
            all_consumed = false;
        }
    }

    packets > 0 && all_consumed
}
