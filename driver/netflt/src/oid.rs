//! OID request tracking
//!
//! Requests from the host stack are cloned before being passed down, so that
//! the clone can be rewritten without touching the original. At most one
//! clone is in flight per tracker:
//!
//! ```text
//! Idle --begin--> ClonedPending --complete--> Completing --(guard dropped)--> Idle
//! ```
//!
//! The clone itself lives in a [`RequestSlot`], which is how a completion is
//! reunited with its request.

use core::ops::Deref;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use ndis_rs::{Oid, PacketFilter};
use request_slot::RequestSlot;

use crate::error::{Error, Result};
use crate::promisc::RequestSnapshot;
use crate::sync::SpinLock;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidKind {
    Query,
    Set,
}

/// An `NDIS_OID_REQUEST`
#[derive(Debug)]
pub struct OidRequest {
    id: u64,
    oid: Oid,
    kind: OidKind,
    /// Information buffer, written back by queries
    data: SpinLock<Vec<u8>>,
    /// The request this one was cloned from
    original: Option<Arc<OidRequest>>,
    /// Arbitration state the clone was rewritten with
    snapshot: RequestSnapshot,
}

impl OidRequest {
    fn new(oid: Oid, kind: OidKind, data: Vec<u8>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            oid,
            kind,
            data: SpinLock::new(data),
            original: None,
            snapshot: RequestSnapshot::default(),
        }
    }

    /// A query with room for `len` bytes of answer
    pub fn query(oid: Oid, len: usize) -> Self {
        Self::new(oid, OidKind::Query, vec![0; len])
    }

    pub fn set(oid: Oid, data: impl Into<Vec<u8>>) -> Self {
        Self::new(oid, OidKind::Set, data.into())
    }

    /// Clones `original` for passing down, remembering the arbitration
    /// state it is handled with.
    pub fn clone_for_lower(original: &Arc<OidRequest>, snapshot: RequestSnapshot) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            oid: original.oid,
            kind: original.kind,
            data: SpinLock::new(original.data()),
            original: Some(original.clone()),
            snapshot,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn kind(&self) -> OidKind {
        self.kind
    }

    pub fn original(&self) -> Option<&Arc<OidRequest>> {
        self.original.as_ref()
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        self.snapshot
    }

    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn set_data(&self, data: &[u8]) {
        let mut buffer = self.data.lock();
        buffer.clear();
        buffer.extend_from_slice(data);
    }

    /// Whether this is a request on the adapter's packet filter
    pub fn is_packet_filter(&self) -> bool {
        self.oid == Oid::GEN_CURRENT_PACKET_FILTER
    }

    /// The information buffer read as a packet filter
    pub fn packet_filter(&self) -> Option<PacketFilter> {
        PacketFilter::from_le_bytes(&self.data.lock())
    }

    pub fn set_packet_filter(&self, filter: PacketFilter) {
        self.set_data(&filter.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OidState {
    Idle = 0,
    ClonedPending = 1,
    Completing = 2,
}

impl OidState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::ClonedPending,
            2 => Self::Completing,
            _ => Self::Idle,
        }
    }
}

/// Tracks the single in-flight clone of one request stream
#[derive(Debug)]
pub struct OidTracker {
    state: AtomicU8,
    slot: RequestSlot<OidRequest>,
}

impl Default for OidTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OidTracker {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(OidState::Idle as u8),
            slot: RequestSlot::new(),
        }
    }

    pub fn state(&self) -> OidState {
        OidState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Marks `clone` as the request in flight
    ///
    /// ## Errors
    ///
    /// - [`Error::RequestInFlight`] if another request hasn't completed yet
    pub fn begin(&self, clone: Arc<OidRequest>) -> Result<()> {
        self.state
            .compare_exchange(
                OidState::Idle as u8,
                OidState::ClonedPending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::RequestInFlight)?;

        if self.slot.try_put(clone).is_err() {
            // Slot and state always move together, so this is a bug somewhere
            debug_assert!(false, "idle oid tracker with an occupied slot");
            self.state.store(OidState::Idle as u8, Ordering::Release);
            return Err(Error::RequestInFlight);
        }

        Ok(())
    }

    /// Reunites a completed request with the in-flight one.
    ///
    /// Returns `None` if `clone` isn't the request this tracker is waiting
    /// for. The tracker goes back to idle once the returned guard is dropped.
    pub fn complete(&self, clone: &Arc<OidRequest>) -> Option<CompletingOid<'_>> {
        let request = self.slot.take_if(clone)?;

        let moved = self.state.compare_exchange(
            OidState::ClonedPending as u8,
            OidState::Completing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug_assert!(moved.is_ok(), "oid completion without a pending request");

        Some(CompletingOid {
            tracker: self,
            request,
        })
    }

    /// Gives up on the in-flight request, e.g. when the module goes away
    pub fn abandon(&self) -> Option<Arc<OidRequest>> {
        let request = self.slot.take();
        self.state.store(OidState::Idle as u8, Ordering::Release);
        request
    }
}

/// A request being completed, see [`OidTracker::complete`]
#[derive(Debug)]
pub struct CompletingOid<'a> {
    tracker: &'a OidTracker,
    request: Arc<OidRequest>,
}

impl CompletingOid<'_> {
    pub fn request(&self) -> &Arc<OidRequest> {
        &self.request
    }
}

impl Deref for CompletingOid<'_> {
    type Target = OidRequest;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

impl Drop for CompletingOid<'_> {
    fn drop(&mut self) {
        self.tracker
            .state
            .store(OidState::Idle as u8, Ordering::Release);
    }
}
