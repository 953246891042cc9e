//! Promiscuous mode arbitration
//!
//! While the switch is active the adapter has to run in promiscuous mode so
//! the switch sees traffic for every VM. The host stack must not notice: its
//! packet filter queries are answered without the forced bit, and its own
//! filter is put back once the switch no longer needs the adapter.

use ndis_rs::{PacketFilter, PhysicalMedium};

use crate::sync::SpinLock;

#[derive(Debug)]
struct ArbitratorState {
    /// Whether the medium supports promiscuous mode at all
    capable: bool,
    active: bool,
    /// Last filter the host stack set (or, failing that, the one we found
    /// when first forcing promiscuous mode)
    host_filter: Option<PacketFilter>,
}

/// The view of the arbitrator one OID request is handled with
///
/// Taken once when the request arrives and used for both its downward
/// rewrite and its completion, so that an activation change in between
/// can't apply half of the rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestSnapshot {
    /// Promiscuous mode is being forced on the adapter
    pub forcing: bool,
    /// The host stack asked for promiscuous mode itself
    pub host_promiscuous: bool,
}

/// A request to issue to the adapter on an activation change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    None,
    /// Set the adapter's packet filter to this value
    Set(PacketFilter),
    /// The host never set a filter: query the current one, hand it to
    /// [`PromiscArbitrator::record_queried`], then set what that returns
    QueryThenForce,
}

#[derive(Debug)]
pub struct PromiscArbitrator {
    state: SpinLock<ArbitratorState>,
}

impl PromiscArbitrator {
    pub fn new(medium: PhysicalMedium) -> Self {
        Self {
            state: SpinLock::new(ArbitratorState {
                capable: medium.supports_promiscuous(),
                active: false,
                host_filter: None,
            }),
        }
    }

    /// Updates the medium, e.g. after the adapter answered a physical medium query
    pub fn set_medium(&self, medium: PhysicalMedium) {
        self.state.lock().capable = medium.supports_promiscuous();
    }

    pub fn is_capable(&self) -> bool {
        self.state.lock().capable
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Whether the host stack itself asked for promiscuous mode
    pub fn host_promiscuous(&self) -> bool {
        self.state
            .lock()
            .host_filter
            .is_some_and(|filter| filter.contains(PacketFilter::PROMISCUOUS))
    }

    /// The packet filter the host stack last set
    pub fn host_filter(&self) -> Option<PacketFilter> {
        self.state.lock().host_filter
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        let state = self.state.lock();
        RequestSnapshot {
            forcing: state.capable && state.active,
            host_promiscuous: state
                .host_filter
                .is_some_and(|filter| filter.contains(PacketFilter::PROMISCUOUS)),
        }
    }

    /// Rewrites the adapter's answer to a packet filter query before it goes
    /// up to the host stack. A host that set promiscuous mode itself sees it.
    pub fn on_query_complete(&self, filter: PacketFilter, snapshot: RequestSnapshot) -> PacketFilter {
        if snapshot.forcing && !snapshot.host_promiscuous {
            filter.difference(PacketFilter::PROMISCUOUS)
        } else {
            filter
        }
    }

    /// Records a packet filter set by the host stack, returning the filter
    /// to actually send to the adapter.
    pub fn on_set_request(&self, requested: PacketFilter, snapshot: RequestSnapshot) -> PacketFilter {
        let mut state = self.state.lock();
        if !state.capable {
            return requested;
        }

        state.host_filter = Some(requested);

        if snapshot.forcing {
            requested.union(PacketFilter::PROMISCUOUS)
        } else {
            requested
        }
    }

    /// A host packet filter set finished, returning whether the host now
    /// wants promiscuous mode, for reporting to the switch.
    pub fn on_set_complete(&self, succeeded: bool) -> Option<bool> {
        let state = self.state.lock();
        if !succeeded || !state.capable {
            return None;
        }

        state
            .host_filter
            .map(|filter| filter.contains(PacketFilter::PROMISCUOUS))
    }

    /// The switch started wanting traffic
    pub fn on_activate(&self) -> FilterAction {
        let mut state = self.state.lock();
        if !state.capable || state.active {
            return FilterAction::None;
        }
        state.active = true;

        match state.host_filter {
            Some(filter) if filter.contains(PacketFilter::PROMISCUOUS) => FilterAction::None,
            Some(filter) => FilterAction::Set(filter.union(PacketFilter::PROMISCUOUS)),
            None => FilterAction::QueryThenForce,
        }
    }

    /// The switch stopped wanting traffic
    pub fn on_deactivate(&self) -> FilterAction {
        let mut state = self.state.lock();
        if !state.capable || !state.active {
            return FilterAction::None;
        }
        state.active = false;

        match state.host_filter {
            Some(filter) if filter.contains(PacketFilter::PROMISCUOUS) => FilterAction::None,
            Some(filter) => FilterAction::Set(filter),
            None => FilterAction::None,
        }
    }

    /// Takes the adapter's current filter found while activating, returning
    /// the filter to force onto the adapter (or `None` if nothing needs to
    /// be set anymore).
    pub fn record_queried(&self, current: PacketFilter) -> Option<PacketFilter> {
        let mut state = self.state.lock();
        if !state.capable || !state.active {
            return None;
        }

        // A set from the host that raced with the query wins
        let host_filter = *state.host_filter.get_or_insert(current);
        if host_filter.contains(PacketFilter::PROMISCUOUS) {
            None
        } else {
            Some(host_filter.union(PacketFilter::PROMISCUOUS))
        }
    }
}

#[cfg(test)]
mod test {
    use ndis_rs::{PacketFilter, PhysicalMedium};

    use super::{FilterAction, PromiscArbitrator, RequestSnapshot};

    const HOST: PacketFilter = PacketFilter::DIRECTED.union(PacketFilter::BROADCAST);

    #[test]
    fn activation_round_trip_restores_host_filter() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);

        let snapshot = arbitrator.snapshot();
        assert_eq!(arbitrator.on_set_request(HOST, snapshot), HOST);

        assert_eq!(
            arbitrator.on_activate(),
            FilterAction::Set(HOST | PacketFilter::PROMISCUOUS)
        );

        // Host queries while active never see the forced bit
        let snapshot = arbitrator.snapshot();
        assert!(snapshot.forcing);
        assert_eq!(
            arbitrator.on_query_complete(HOST | PacketFilter::PROMISCUOUS, snapshot),
            HOST
        );

        assert_eq!(arbitrator.on_deactivate(), FilterAction::Set(HOST));
        assert!(!arbitrator.host_promiscuous());
    }

    #[test]
    fn host_set_while_active_is_forced_and_cached() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);
        arbitrator.on_set_request(HOST, arbitrator.snapshot());
        arbitrator.on_activate();

        let snapshot = arbitrator.snapshot();
        assert_eq!(
            arbitrator.on_set_request(PacketFilter::DIRECTED, snapshot),
            PacketFilter::DIRECTED | PacketFilter::PROMISCUOUS
        );
        assert_eq!(arbitrator.host_filter(), Some(PacketFilter::DIRECTED));

        assert_eq!(
            arbitrator.on_deactivate(),
            FilterAction::Set(PacketFilter::DIRECTED)
        );
    }

    #[test]
    fn promiscuous_host_is_left_alone() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);
        let wanted = HOST | PacketFilter::PROMISCUOUS;
        arbitrator.on_set_request(wanted, arbitrator.snapshot());

        assert_eq!(arbitrator.on_activate(), FilterAction::None);
        assert_eq!(arbitrator.on_deactivate(), FilterAction::None);
        assert!(arbitrator.host_promiscuous());
        assert_eq!(arbitrator.on_set_complete(true), Some(true));
    }

    #[test]
    fn host_promiscuous_shows_in_queries() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);
        let wanted = PacketFilter::DIRECTED | PacketFilter::PROMISCUOUS;
        arbitrator.on_set_request(wanted, arbitrator.snapshot());
        arbitrator.on_activate();

        let snapshot = arbitrator.snapshot();
        assert!(snapshot.forcing);
        assert!(snapshot.host_promiscuous);
        assert_eq!(arbitrator.on_query_complete(wanted, snapshot), wanted);

        // Dropping it again while active hides the bit we now force
        arbitrator.on_set_request(PacketFilter::DIRECTED, arbitrator.snapshot());
        assert_eq!(
            arbitrator.on_query_complete(wanted, arbitrator.snapshot()),
            PacketFilter::DIRECTED
        );
    }

    #[test]
    fn activation_without_host_filter_queries_first() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);

        assert_eq!(arbitrator.on_activate(), FilterAction::QueryThenForce);
        assert_eq!(
            arbitrator.record_queried(HOST),
            Some(HOST | PacketFilter::PROMISCUOUS)
        );
        assert_eq!(arbitrator.on_deactivate(), FilterAction::Set(HOST));
    }

    #[test]
    fn snapshot_outlives_activation_change() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::IEEE802_3);
        arbitrator.on_set_request(HOST, arbitrator.snapshot());
        arbitrator.on_activate();

        // Query went down while forcing, deactivation happens before it completes
        let snapshot = arbitrator.snapshot();
        arbitrator.on_deactivate();

        assert_eq!(
            arbitrator.on_query_complete(HOST | PacketFilter::PROMISCUOUS, snapshot),
            HOST
        );
        assert_eq!(
            arbitrator.on_query_complete(HOST, RequestSnapshot::default()),
            HOST
        );
    }

    #[test]
    fn wireless_media_are_untouched() {
        let arbitrator = PromiscArbitrator::new(PhysicalMedium::NATIVE_802_11);

        assert_eq!(arbitrator.on_set_request(HOST, arbitrator.snapshot()), HOST);
        assert_eq!(arbitrator.on_activate(), FilterAction::None);
        assert!(!arbitrator.snapshot().forcing);
        assert_eq!(arbitrator.host_filter(), None);
        assert_eq!(arbitrator.on_deactivate(), FilterAction::None);
    }
}
