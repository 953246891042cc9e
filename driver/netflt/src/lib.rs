//! Bridging filter core for a virtual switch
//!
//! Sits between the host protocol stack and a network adapter, handing the
//! traffic passing through to a virtual switch port and injecting the
//! switch's packets in both directions.
//!
//! The pieces fit together like this:
//!
//! - [`DriverContext`] keeps the [`FilterModule`]s the OS attached, one per
//!   network interface
//! - [`FilterInstance`] is the switch's end, bound to a module by interface
//!   name
//! - [`forward_batch`] decides, per buffer list, whether the host still gets
//!   to see a packet after the switch had its go at it
//! - [`PromiscArbitrator`] keeps the adapter promiscuous while the switch is
//!   active, without the host stack noticing

pub mod backend;
pub mod config;
pub mod convert;
pub mod counter;
pub mod driver;
pub mod error;
pub mod forward;
pub mod indication;
pub mod instance;
pub mod logger;
pub mod module;
pub mod oid;
pub mod pool;
pub mod promisc;
pub mod registry;
pub mod sg;
pub mod switch;
pub mod sync;

pub use backend::{HostBackend, HostBinding};
pub use config::{FilterConfig, PoolClassConfig};
pub use driver::{DriverContext, NdisBackend};
pub use error::{Error, Result};
pub use forward::{forward_batch, ForwardContext, ForwardOutcome, ForwardStatsSnapshot};
pub use instance::{FilterInstance, InstanceRef, LifecycleState, TrunkState};
pub use module::{FilterModule, FilterState, NdisFilterOps};
pub use promisc::PromiscArbitrator;
pub use sg::SgBuf;
pub use switch::{AddressChange, Destination, Direction, SwitchPort};

// Shared between the OS callbacks, the switch, and the data path
static_assertions::assert_impl_all!(DriverContext: Send, Sync);
static_assertions::assert_impl_all!(FilterModule: Send, Sync);
static_assertions::assert_impl_all!(FilterInstance: Send, Sync);
static_assertions::assert_impl_all!(SgBuf<'static>: Send, Sync);

/// Smallest Ethernet frame, without the frame check sequence
pub const ETH_MIN_PACKET_SIZE: usize = 60;
/// Largest non-jumbo Ethernet frame, without the frame check sequence
pub const ETH_MAX_PACKET_SIZE: usize = 1514;

/// An Ethernet MAC address
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn zero() -> Self {
        Self([0; 6])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl core::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Doubles for the switch, the host backend, and the OS

    use std::net::IpAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use ndis_rs::{
        NblChain, NblCountedQueue, NblQueue, NdisStatus, Oid, PacketFilter, PhysicalMedium, ReceiveFlags,
        ReturnFlags, SendCompleteFlags, SendFlags,
    };

    use crate::backend::{HostBackend, HostBinding};
    use crate::error::{Error, Result};
    use crate::indication::StatusIndication;
    use crate::instance::FilterInstance;
    use crate::module::{FilterModule, NdisFilterOps};
    use crate::oid::{OidKind, OidRequest};
    use crate::sg::SgBuf;
    use crate::switch::{AddressChange, Destination, Direction, SwitchPort};
    use crate::MacAddr;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum SwitchEvent {
        MacAddress(MacAddr),
        Promiscuous(bool),
        HostAddress(AddressChange, IpAddr),
        HostGone,
    }

    /// A switch port that consumes everything offered, except for packets
    /// of refused lengths
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSwitch {
        refused: Mutex<Vec<usize>>,
        received: Mutex<Vec<(Vec<u8>, Direction)>>,
        events: Mutex<Vec<SwitchEvent>>,
    }

    impl RecordingSwitch {
        pub(crate) fn consuming() -> Self {
            Self::default()
        }

        /// Packets of `len` bytes are left to the host
        pub(crate) fn refuse_length(&self, len: usize) {
            self.refused.lock().unwrap().push(len);
        }

        pub(crate) fn received_lengths(&self) -> Vec<usize> {
            self.received
                .lock()
                .unwrap()
                .iter()
                .map(|(packet, _)| packet.len())
                .collect()
        }

        pub(crate) fn received(&self) -> Vec<(Vec<u8>, Direction)> {
            self.received.lock().unwrap().clone()
        }

        pub(crate) fn events(&self) -> Vec<SwitchEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SwitchPort for RecordingSwitch {
        fn receive(&self, packet: &SgBuf<'_>, direction: Direction) -> bool {
            self.received
                .lock()
                .unwrap()
                .push((packet.to_vec(), direction));
            !self.refused.lock().unwrap().contains(&packet.total_len())
        }

        fn report_mac_address(&self, mac: MacAddr) {
            self.events.lock().unwrap().push(SwitchEvent::MacAddress(mac));
        }

        fn report_promiscuous_mode(&self, promiscuous: bool) {
            self.events
                .lock()
                .unwrap()
                .push(SwitchEvent::Promiscuous(promiscuous));
        }

        fn notify_host_address(&self, change: AddressChange, address: IpAddr) {
            self.events
                .lock()
                .unwrap()
                .push(SwitchEvent::HostAddress(change, address));
        }

        fn host_gone(&self) {
            self.events.lock().unwrap().push(SwitchEvent::HostGone);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum BackendCall {
        Attach,
        Detach,
        SetActive(bool),
        Xmit(Destination),
    }

    /// A host backend with one always-present interface
    #[derive(Debug)]
    pub(crate) struct MockBackend {
        mac: MacAddr,
        fail_attach: AtomicBool,
        attach_delay: Mutex<Duration>,
        calls: Mutex<Vec<BackendCall>>,
    }

    impl MockBackend {
        pub(crate) fn new(mac: MacAddr) -> Self {
            Self {
                mac,
                fail_attach: AtomicBool::new(false),
                attach_delay: Mutex::new(Duration::ZERO),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn fail_attach(&self, fail: bool) {
            self.fail_attach.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn set_attach_delay(&self, delay: Duration) {
            *self.attach_delay.lock().unwrap() = delay;
        }

        pub(crate) fn calls(&self) -> Vec<BackendCall> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn xmits(&self) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| matches!(call, BackendCall::Xmit(_)))
                .count()
        }

        fn record(&self, call: BackendCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl HostBackend for MockBackend {
        fn attach(&self, instance: &Arc<FilterInstance>) -> Result<HostBinding> {
            let delay = *self.attach_delay.lock().unwrap();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            if self.fail_attach.load(Ordering::SeqCst) {
                return Err(Error::NotFound(instance.name().to_owned()));
            }

            self.record(BackendCall::Attach);
            Ok(HostBinding {
                mac: self.mac,
                medium: PhysicalMedium::IEEE802_3,
            })
        }

        fn detach(&self, _instance: &FilterInstance) {
            self.record(BackendCall::Detach);
        }

        fn set_active(&self, _instance: &FilterInstance, active: bool) {
            self.record(BackendCall::SetActive(active));
        }

        fn xmit(&self, _instance: &FilterInstance, _packet: &SgBuf<'_>, dst: Destination) -> Result<()> {
            self.record(BackendCall::Xmit(dst));
            Ok(())
        }
    }

    /// The OS around a filter module: an adapter below with a packet filter,
    /// and protocols above that take everything indicated to them
    #[derive(Debug)]
    pub(crate) struct RecordingOps {
        adapter_filter: Mutex<PacketFilter>,
        filter_sets: Mutex<Vec<PacketFilter>>,
        hold_host_requests: AtomicBool,
        held_requests: Mutex<Vec<Arc<OidRequest>>>,
        completed_requests: Mutex<Vec<(Arc<OidRequest>, NdisStatus)>>,
        sent: Mutex<NblQueue>,
        completed_sends: Mutex<Vec<NdisStatus>>,
        indicated: Mutex<NblQueue>,
        returned: Mutex<NblCountedQueue>,
        statuses: Mutex<Vec<StatusIndication>>,
    }

    impl RecordingOps {
        pub(crate) fn new() -> Self {
            Self {
                adapter_filter: Mutex::new(PacketFilter::empty()),
                filter_sets: Mutex::new(Vec::new()),
                hold_host_requests: AtomicBool::new(false),
                held_requests: Mutex::new(Vec::new()),
                completed_requests: Mutex::new(Vec::new()),
                sent: Mutex::new(NblQueue::new()),
                completed_sends: Mutex::new(Vec::new()),
                indicated: Mutex::new(NblQueue::new()),
                returned: Mutex::new(NblCountedQueue::new()),
                statuses: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn set_adapter_filter(&self, filter: PacketFilter) {
            *self.adapter_filter.lock().unwrap() = filter;
        }

        pub(crate) fn adapter_filter(&self) -> PacketFilter {
            *self.adapter_filter.lock().unwrap()
        }

        /// Packet filters set on the adapter, oldest first
        pub(crate) fn filter_sets(&self) -> Vec<PacketFilter> {
            self.filter_sets.lock().unwrap().clone()
        }

        /// Keeps requests coming from the protocols pending until
        /// [`Self::complete_held`]
        pub(crate) fn hold_host_requests(&self, hold: bool) {
            self.hold_host_requests.store(hold, Ordering::SeqCst);
        }

        pub(crate) fn complete_held(&self, module: &FilterModule) {
            let held = std::mem::take(&mut *self.held_requests.lock().unwrap());
            for request in held {
                let status = self.answer(&request);
                module.oid_request_complete(request, status);
            }
        }

        /// Requests completed up to the protocols
        pub(crate) fn completed_requests(&self) -> Vec<(Arc<OidRequest>, NdisStatus)> {
            self.completed_requests.lock().unwrap().clone()
        }

        pub(crate) fn take_sent(&self) -> NblChain {
            std::mem::take(&mut *self.sent.lock().unwrap()).into()
        }

        /// Statuses of the lists completed up to the protocols
        pub(crate) fn completed_sends(&self) -> Vec<NdisStatus> {
            self.completed_sends.lock().unwrap().clone()
        }

        pub(crate) fn take_indicated(&self) -> NblChain {
            std::mem::take(&mut *self.indicated.lock().unwrap()).into()
        }

        pub(crate) fn indicated_count(&self) -> usize {
            self.indicated.lock().unwrap().iter().count()
        }

        /// Number of lists returned to the adapter
        pub(crate) fn returned_count(&self) -> usize {
            self.returned.lock().unwrap().len()
        }

        pub(crate) fn statuses(&self) -> Vec<StatusIndication> {
            self.statuses.lock().unwrap().clone()
        }

        fn answer(&self, request: &OidRequest) -> NdisStatus {
            match (request.kind(), request.oid()) {
                (OidKind::Set, Oid::GEN_CURRENT_PACKET_FILTER) => {
                    let Some(filter) = request.packet_filter() else {
                        return NdisStatus::INVALID_LENGTH;
                    };
                    self.set_adapter_filter(filter);
                    self.filter_sets.lock().unwrap().push(filter);
                    NdisStatus::SUCCESS
                }
                (OidKind::Query, Oid::GEN_CURRENT_PACKET_FILTER) => {
                    request.set_packet_filter(self.adapter_filter());
                    NdisStatus::SUCCESS
                }
                _ => NdisStatus::SUCCESS,
            }
        }
    }

    impl NdisFilterOps for RecordingOps {
        fn send_net_buffer_lists(&self, lists: NblChain, _flags: SendFlags) {
            self.sent.lock().unwrap().append(&mut lists.into());
        }

        fn send_net_buffer_lists_complete(&self, lists: NblChain, _flags: SendCompleteFlags) {
            self.completed_sends
                .lock()
                .unwrap()
                .extend(lists.iter().map(|nbl| nbl.status()));
        }

        fn indicate_receive_net_buffer_lists(&self, lists: NblChain, flags: ReceiveFlags) -> NblChain {
            if !flags.can_pend() {
                // Protocols copy what they need and hand everything back
                return lists;
            }
            self.indicated.lock().unwrap().append(&mut lists.into());
            NblChain::empty()
        }

        fn return_net_buffer_lists(&self, lists: NblChain, _flags: ReturnFlags) {
            self.returned.lock().unwrap().append(&mut lists.into());
        }

        fn oid_request(&self, request: Arc<OidRequest>) -> NdisStatus {
            if request.original().is_some() && self.hold_host_requests.load(Ordering::SeqCst) {
                self.held_requests.lock().unwrap().push(request);
                return NdisStatus::PENDING;
            }
            self.answer(&request)
        }

        fn oid_request_complete(&self, request: Arc<OidRequest>, status: NdisStatus) {
            self.completed_requests
                .lock()
                .unwrap()
                .push((request, status));
        }

        fn indicate_status(&self, indication: StatusIndication) {
            self.statuses.lock().unwrap().push(indication);
        }
    }
}
