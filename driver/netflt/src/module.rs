//! Filter module: the OS side binding to one network interface
//!
//! The OS drives a module through the NDIS filter callbacks (attach, pause,
//! restart, send, receive, ...), while the module reaches back into the OS
//! through [`NdisFilterOps`]. Once an instance binds to the module, traffic
//! flowing through it is offered to the switch whenever the switch wants it.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, trace, warn};
use ndis_rs::{
    NblChain, NblFlags, NblQueue, NdisStatus, NetBufferList, Oid, PhysicalMedium,
    ReceiveFlags, ReturnFlags, SendCompleteFlags, SendFlags, SourceHandle,
};

use crate::backend::HostBinding;
use crate::config::FilterConfig;
use crate::convert::sg_to_buffer;
use crate::counter::DrainCounter;
use crate::error::{Error, Result};
use crate::forward::{forward_batch, ForwardContext, ForwardOutcome, ForwardStats, ForwardStatsSnapshot};
use crate::indication::{OffloadCaps, StatusIndication};
use crate::instance::FilterInstance;
use crate::oid::{OidKind, OidRequest, OidTracker};
use crate::pool::NblPool;
use crate::promisc::{FilterAction, PromiscArbitrator};
use crate::sg::SgBuf;
use crate::switch::{AddressChange, Destination, Direction};
use crate::sync::{EventType, KEvent, SpinLock, Timeout};
use crate::MacAddr;

/// Calls from a filter module into the OS, above and below it
pub trait NdisFilterOps: Send + Sync {
    /// Passes lists down towards the adapter (`NdisFSendNetBufferLists`)
    fn send_net_buffer_lists(&self, lists: NblChain, flags: SendFlags);

    /// Completes sends from above (`NdisFSendNetBufferListsComplete`)
    fn send_net_buffer_lists_complete(&self, lists: NblChain, flags: SendCompleteFlags);

    /// Indicates received lists up to the protocols
    /// (`NdisFIndicateReceiveNetBufferLists`).
    ///
    /// Returns the lists handed straight back, which is all of them if
    /// `flags` doesn't allow pending.
    fn indicate_receive_net_buffer_lists(&self, lists: NblChain, flags: ReceiveFlags)
        -> NblChain;

    /// Returns received lists to the adapter (`NdisFReturnNetBufferLists`)
    fn return_net_buffer_lists(&self, lists: NblChain, flags: ReturnFlags);

    /// Passes a request down (`NdisFOidRequest`), `PENDING` meaning it
    /// completes later through [`FilterModule::oid_request_complete`]
    fn oid_request(&self, request: Arc<OidRequest>) -> NdisStatus;

    /// Completes a request from above (`NdisFOidRequestComplete`)
    fn oid_request_complete(&self, request: Arc<OidRequest>, status: NdisStatus);

    /// Indicates a status up to the protocols (`NdisFIndicateStatus`)
    fn indicate_status(&self, indication: StatusIndication);
}

impl core::fmt::Debug for dyn NdisFilterOps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("NdisFilterOps")
    }
}

/// NDIS filter module states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Attaching,
    Paused,
    Restarting,
    Running,
    Pausing,
    Detached,
}

#[derive(Debug)]
struct ModuleState {
    filter_state: FilterState,
    /// What the switch last asked for
    wants_active: bool,
    /// Whether traffic currently goes to the switch. Only ever true while
    /// running and bound.
    active: bool,
    instance: Option<Arc<FilterInstance>>,
    /// Offloads the adapter last announced
    saved_offload: Option<OffloadCaps>,
}

#[derive(Debug)]
pub struct FilterModule {
    name: String,
    handle: SourceHandle,
    mac: MacAddr,
    medium: PhysicalMedium,
    ops: Arc<dyn NdisFilterOps>,
    config: Arc<FilterConfig>,
    state: SpinLock<ModuleState>,
    /// Serializes activation changes, which block on requests to the adapter
    activation: Mutex<()>,
    /// Buffer lists we injected that the OS still owns
    pending_buffers: DrainCounter,
    pool: NblPool,
    promisc: PromiscArbitrator,
    host_oids: OidTracker,
    internal_oids: OidTracker,
    internal_done: KEvent,
    internal_status: SpinLock<NdisStatus>,
    stats: ForwardStats,
}

impl FilterModule {
    /// Attaches a module to the interface `name`, leaving it paused
    pub fn attach(
        name: impl Into<String>,
        handle: SourceHandle,
        mac: MacAddr,
        medium: PhysicalMedium,
        ops: Arc<dyn NdisFilterOps>,
        config: Arc<FilterConfig>,
    ) -> Arc<Self> {
        let module = Arc::new(Self {
            name: name.into(),
            handle,
            mac,
            medium,
            ops,
            pool: NblPool::new(&config.pool_classes),
            config,
            state: SpinLock::new(ModuleState {
                filter_state: FilterState::Attaching,
                wants_active: false,
                active: false,
                instance: None,
                saved_offload: None,
            }),
            activation: Mutex::new(()),
            pending_buffers: DrainCounter::new(),
            promisc: PromiscArbitrator::new(medium),
            host_oids: OidTracker::new(),
            internal_oids: OidTracker::new(),
            internal_done: KEvent::new(EventType::Synchronization, false),
            internal_status: SpinLock::new(NdisStatus::SUCCESS),
            stats: ForwardStats::default(),
        });

        module.state.lock().filter_state = FilterState::Paused;
        info!(
            "attached to {} ({}, medium {:?}, handle {:#x})",
            module.name,
            module.mac,
            module.medium,
            module.handle.raw()
        );
        module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn filter_state(&self) -> FilterState {
        self.state.lock().filter_state
    }

    pub fn is_running(&self) -> bool {
        self.filter_state() == FilterState::Running
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn pending_buffers(&self) -> u32 {
        self.pending_buffers.get()
    }

    pub fn stats(&self) -> ForwardStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn promiscuous_arbitrator(&self) -> &PromiscArbitrator {
        &self.promisc
    }

    /// The instance bound to this module, if any
    pub fn bound_instance(&self) -> Option<Arc<FilterInstance>> {
        self.state.lock().instance.clone()
    }

    // === Lifecycle ===

    /// The OS removed the module. A `permanent` removal means the interface
    /// won't be coming back (e.g. the driver is unloading).
    pub fn detach(&self, permanent: bool) {
        debug!("==> detach: {} (permanent: {permanent})", self.name);

        let instance = {
            let mut state = self.state.lock();
            state.filter_state = FilterState::Detached;
            state.wants_active = false;
            state.active = false;
            state.instance.take()
        };

        let host = self.host_oids.abandon();
        let internal = self.internal_oids.abandon();

        if internal.is_some() {
            warn!("{}: detached with an internal request in flight", self.name);
            *self.internal_status.lock() = NdisStatus::REQUEST_ABORTED;
            self.internal_done.set();
        }

        if let Some(original) = host.as_ref().and_then(|clone| clone.original()) {
            warn!("{}: detached with host request {} in flight", self.name, original.id());
            self.ops
                .oid_request_complete(original.clone(), NdisStatus::REQUEST_ABORTED);
        }

        if let Some(instance) = instance {
            instance.on_host_detached(permanent);
            instance.release(false);
        }

        debug!("<== detach: {}", self.name);
    }

    /// Stops the data path, waiting for our injected buffer lists to come back
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if the module isn't running
    pub fn pause(&self) -> Result<()> {
        debug!("==> pause: {}", self.name);

        {
            let mut state = self.state.lock();
            if state.filter_state != FilterState::Running {
                return Err(Error::InvalidState);
            }
            state.filter_state = FilterState::Pausing;
        }

        self.update_activation();

        while let Err(err) = self
            .pending_buffers
            .wait_drained(Timeout::relative(self.config.idle_wait_timeout))
        {
            warn!(
                "{}: {err}, {} buffer lists still outstanding",
                self.name,
                self.pending_buffers.get()
            );
        }

        self.state.lock().filter_state = FilterState::Paused;
        debug!("<== pause: {}", self.name);
        Ok(())
    }

    /// Starts the data path again
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if the module isn't paused
    pub fn restart(&self) -> Result<()> {
        debug!("==> restart: {}", self.name);

        {
            let mut state = self.state.lock();
            if state.filter_state != FilterState::Paused {
                return Err(Error::InvalidState);
            }
            state.filter_state = FilterState::Restarting;
        }

        // Nothing to reconfigure, so restarting always succeeds
        self.state.lock().filter_state = FilterState::Running;
        self.update_activation();

        debug!("<== restart: {}", self.name);
        Ok(())
    }

    // === Instance binding ===

    /// Binds `instance` to this module, taking a reference to it
    ///
    /// ## Errors
    ///
    /// - [`Error::NotFound`] if the module is already detached
    /// - [`Error::AlreadyAttached`] if another instance is bound
    pub fn bind_instance(&self, instance: &Arc<FilterInstance>) -> Result<HostBinding> {
        let mut state = self.state.lock();

        if state.filter_state == FilterState::Detached {
            return Err(Error::NotFound(self.name.clone()));
        }
        if state.instance.is_some() {
            return Err(Error::AlreadyAttached(self.name.clone()));
        }

        instance.retain(false);
        state.instance = Some(instance.clone());

        Ok(HostBinding {
            mac: self.mac,
            medium: self.medium,
        })
    }

    /// Unbinds `instance`, once its in-flight data path calls drained
    pub fn unbind_instance(&self, instance: &FilterInstance) {
        while let Err(err) =
            instance.wait_for_idle(Timeout::relative(self.config.idle_wait_timeout))
        {
            if err != Error::Timeout {
                break;
            }
            warn!("{}: still waiting for {} to become idle", self.name, instance.name());
        }

        let unbound = {
            let mut state = self.state.lock();
            match &state.instance {
                Some(bound) if core::ptr::eq(Arc::as_ptr(bound), instance) => {
                    state.wants_active = false;
                    state.instance.take()
                }
                _ => None,
            }
        };

        if let Some(unbound) = unbound {
            self.update_activation();
            unbound.release(false);
            debug!("{}: unbound {}", self.name, instance.name());
        }
    }

    /// The switch started or stopped wanting traffic from `instance`
    pub fn set_active(&self, instance: &FilterInstance, active: bool) {
        {
            let mut state = self.state.lock();
            match &state.instance {
                Some(bound) if core::ptr::eq(Arc::as_ptr(bound), instance) => {
                    state.wants_active = active;
                }
                _ => {
                    debug!("{}: ignoring activation of unbound {}", self.name, instance.name());
                    return;
                }
            }
        }

        self.update_activation();
    }

    /// Brings `active` in line with what the switch wants and what the
    /// module state allows
    fn update_activation(&self) {
        let _serialized = self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let activate = {
            let mut state = self.state.lock();
            let wanted = state.wants_active
                && state.filter_state == FilterState::Running
                && state.instance.is_some();

            if wanted == state.active {
                return;
            }
            state.active = wanted;
            wanted
        };

        info!(
            "{}: {}",
            self.name,
            if activate { "activating" } else { "deactivating" }
        );

        let action = if activate {
            self.promisc.on_activate()
        } else {
            self.promisc.on_deactivate()
        };
        self.run_filter_action(action);

        // Offloads are hidden from the host while the switch is active
        let saved_offload = self.state.lock().saved_offload;
        if let Some(caps) = saved_offload {
            let announced = if activate { OffloadCaps::empty() } else { caps };
            self.ops
                .indicate_status(StatusIndication::offload_config(announced));
        }
    }

    fn run_filter_action(&self, action: FilterAction) {
        let filter = match action {
            FilterAction::None => return,
            FilterAction::Set(filter) => filter,
            FilterAction::QueryThenForce => {
                let query = Arc::new(OidRequest::query(Oid::GEN_CURRENT_PACKET_FILTER, 4));
                if let Err(err) = self.internal_request(&query) {
                    warn!("{}: failed to query packet filter: {err}", self.name);
                    return;
                }

                match query
                    .packet_filter()
                    .and_then(|current| self.promisc.record_queried(current))
                {
                    Some(forced) => forced,
                    None => return,
                }
            }
        };

        let set = Arc::new(OidRequest::set(
            Oid::GEN_CURRENT_PACKET_FILTER,
            filter.to_le_bytes(),
        ));
        match self.internal_request(&set) {
            Ok(()) => debug!("{}: packet filter set to {filter:?}", self.name),
            Err(err) => warn!("{}: failed to set packet filter {filter:?}: {err}", self.name),
        }
    }

    /// Issues a request of our own and waits for it to complete
    fn internal_request(&self, request: &Arc<OidRequest>) -> Result<()> {
        self.internal_oids.begin(request.clone())?;
        self.internal_done.clear();

        let status = match self.ops.oid_request(request.clone()) {
            status if status.is_pending() => {
                let waited = self
                    .internal_done
                    .wait(Timeout::relative(self.config.idle_wait_timeout));

                if let Err(err) = waited {
                    self.internal_oids.abandon();
                    return Err(err);
                }
                *self.internal_status.lock()
            }
            status => {
                drop(self.internal_oids.complete(request));
                status
            }
        };

        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Host(status))
        }
    }

    // === OID requests ===

    /// A request from the protocols above. Always completes through
    /// [`NdisFilterOps::oid_request_complete`], so the answer is `PENDING`
    /// unless the request couldn't even be passed down.
    pub fn oid_request(&self, request: Arc<OidRequest>) -> NdisStatus {
        trace!("{}: oid request {:?} {:?}", self.name, request.kind(), request.oid());

        let snapshot = self.promisc.snapshot();
        let clone = Arc::new(OidRequest::clone_for_lower(&request, snapshot));

        if let Err(err) = self.host_oids.begin(clone.clone()) {
            warn!("{}: {err}, rejecting {:?}", self.name, request.oid());
            return err.status();
        }

        if clone.is_packet_filter() && clone.kind() == OidKind::Set {
            if let Some(requested) = clone.packet_filter() {
                clone.set_packet_filter(self.promisc.on_set_request(requested, snapshot));
            }
        }

        let status = self.ops.oid_request(clone.clone());
        if !status.is_pending() {
            self.oid_request_complete(clone, status);
        }

        NdisStatus::PENDING
    }

    /// A request passed down finished
    pub fn oid_request_complete(&self, request: Arc<OidRequest>, status: NdisStatus) {
        if let Some(internal) = self.internal_oids.complete(&request) {
            *self.internal_status.lock() = status;
            drop(internal);
            self.internal_done.set();
            return;
        }

        let Some(completing) = self.host_oids.complete(&request) else {
            warn!("{}: completion for unknown request {}", self.name, request.id());
            return;
        };
        let Some(original) = completing.original().cloned() else {
            warn!("{}: completed request {} isn't a clone", self.name, request.id());
            return;
        };

        let mut promiscuous_report = None;
        match completing.kind() {
            OidKind::Query => {
                if status.is_success() {
                    self.rewrite_query_answer(&completing);
                }
                original.set_data(&completing.data());
            }
            OidKind::Set => {
                if completing.is_packet_filter() {
                    promiscuous_report = self.promisc.on_set_complete(status.is_success());
                }
            }
        }
        drop(completing);

        self.ops.oid_request_complete(original, status);

        if let (Some(promiscuous), Some(instance)) = (promiscuous_report, self.bound_instance()) {
            instance.report_promiscuous(promiscuous);
        }
    }

    fn rewrite_query_answer(&self, answer: &OidRequest) {
        match answer.oid() {
            Oid::GEN_CURRENT_PACKET_FILTER => {
                if let Some(filter) = answer.packet_filter() {
                    answer.set_packet_filter(
                        self.promisc.on_query_complete(filter, answer.snapshot()),
                    );
                }
            }
            Oid::GEN_PHYSICAL_MEDIUM => {
                let data = answer.data();
                if let Some(raw) = data.get(..4).and_then(|raw| <[u8; 4]>::try_from(raw).ok()) {
                    self.promisc
                        .set_medium(PhysicalMedium(u32::from_le_bytes(raw)));
                }
            }
            _ => {}
        }
    }

    // === Status indications ===

    /// A status indication from the adapter
    pub fn status_indication(&self, indication: StatusIndication) {
        let forwarded = match indication.offloads() {
            Some(caps) => {
                let mut state = self.state.lock();
                state.saved_offload = Some(caps);

                if state.active {
                    StatusIndication::offload_config(OffloadCaps::empty())
                } else {
                    indication
                }
            }
            None => indication,
        };

        self.ops.indicate_status(forwarded);
    }

    /// An address was added to or removed from the interface
    pub fn notify_host_address_change(&self, change: AddressChange, address: IpAddr) {
        if let Some(instance) = self.bound_instance() {
            instance.notify_host_address(change, address);
        }
    }

    // === Data path ===

    fn forward(&self, lists: NblChain, direction: Direction) -> ForwardOutcome {
        let instance = {
            let state = self.state.lock();
            if state.active {
                state.instance.clone()
            } else {
                None
            }
        };

        let ctx = ForwardContext {
            owner: self.handle,
            pass_vm_traffic_to_host: self.config.pass_vm_traffic_to_host,
            host_promiscuous: self.promisc.host_promiscuous(),
            stats: &self.stats,
        };

        forward_batch(instance.as_ref(), lists, direction, &ctx)
    }

    /// Lists sent by the protocols above
    pub fn send_net_buffer_lists(&self, lists: NblChain, flags: SendFlags) {
        if !self.is_running() {
            let lists = with_status(lists.into(), NdisStatus::PAUSED);
            self.ops.send_net_buffer_lists_complete(lists, flags.into());
            return;
        }

        let outcome = self.forward(lists, Direction::FromHost);

        if !outcome.pass.is_empty() {
            self.ops.send_net_buffer_lists(outcome.pass.into(), flags);
        }
        if !outcome.drop.is_empty() {
            let dropped = with_status(outcome.drop, NdisStatus::SUCCESS);
            self.ops.send_net_buffer_lists_complete(dropped, flags.into());
        }
    }

    /// Sends finished below
    pub fn send_net_buffer_lists_complete(&self, lists: NblChain, flags: SendCompleteFlags) {
        let foreign = self.reclaim_own(lists);
        if !foreign.is_empty() {
            self.ops.send_net_buffer_lists_complete(foreign, flags);
        }
    }

    /// Lists received by the adapter.
    ///
    /// Returns the lists handed straight back to the adapter, which only
    /// happens if `flags` doesn't allow pending.
    pub fn receive_net_buffer_lists(&self, lists: NblChain, flags: ReceiveFlags) -> NblChain {
        if !self.is_running() {
            if flags.can_pend() {
                self.ops.return_net_buffer_lists(lists, flags.into());
                return NblChain::empty();
            }
            return lists;
        }

        let ForwardOutcome {
            pass,
            drop: mut handed_back,
        } = self.forward(lists, Direction::FromWire);

        if !pass.is_empty() {
            let mut not_taken = NblQueue::from(
                self.ops
                    .indicate_receive_net_buffer_lists(pass.into(), flags),
            );
            handed_back.append(&mut not_taken);
        }

        if flags.can_pend() {
            if !handed_back.is_empty() {
                self.ops
                    .return_net_buffer_lists(handed_back.into(), flags.into());
            }
            NblChain::empty()
        } else {
            handed_back.into()
        }
    }

    /// Received lists handed back by the protocols above
    pub fn return_net_buffer_lists(&self, lists: NblChain, flags: ReturnFlags) {
        let foreign = self.reclaim_own(lists);
        if !foreign.is_empty() {
            self.ops.return_net_buffer_lists(foreign, flags);
        }
    }

    /// Sends a packet from the switch to the wire and/or up to the host
    ///
    /// Once the wire copy is out, failing to also hand the packet to the host
    /// is only logged.
    ///
    /// ## Errors
    ///
    /// - [`Error::Paused`] if the module isn't running
    /// - [`Error::Resources`] if no buffer list was available
    pub fn xmit(&self, packet: &SgBuf<'_>, dst: Destination) -> Result<()> {
        let mut on_wire = false;

        if dst.contains(Destination::WIRE) {
            self.inject(packet, self.config.pad_to_even_length, |lists| {
                self.ops.send_net_buffer_lists(lists, SendFlags::empty());
            })?;
            on_wire = true;
        }

        if dst.contains(Destination::HOST) {
            let to_host = self.inject(packet, false, |lists| {
                let not_taken = self
                    .ops
                    .indicate_receive_net_buffer_lists(lists, ReceiveFlags::empty());
                let foreign = self.reclaim_own(not_taken);
                debug_assert!(foreign.is_empty(), "got back lists we didn't indicate");
            });

            match to_host {
                Err(err) if on_wire => warn!("{}: sent to the wire only: {err}", self.name),
                result => result?,
            }
        }

        Ok(())
    }

    fn inject(&self, packet: &SgBuf<'_>, align_to_word: bool, deliver: impl FnOnce(NblChain)) -> Result<()> {
        // Counted before looking at the state, so that a concurrent pause
        // either waits for this list or makes us fail
        self.pending_buffers.inc();
        let pending = scopeguard::guard((), |()| self.pending_buffers.dec());

        if !self.is_running() {
            return Err(Error::Paused);
        }

        let nbl = sg_to_buffer(packet, &self.pool, align_to_word, self.handle)?;

        // Now owned by the OS until it completes or returns the list
        scopeguard::ScopeGuard::into_inner(pending);
        deliver([nbl].into_iter().collect());
        Ok(())
    }

    /// Whether `nbl` is one we injected
    fn owns(&self, nbl: &NetBufferList) -> bool {
        nbl.source_handle() == Some(self.handle)
            && !nbl.flags().contains(NblFlags::IS_LOOPBACK_PACKET)
    }

    /// Frees our own lists, returning the rest
    fn reclaim_own(&self, lists: NblChain) -> NblChain {
        let mut foreign = NblQueue::new();

        for nbl in lists {
            if self.owns(&nbl) {
                self.pool.free(nbl);
                self.pending_buffers.dec();
            } else {
                foreign.push_back(nbl);
            }
        }

        foreign.into()
    }
}

fn with_status(mut lists: NblQueue, status: NdisStatus) -> NblChain {
    for nbl in lists.iter_mut() {
        nbl.set_status(status);
    }
    lists.into()
}
