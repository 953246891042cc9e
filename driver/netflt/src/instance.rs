//! Filter instance lifecycle
//!
//! A [`FilterInstance`] is one binding between a host network interface and
//! a port of the switch. Its lifecycle runs along two axes:
//!
//! - [`LifecycleState`]: how far the connection to the switch has gotten
//! - [`TrunkState`]: whether the switch wants traffic from this instance
//!
//! Both are only changed under the instance lock, which is never held across
//! calls into the switch or the host backend.
//!
//! References are counted explicitly (see [`RefCounts`]): the switch holds
//! one from [`FilterInstance::connect`] until
//! [`FilterInstance::disconnect_and_release`], the host binding holds one
//! while bound, and every data path call holds a busy reference through an
//! [`InstanceRef`].

use core::ops::Deref;
use core::sync::atomic::{AtomicU32, Ordering};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::backend::HostBackend;
use crate::config::FilterConfig;
use crate::counter::RefCounts;
use crate::error::{Error, Result};
use crate::sg::SgBuf;
use crate::switch::{AddressChange, Destination, Direction, SwitchPort};
use crate::sync::{SpinLock, Timeout};
use crate::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Attaching to the host interface failed
    Invalid,
    Initializing,
    Connected,
    Disconnecting,
    /// Every reference is gone
    Destroyed,
}

/// What the switch told the instance about delivering traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TrunkState {
    Inactive = 0,
    Active = 1,
    Disconnecting = 2,
}

impl TrunkState {
    /// Converts a raw state value coming from the switch
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if `raw` isn't a known state
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Active),
            2 => Ok(Self::Disconnecting),
            _ => Err(Error::InvalidState),
        }
    }
}

#[derive(Debug)]
struct InstanceState {
    lifecycle: LifecycleState,
    trunk: TrunkState,
    /// The host interface vanished from under us
    disconnected_from_host: bool,
    rediscovery_pending: bool,
    last_rediscovery: Option<Instant>,
    /// The switch already gave up its reference
    switch_released: bool,
    host_mac: Option<MacAddr>,
    vm_mac: Option<MacAddr>,
}

pub struct FilterInstance {
    name: String,
    counts: RefCounts,
    state: SpinLock<InstanceState>,
    switch: Arc<dyn SwitchPort>,
    backend: Arc<dyn HostBackend>,
    rediscovery_cooldown: Duration,
    rediscovery_attempts: AtomicU32,
}

impl core::fmt::Debug for FilterInstance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterInstance")
            .field("name", &self.name)
            .field("counts", &self.counts)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl FilterInstance {
    /// Creates an instance for the host interface `name` and connects it to
    /// `switch`.
    ///
    /// The instance is bound to the host interface before the switch hears
    /// about it, and the returned handle carries the switch's reference.
    ///
    /// ## Errors
    ///
    /// Whatever [`HostBackend::attach`] fails with. Nothing is left behind in
    /// that case.
    pub fn connect(
        name: impl Into<String>,
        switch: Arc<dyn SwitchPort>,
        backend: Arc<dyn HostBackend>,
        config: &FilterConfig,
    ) -> Result<Arc<Self>> {
        let instance = Arc::new(Self {
            name: name.into(),
            counts: RefCounts::new(1),
            state: SpinLock::new(InstanceState {
                lifecycle: LifecycleState::Initializing,
                trunk: TrunkState::Inactive,
                disconnected_from_host: false,
                rediscovery_pending: false,
                last_rediscovery: None,
                switch_released: false,
                host_mac: None,
                vm_mac: None,
            }),
            switch,
            backend,
            rediscovery_cooldown: config.rediscovery_cooldown,
            rediscovery_attempts: AtomicU32::new(0),
        });
        debug!("==> connect: {}", instance.name);

        let binding = match instance.backend.attach(&instance) {
            Ok(binding) => binding,
            Err(err) => {
                instance.state.lock().lifecycle = LifecycleState::Invalid;
                warn!("failed to attach to {}: {err}", instance.name);
                return Err(err);
            }
        };

        {
            let mut state = instance.state.lock();
            state.lifecycle = LifecycleState::Connected;
            state.host_mac = Some(binding.mac);
        }

        instance.switch.report_mac_address(binding.mac);

        info!(
            "connected {} ({}, medium {:?})",
            instance.name, binding.mac, binding.medium
        );
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    pub fn trunk_state(&self) -> TrunkState {
        self.state.lock().trunk
    }

    pub fn is_disconnected_from_host(&self) -> bool {
        self.state.lock().disconnected_from_host
    }

    pub fn is_rediscovery_pending(&self) -> bool {
        self.state.lock().rediscovery_pending
    }

    /// MAC address of the host interface, once attached
    pub fn host_mac(&self) -> Option<MacAddr> {
        self.state.lock().host_mac
    }

    /// MAC address the switch reported for its side
    pub fn vm_mac(&self) -> Option<MacAddr> {
        self.state.lock().vm_mac
    }

    pub fn refs(&self) -> u32 {
        self.counts.refs()
    }

    pub fn busy(&self) -> u32 {
        self.counts.busy()
    }

    /// Number of reattach attempts made so far
    pub fn rediscovery_attempts(&self) -> u32 {
        self.rediscovery_attempts.load(Ordering::Acquire)
    }

    /// Takes a reference, plus a busy reference if `busy` is set.
    ///
    /// The caller must already hold a reference.
    pub fn retain(&self, busy: bool) {
        self.counts.retain(busy);
    }

    /// Drops a reference taken with [`Self::retain`] (with the same `busy`).
    pub fn release(&self, busy: bool) {
        if !self.counts.release(busy) {
            return;
        }

        let mut state = self.state.lock();
        if state.lifecycle == LifecycleState::Disconnecting {
            state.lifecycle = LifecycleState::Destroyed;
            drop(state);
            info!("destroyed {}", self.name);
        } else {
            error!(
                "last reference to {} dropped while {:?}",
                self.name, state.lifecycle
            );
        }
    }

    /// Takes a busy reference if the switch currently wants traffic.
    ///
    /// Every data path entry into the switch goes through this.
    pub fn try_retain_if_active(self: &Arc<Self>) -> Option<InstanceRef> {
        self.try_retain_if(|trunk| trunk == TrunkState::Active)
    }

    /// Takes a busy reference unless teardown has started.
    ///
    /// Used for control plane notifications, which are fine to deliver while
    /// bypassed.
    pub fn try_retain_if_not_disconnected(self: &Arc<Self>) -> Option<InstanceRef> {
        self.try_retain_if(|trunk| trunk != TrunkState::Disconnecting)
    }

    fn try_retain_if(self: &Arc<Self>, allowed: impl FnOnce(TrunkState) -> bool) -> Option<InstanceRef> {
        let state = self.state.lock();
        if !allowed(state.trunk) {
            return None;
        }

        // Under the lock, so that a concurrent move to `Disconnecting` either
        // sees this busy reference or makes us fail
        self.retain(true);
        drop(state);

        Some(InstanceRef {
            instance: self.clone(),
        })
    }

    /// Blocks until no data path call holds the instance busy
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if the trunk isn't `Disconnecting` yet
    /// - [`Error::Timeout`] if busy references were still held once `timeout` passed
    pub fn wait_for_idle(&self, timeout: Timeout) -> Result<()> {
        if self.state.lock().trunk != TrunkState::Disconnecting {
            return Err(Error::InvalidState);
        }

        self.retain(false);
        let _reference = scopeguard::guard((), |()| self.release(false));

        self.counts.wait_idle(timeout)
    }

    /// Moves the trunk to `new`, returning the previous state.
    ///
    /// Going in or out of `Active` starts or stops traffic on the host side.
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] when leaving `Disconnecting`, or if the
    ///   instance isn't connected
    pub fn set_trunk_state(self: &Arc<Self>, new: TrunkState) -> Result<TrunkState> {
        let (old, host_connected) = {
            let mut state = self.state.lock();
            let old = state.trunk;

            match (old, new) {
                (TrunkState::Disconnecting, TrunkState::Disconnecting) => return Ok(old),
                (TrunkState::Disconnecting, _) => return Err(Error::InvalidState),
                _ => {}
            }

            match state.lifecycle {
                LifecycleState::Connected => {}
                LifecycleState::Disconnecting if new == TrunkState::Disconnecting => {}
                _ => return Err(Error::InvalidState),
            }

            state.trunk = new;
            (old, !state.disconnected_from_host)
        };

        debug!("{}: trunk {old:?} -> {new:?}", self.name);

        let was_active = old == TrunkState::Active;
        let is_active = new == TrunkState::Active;
        if was_active != is_active && host_connected {
            self.backend.set_active(self, is_active);
        }

        Ok(old)
    }

    /// Gives up the switch's reference, detaching from the host first.
    ///
    /// The trunk has to be `Disconnecting` already, so no new data path call
    /// can start.
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if the trunk isn't `Disconnecting`, or the
    ///   switch already released the instance
    pub fn disconnect_and_release(&self) -> Result<()> {
        debug!("==> disconnect_and_release: {}", self.name);

        let host_connected = {
            let mut state = self.state.lock();

            if state.trunk != TrunkState::Disconnecting || state.switch_released {
                return Err(Error::InvalidState);
            }
            if !matches!(
                state.lifecycle,
                LifecycleState::Connected | LifecycleState::Disconnecting
            ) {
                return Err(Error::InvalidState);
            }

            state.lifecycle = LifecycleState::Disconnecting;
            state.switch_released = true;
            !state.disconnected_from_host
        };

        if host_connected {
            self.backend.detach(self);
        }

        self.release(false);

        debug!("<== disconnect_and_release: {}", self.name);
        Ok(())
    }

    /// Tries to reattach to a vanished host interface, returning whether the
    /// host interface is available afterwards.
    ///
    /// Only one attempt runs at a time, and attempts are spaced out by the
    /// rediscovery cooldown. Callers that lose out carry on treating the host
    /// as disconnected.
    pub fn maybe_rediscover(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.lock();

            if !state.disconnected_from_host {
                return true;
            }
            if state.rediscovery_pending || state.lifecycle != LifecycleState::Connected {
                return false;
            }
            if let Some(last) = state.last_rediscovery {
                if last.elapsed() < self.rediscovery_cooldown {
                    return false;
                }
            }

            state.rediscovery_pending = true;
        }

        self.rediscovery_attempts.fetch_add(1, Ordering::AcqRel);
        let result = self.backend.attach(self);

        let trunk = {
            let mut state = self.state.lock();
            state.rediscovery_pending = false;
            state.last_rediscovery = Some(Instant::now());

            if let Ok(binding) = &result {
                state.disconnected_from_host = false;
                state.host_mac = Some(binding.mac);
            }
            state.trunk
        };

        match result {
            Ok(binding) => {
                info!("rediscovered {} ({})", self.name, binding.mac);
                self.switch.report_mac_address(binding.mac);
                self.backend
                    .set_active(self, trunk == TrunkState::Active);
                true
            }
            Err(err) => {
                debug!("rediscovery of {} failed: {err}", self.name);
                false
            }
        }
    }

    /// The host interface went away
    ///
    /// A transient loss is absorbed by rediscovery. A permanent one starts
    /// tearing the instance down and asks the switch to let go of it.
    pub fn on_host_detached(&self, permanent: bool) {
        let host_gone = {
            let mut state = self.state.lock();
            state.disconnected_from_host = true;

            if permanent && state.lifecycle == LifecycleState::Connected {
                state.trunk = TrunkState::Disconnecting;
                state.lifecycle = LifecycleState::Disconnecting;
                true
            } else {
                false
            }
        };

        info!(
            "{} lost its host interface{}",
            self.name,
            if permanent { " for good" } else { "" }
        );

        if host_gone {
            self.switch.host_gone();
        }
    }

    /// Sends a packet from the switch.
    ///
    /// Packets for a host interface that is gone (and couldn't be
    /// rediscovered) are dropped.
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidState`] if teardown already started
    /// - Whatever the host backend fails the send with
    pub fn xmit(self: &Arc<Self>, packet: &SgBuf<'_>, dst: Destination) -> Result<()> {
        let Some(_busy) = self.try_retain_if_not_disconnected() else {
            return Err(Error::InvalidState);
        };

        if !self.maybe_rediscover() {
            trace!("{}: dropping {} byte packet, host is gone", self.name, packet.total_len());
            return Ok(());
        }

        self.backend.xmit(self, packet, dst)
    }

    /// Records the MAC address the switch uses on its side
    pub fn notify_mac_address(&self, mac: MacAddr) {
        self.state.lock().vm_mac = Some(mac);
        debug!("{}: switch side mac is {mac}", self.name);
    }

    /// Offers a packet to the switch, returning whether it was consumed.
    ///
    /// Must be called with a busy reference held.
    pub(crate) fn deliver_to_switch(&self, packet: &SgBuf<'_>, direction: Direction) -> bool {
        debug_assert!(self.counts.busy() > 0);
        self.switch.receive(packet, direction)
    }

    /// Tells the switch whether the host stack asked for promiscuous mode
    pub fn report_promiscuous(self: &Arc<Self>, promiscuous: bool) {
        if let Some(instance) = self.try_retain_if_not_disconnected() {
            instance.switch.report_promiscuous_mode(promiscuous);
        }
    }

    /// Tells the switch about an address change on the host interface
    pub fn notify_host_address(self: &Arc<Self>, change: AddressChange, address: IpAddr) {
        if let Some(instance) = self.try_retain_if_not_disconnected() {
            instance.switch.notify_host_address(change, address);
        }
    }
}

/// A busy reference to an instance, released when dropped
#[derive(Debug)]
pub struct InstanceRef {
    instance: Arc<FilterInstance>,
}

impl InstanceRef {
    pub fn instance(&self) -> &Arc<FilterInstance> {
        &self.instance
    }
}

impl Deref for InstanceRef {
    type Target = FilterInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InstanceRef {
    fn drop(&mut self) {
        self.instance.release(true);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::{FilterInstance, LifecycleState, TrunkState};
    use crate::config::FilterConfig;
    use crate::error::Error;
    use crate::sg::SgBuf;
    use crate::switch::Destination;
    use crate::sync::Timeout;
    use crate::testing::{BackendCall, MockBackend, RecordingSwitch, SwitchEvent};
    use crate::MacAddr;

    const HOST_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);

    fn connect(config: &FilterConfig) -> (Arc<FilterInstance>, Arc<RecordingSwitch>, Arc<MockBackend>) {
        let switch = Arc::new(RecordingSwitch::consuming());
        let backend = Arc::new(MockBackend::new(HOST_MAC));
        let instance =
            FilterInstance::connect("Ethernet", switch.clone(), backend.clone(), config).unwrap();
        (instance, switch, backend)
    }

    #[test]
    fn connect_reports_mac_after_attach() {
        let (instance, switch, backend) = connect(&FilterConfig::default());

        assert_eq!(instance.lifecycle_state(), LifecycleState::Connected);
        assert_eq!(instance.trunk_state(), TrunkState::Inactive);
        assert_eq!(instance.host_mac(), Some(HOST_MAC));
        assert_eq!(instance.refs(), 1);
        assert_eq!(backend.calls(), [BackendCall::Attach]);
        assert_eq!(switch.events(), [SwitchEvent::MacAddress(HOST_MAC)]);
    }

    #[test]
    fn failed_attach_is_reported() {
        let switch = Arc::new(RecordingSwitch::consuming());
        let backend = Arc::new(MockBackend::new(HOST_MAC));
        backend.fail_attach(true);

        let result =
            FilterInstance::connect("Ethernet", switch.clone(), backend, &FilterConfig::default());

        assert_eq!(result.map(|_| ()), Err(Error::NotFound("Ethernet".into())));
        assert!(switch.events().is_empty());
    }

    #[test]
    fn trunk_state_transitions() {
        let (instance, _switch, backend) = connect(&FilterConfig::default());

        assert_eq!(instance.set_trunk_state(TrunkState::Active), Ok(TrunkState::Inactive));
        assert_eq!(instance.set_trunk_state(TrunkState::Active), Ok(TrunkState::Active));
        assert_eq!(instance.set_trunk_state(TrunkState::Inactive), Ok(TrunkState::Active));
        assert_eq!(
            instance.set_trunk_state(TrunkState::Disconnecting),
            Ok(TrunkState::Inactive)
        );
        assert_eq!(
            instance.set_trunk_state(TrunkState::Active),
            Err(Error::InvalidState)
        );

        assert_eq!(
            backend.calls(),
            [
                BackendCall::Attach,
                BackendCall::SetActive(true),
                BackendCall::SetActive(false),
            ]
        );
    }

    #[test]
    fn raw_trunk_state_out_of_range() {
        assert_eq!(TrunkState::from_raw(1), Ok(TrunkState::Active));
        assert_eq!(TrunkState::from_raw(3), Err(Error::InvalidState));
    }

    #[test]
    fn retain_gates() {
        let (instance, _switch, _backend) = connect(&FilterConfig::default());

        assert!(instance.try_retain_if_active().is_none());
        assert!(instance.try_retain_if_not_disconnected().is_some());

        instance.set_trunk_state(TrunkState::Active).unwrap();
        {
            let busy = instance.try_retain_if_active().unwrap();
            assert_eq!((busy.refs(), busy.busy()), (2, 1));
        }
        assert_eq!((instance.refs(), instance.busy()), (1, 0));

        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();
        assert!(instance.try_retain_if_active().is_none());
        assert!(instance.try_retain_if_not_disconnected().is_none());
    }

    #[test]
    fn wait_for_idle_needs_disconnecting() {
        let (instance, _switch, _backend) = connect(&FilterConfig::default());

        assert_eq!(
            instance.wait_for_idle(Timeout::dont_wait()),
            Err(Error::InvalidState)
        );

        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();
        assert_eq!(instance.wait_for_idle(Timeout::dont_wait()), Ok(()));
        assert_eq!(instance.refs(), 1);
    }

    #[test]
    fn drain_under_concurrent_traffic() {
        const THREADS: usize = 8;

        let (instance, _switch, _backend) = connect(&FilterConfig::default());
        instance.set_trunk_state(TrunkState::Active).unwrap();

        let start = Arc::new(Barrier::new(THREADS + 1));
        let workers = (0..THREADS)
            .map(|_| {
                let instance = instance.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    let mut entered = 0;
                    while let Some(busy) = instance.try_retain_if_active() {
                        entered += 1;
                        thread::sleep(Duration::from_micros(50));
                        drop(busy);
                    }
                    entered
                })
            })
            .collect::<Vec<_>>();

        start.wait();
        thread::sleep(Duration::from_millis(20));
        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();

        assert_eq!(instance.wait_for_idle(Timeout::relative_ms(5000)), Ok(()));
        assert_eq!(instance.busy(), 0);
        assert!(instance.try_retain_if_active().is_none());

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(instance.busy(), 0);
    }

    #[test]
    fn disconnect_destroys_after_last_reference() {
        let (instance, _switch, backend) = connect(&FilterConfig::default());

        assert_eq!(instance.disconnect_and_release(), Err(Error::InvalidState));

        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();
        let held = instance.try_retain_if_not_disconnected();
        assert!(held.is_none());

        instance.retain(false);
        instance.disconnect_and_release().unwrap();
        assert_eq!(instance.lifecycle_state(), LifecycleState::Disconnecting);
        assert_eq!(backend.calls().last(), Some(&BackendCall::Detach));

        // A second release by the switch is a contract violation
        assert_eq!(instance.disconnect_and_release(), Err(Error::InvalidState));

        instance.release(false);
        assert_eq!(instance.lifecycle_state(), LifecycleState::Destroyed);
        assert_eq!(instance.refs(), 0);
    }

    #[test]
    fn permanent_host_loss_tells_switch() {
        let (instance, switch, backend) = connect(&FilterConfig::default());
        instance.set_trunk_state(TrunkState::Active).unwrap();

        instance.on_host_detached(true);

        assert_eq!(instance.trunk_state(), TrunkState::Disconnecting);
        assert_eq!(instance.lifecycle_state(), LifecycleState::Disconnecting);
        assert_eq!(switch.events().last(), Some(&SwitchEvent::HostGone));

        // Switch side teardown still works, without touching the host
        assert_eq!(
            instance.set_trunk_state(TrunkState::Disconnecting),
            Ok(TrunkState::Disconnecting)
        );
        instance.wait_for_idle(Timeout::dont_wait()).unwrap();
        instance.disconnect_and_release().unwrap();
        assert_eq!(instance.lifecycle_state(), LifecycleState::Destroyed);
        assert!(!backend.calls().contains(&BackendCall::Detach));
    }

    #[test]
    fn xmit_to_vanished_host_is_dropped() {
        let config = FilterConfig {
            rediscovery_cooldown: Duration::from_secs(3600),
            ..FilterConfig::default()
        };
        let (instance, _switch, backend) = connect(&config);
        let packet = SgBuf::from_segments(&[&[0u8; 60]]).unwrap();

        backend.fail_attach(true);
        instance.on_host_detached(false);

        // First attempt fails, the second is inside the cooldown
        assert_eq!(instance.xmit(&packet, Destination::WIRE), Ok(()));
        assert_eq!(instance.xmit(&packet, Destination::WIRE), Ok(()));
        assert_eq!(instance.rediscovery_attempts(), 1);
        assert_eq!(backend.xmits(), 0);
    }

    #[test]
    fn rediscovery_reactivates() {
        let config = FilterConfig {
            rediscovery_cooldown: Duration::ZERO,
            ..FilterConfig::default()
        };
        let (instance, switch, backend) = connect(&config);
        instance.set_trunk_state(TrunkState::Active).unwrap();
        instance.on_host_detached(false);

        let packet = SgBuf::from_segments(&[&[1u8; 60]]).unwrap();
        assert_eq!(instance.xmit(&packet, Destination::HOST), Ok(()));

        assert!(!instance.is_disconnected_from_host());
        assert_eq!(backend.xmits(), 1);
        assert_eq!(
            backend.calls(),
            [
                BackendCall::Attach,
                BackendCall::SetActive(true),
                BackendCall::Attach,
                BackendCall::SetActive(true),
                BackendCall::Xmit(Destination::HOST),
            ]
        );
        assert_eq!(
            switch.events(),
            [
                SwitchEvent::MacAddress(HOST_MAC),
                SwitchEvent::MacAddress(HOST_MAC)
            ]
        );
    }

    #[test]
    fn rediscovery_single_flight() {
        const THREADS: usize = 10;

        let (instance, _switch, backend) = connect(&FilterConfig::default());
        backend.fail_attach(true);
        backend.set_attach_delay(Duration::from_millis(50));
        instance.on_host_detached(false);

        let start = Arc::new(Barrier::new(THREADS));
        let handles = (0..THREADS)
            .map(|_| {
                let instance = instance.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    instance.maybe_rediscover()
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(!handle.join().unwrap());
        }

        assert_eq!(instance.rediscovery_attempts(), 1);
        assert!(!instance.is_rediscovery_pending());
        assert!(instance.is_disconnected_from_host());
    }

    #[test]
    fn notifications_stop_once_disconnecting() {
        let (instance, switch, _backend) = connect(&FilterConfig::default());

        instance.report_promiscuous(true);
        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();
        instance.report_promiscuous(false);

        assert_eq!(
            switch.events(),
            [
                SwitchEvent::MacAddress(HOST_MAC),
                SwitchEvent::Promiscuous(true)
            ]
        );
    }
}
