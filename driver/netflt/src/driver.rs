//! Driver-wide state
//!
//! Ties filter modules (created by the OS, one per interface) to filter
//! instances (created by the switch, one per port) by interface name.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use ndis_rs::{PhysicalMedium, SourceHandle};

use crate::backend::{HostBackend, HostBinding};
use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::instance::FilterInstance;
use crate::module::{FilterModule, NdisFilterOps};
use crate::registry::ModuleRegistry;
use crate::sg::SgBuf;
use crate::switch::{Destination, SwitchPort};
use crate::MacAddr;

#[derive(Debug)]
pub struct DriverContext {
    registry: Arc<ModuleRegistry>,
    config: Arc<FilterConfig>,
    next_handle: AtomicUsize,
    backend: Arc<NdisBackend>,
}

impl DriverContext {
    pub fn new(config: FilterConfig) -> Self {
        let registry = Arc::new(ModuleRegistry::new());

        Self {
            backend: Arc::new(NdisBackend {
                registry: registry.clone(),
            }),
            registry,
            config: Arc::new(config),
            next_handle: AtomicUsize::new(1),
        }
    }

    /// Sets up the driver from its configuration parameters
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidConfig`] if a parameter has an unusable value
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let config = FilterConfig::from_params(params)?;
        debug!("driver config: {config:?}");
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &Arc<FilterConfig> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The OS attached us to the interface `name`. The new module starts out
    /// paused.
    ///
    /// ## Errors
    ///
    /// - [`Error::AlreadyAttached`] if a module for `name` already exists
    /// - [`Error::Resources`] if no source handle is left
    pub fn filter_attach(
        &self,
        name: &str,
        mac: MacAddr,
        medium: PhysicalMedium,
        ops: Arc<dyn NdisFilterOps>,
    ) -> Result<Arc<FilterModule>> {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = SourceHandle::new(raw).ok_or(Error::Resources)?;

        let module = FilterModule::attach(name, handle, mac, medium, ops, self.config.clone());
        self.registry.insert(module.clone())?;
        Ok(module)
    }

    /// The OS detached us from the interface `name`
    pub fn filter_detach(&self, name: &str) {
        match self.registry.remove(name) {
            Some(module) => module.detach(false),
            None => warn!("detach of unknown interface {name:?}"),
        }
    }

    /// Connects the switch port `switch` to the interface `name`
    ///
    /// ## Errors
    ///
    /// - [`Error::NotFound`] if no module is attached to `name`
    /// - [`Error::AlreadyAttached`] if another instance is bound to it
    pub fn connect(&self, name: &str, switch: Arc<dyn SwitchPort>) -> Result<Arc<FilterInstance>> {
        FilterInstance::connect(name, switch, self.backend.clone(), &self.config)
    }

    /// Detaches every module for good
    pub fn unload(&self) {
        let modules = self.registry.drain();
        info!("unloading, {} interfaces attached", modules.len());

        for module in modules {
            module.detach(true);
        }
    }
}

/// Realizes an instance's host interface through the attached filter modules
#[derive(Debug)]
pub struct NdisBackend {
    registry: Arc<ModuleRegistry>,
}

impl NdisBackend {
    fn module_for(&self, instance: &FilterInstance) -> Result<Arc<FilterModule>> {
        self.registry
            .lookup(instance.name())
            .ok_or_else(|| Error::NotFound(instance.name().to_owned()))
    }
}

impl HostBackend for NdisBackend {
    fn attach(&self, instance: &Arc<FilterInstance>) -> Result<HostBinding> {
        self.module_for(instance)?.bind_instance(instance)
    }

    fn detach(&self, instance: &FilterInstance) {
        match self.module_for(instance) {
            Ok(module) => module.unbind_instance(instance),
            Err(err) => debug!("nothing to detach: {err}"),
        }
    }

    fn set_active(&self, instance: &FilterInstance, active: bool) {
        match self.module_for(instance) {
            Ok(module) => module.set_active(instance, active),
            Err(err) => debug!("can't change activation: {err}"),
        }
    }

    fn xmit(&self, instance: &FilterInstance, packet: &SgBuf<'_>, dst: Destination) -> Result<()> {
        self.module_for(instance)?.xmit(packet, dst)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ndis_rs::{
        NetBuffer, NetBufferList, PacketFilter, PhysicalMedium, ReceiveFlags,
        SendCompleteFlags,
    };

    use super::DriverContext;
    use crate::config::FilterConfig;
    use crate::error::Error;
    use crate::instance::{LifecycleState, TrunkState};
    use crate::module::FilterState;
    use crate::sg::SgBuf;
    use crate::switch::Destination;
    use crate::testing::{RecordingOps, RecordingSwitch, SwitchEvent};
    use crate::MacAddr;

    const HOST_MAC: MacAddr = MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn running_driver() -> (DriverContext, Arc<RecordingOps>) {
        let driver = DriverContext::new(FilterConfig::default());
        let ops = Arc::new(RecordingOps::new());
        ops.set_adapter_filter(PacketFilter::DIRECTED | PacketFilter::BROADCAST);

        let module = driver
            .filter_attach("Ethernet", HOST_MAC, PhysicalMedium::IEEE802_3, ops.clone())
            .unwrap();
        module.restart().unwrap();
        (driver, ops)
    }

    #[test]
    fn connect_needs_an_interface() {
        let driver = DriverContext::new(FilterConfig::default());
        let switch = Arc::new(RecordingSwitch::consuming());

        assert_eq!(
            driver.connect("Ethernet", switch).unwrap_err(),
            Error::NotFound("Ethernet".into())
        );
    }

    #[test]
    fn one_instance_per_interface() {
        let (driver, _ops) = running_driver();

        let _first = driver
            .connect("Ethernet", Arc::new(RecordingSwitch::consuming()))
            .unwrap();
        assert_eq!(
            driver
                .connect("Ethernet", Arc::new(RecordingSwitch::consuming()))
                .unwrap_err(),
            Error::AlreadyAttached("Ethernet".into())
        );
    }

    #[test]
    fn config_from_params() {
        let driver = DriverContext::from_params([("PassVmTrafficToHost", "yes")]).unwrap();
        assert!(driver.config().pass_vm_traffic_to_host);

        assert!(matches!(
            DriverContext::from_params([("PassVmTrafficToHost", "maybe")]),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn end_to_end() {
        let (driver, ops) = running_driver();
        let module = driver.registry().lookup("Ethernet").unwrap();
        let switch = Arc::new(RecordingSwitch::consuming());

        let instance = driver.connect("Ethernet", switch.clone()).unwrap();
        assert_eq!(switch.events(), [SwitchEvent::MacAddress(HOST_MAC)]);

        instance.set_trunk_state(TrunkState::Active).unwrap();
        assert!(module.is_active());
        assert_eq!(
            ops.adapter_filter(),
            PacketFilter::DIRECTED | PacketFilter::BROADCAST | PacketFilter::PROMISCUOUS
        );

        // Traffic from the wire goes to the switch, which consumes it
        let received = Box::new(NetBufferList::from_net_buffer(NetBuffer::from_bytes(
            &[0xab; 60],
        )));
        let handed_back = module
            .receive_net_buffer_lists([received].into_iter().collect(), ReceiveFlags::empty());
        assert!(handed_back.is_empty());
        assert_eq!(switch.received_lengths(), [60]);
        assert_eq!(ops.returned_count(), 1);
        assert_eq!(ops.indicated_count(), 0);

        // The switch sends out through the adapter
        let packet = SgBuf::from_segments(&[&[0xcd; 41]]).unwrap();
        instance.xmit(&packet, Destination::WIRE).unwrap();
        assert_eq!(module.pending_buffers(), 1);

        let sent = ops.take_sent();
        assert_eq!(sent.len(), 1);
        module.send_net_buffer_lists_complete(sent, SendCompleteFlags::empty());
        assert_eq!(module.pending_buffers(), 0);
        assert!(ops.completed_sends().is_empty());

        // Teardown restores the host's packet filter
        instance.set_trunk_state(TrunkState::Disconnecting).unwrap();
        instance.disconnect_and_release().unwrap();

        assert!(module.bound_instance().is_none());
        assert!(!module.is_active());
        assert_eq!(
            ops.adapter_filter(),
            PacketFilter::DIRECTED | PacketFilter::BROADCAST
        );
        assert_eq!(instance.lifecycle_state(), LifecycleState::Destroyed);
    }

    #[test]
    fn unload_tells_the_switch() {
        let (driver, _ops) = running_driver();
        let module = driver.registry().lookup("Ethernet").unwrap();
        let switch = Arc::new(RecordingSwitch::consuming());
        let instance = driver.connect("Ethernet", switch.clone()).unwrap();

        module.pause().unwrap();
        driver.unload();

        assert!(driver.registry().is_empty());
        assert_eq!(module.filter_state(), FilterState::Detached);
        assert_eq!(switch.events().last(), Some(&SwitchEvent::HostGone));
        assert_eq!(instance.lifecycle_state(), LifecycleState::Disconnecting);

        // The switch still holds its reference until it lets go
        assert_eq!(instance.refs(), 1);
        instance.disconnect_and_release().unwrap();
        assert_eq!(instance.lifecycle_state(), LifecycleState::Destroyed);
    }
}
