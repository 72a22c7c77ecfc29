//! The engine: bindings, interface lifecycle and lookups.
//!
//! [`Mux`] is shared by every worker context. The data path, the control
//! path and lower-layer completions all call into the same instance
//! concurrently; every method takes `&self`.

use crate::binding::{BindingId, BindingInfo, PhysicalBinding};
use crate::config::EngineConfig;
use crate::error::{CreateError, MuxError, MuxResult, OpenError};
use crate::lifetime::Release;
use crate::lower::{LowerBinding, LowerStatus};
use crate::oid::Oid;
use crate::request::{read_u32, RequestKind};
use crate::stats::{BindingStats, VifStats};
use crate::upper::{InitParams, UpperEdge};
use crate::vif::{InterfaceInfo, VifId, VifState, VirtualInterface};
use netmux_types::{MacAddress, Medium, PacketFilter};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on interfaces linked to one binding.
pub const MAX_INTERFACES: usize = 1024;

/// The multiplexing engine.
pub struct Mux {
    pub(crate) config: EngineConfig,
    pub(crate) lower: Arc<dyn LowerBinding>,
    pub(crate) upper: Arc<dyn UpperEdge>,
    bindings: RwLock<Vec<Arc<PhysicalBinding>>>,
    next_binding: AtomicU32,
}

impl Mux {
    pub fn new(
        config: EngineConfig,
        lower: Arc<dyn LowerBinding>,
        upper: Arc<dyn UpperEdge>,
    ) -> Self {
        Self {
            config,
            lower,
            upper,
            bindings: RwLock::new(Vec::new()),
            next_binding: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- bindings ----

    /// Opens the adapter named `device` and registers the new binding.
    ///
    /// Link speed, lookahead and address are queried from the adapter; a
    /// failed query leaves the configured default in place.
    #[instrument(skip(self))]
    pub fn open(&self, device: &str) -> Result<BindingId, OpenError> {
        let id = BindingId(self.next_binding.fetch_add(1, Ordering::Relaxed));
        let opened = self
            .lower
            .open(device, id)
            .wait()
            .map_err(|status| match status {
                LowerStatus::Resources => OpenError::Resources {
                    device: device.to_string(),
                },
                status => OpenError::LowerOpenFailed {
                    device: device.to_string(),
                    status,
                },
            })?;

        if opened.medium != Medium::Ethernet {
            warn!(device, medium = ?opened.medium, "refusing binding on unsupported medium");
            if let Err(status) = self.lower.close(opened.handle).wait() {
                warn!(device, %status, "closing rejected binding failed");
            }
            return Err(OpenError::UnsupportedMedium {
                device: device.to_string(),
                medium: opened.medium,
            });
        }

        let binding = Arc::new(PhysicalBinding::new(
            id,
            device,
            opened.handle,
            opened.medium,
            self.config.default_link_speed,
            self.config.default_lookahead,
        ));
        self.bindings.write().push(Arc::clone(&binding));
        self.query_adapter_info(&binding);

        let link = binding.link_props();
        info!(
            binding = %id,
            device,
            link_speed = link.link_speed,
            lookahead = link.lookahead,
            "binding opened"
        );
        Ok(id)
    }

    fn query_adapter_info(&self, binding: &Arc<PhysicalBinding>) {
        let query = |oid: Oid, len: usize| {
            self.request_blocking(binding, RequestKind::Query, oid, vec![0; len])
                .map_err(|status| {
                    warn!(binding = %binding.id(), %oid, %status, "adapter query failed, using default");
                })
                .ok()
        };

        if let Some(speed) = query(Oid::LINK_SPEED, 4).and_then(|reply| read_u32(&reply.data)) {
            binding.update_props(|props| props.link_speed = speed);
        }
        if let Some(lookahead) =
            query(Oid::MAXIMUM_LOOKAHEAD, 4).and_then(|reply| read_u32(&reply.data))
        {
            binding.update_props(|props| props.lookahead = lookahead);
        }
        if let Some(address) = query(Oid::CURRENT_ADDRESS, MacAddress::LEN)
            .and_then(|reply| MacAddress::from_slice(&reply.data))
        {
            binding.update_props(|props| props.address = address);
        }
    }

    /// Opens `device` and starts the named interfaces on it.
    ///
    /// If no interface can be started the binding is unbound again and the
    /// creation error returned.
    #[instrument(skip(self, names))]
    pub fn bind<S: AsRef<str>>(&self, device: &str, names: &[S]) -> MuxResult<BindingId> {
        let id = self.open(device)?;
        if let Err(err) = self.bootstrap_virtual_interfaces(id, names) {
            warn!(binding = %id, %err, "no interface could be started, unbinding");
            if let Err(unbind) = self.unbind(id) {
                warn!(binding = %id, err = %unbind, "unbind after failed bootstrap failed");
            }
            return Err(err.into());
        }
        Ok(id)
    }

    /// Creates every named interface not yet present on the binding. Names
    /// are matched case-insensitively; duplicates are skipped.
    ///
    /// Returns how many interfaces were created. The first creation failure
    /// ends the run; it is only reported if the binding has no interface at
    /// all.
    #[instrument(skip(self, names))]
    pub fn bootstrap_virtual_interfaces<S: AsRef<str>>(
        &self,
        binding: BindingId,
        names: &[S],
    ) -> Result<usize, CreateError> {
        let handle = self
            .lookup_binding(binding)
            .map_err(|_| CreateError::UnknownBinding {
                binding: binding.to_string(),
            })?;

        let mut created = 0;
        for name in names {
            let name = name.as_ref();
            if handle.interfaces.read().find_by_name(name).is_some() {
                debug!(binding = %binding, interface = name, "interface already present");
                continue;
            }
            match self.create_interface(binding, name) {
                Ok(_) => created += 1,
                Err(err) if handle.interface_count() > 0 => {
                    warn!(binding = %binding, interface = name, %err, "stopping bootstrap");
                    return Ok(created);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(created)
    }

    /// Re-runs bootstrap on every open binding with freshly read names.
    /// Existing interfaces are left alone. Returns the number created.
    #[instrument(skip(self, names_for))]
    pub fn reconfigure<F>(&self, names_for: F) -> usize
    where
        F: Fn(&str) -> Vec<String>,
    {
        let bindings: Vec<_> = self.bindings.read().clone();
        let mut created = 0;
        for binding in bindings {
            if binding.is_closing() {
                continue;
            }
            let names = names_for(binding.device());
            match self.bootstrap_virtual_interfaces(binding.id(), &names) {
                Ok(count) => created += count,
                Err(err) => warn!(binding = %binding.id(), %err, "reconfigure failed"),
            }
        }
        info!(created, "reconfigure complete");
        created
    }

    /// Halts every interface of the binding, then closes it.
    #[instrument(skip(self))]
    pub fn unbind(&self, binding: BindingId) -> MuxResult<()> {
        let binding = self.lookup_binding(binding)?;
        if !binding.begin_close() {
            return Err(MuxError::Closing(binding.device().to_string()));
        }
        // Serialize with creations that passed the closing check.
        drop(binding.interfaces.write());

        loop {
            let next = binding
                .interfaces
                .read()
                .iter()
                .find(|iface| !iface.is_stopping() && iface.refs.try_acquire("unbind"))
                .cloned();
            let Some(iface) = next else {
                break;
            };
            self.halt_interface(&binding, &iface);
            self.release_interface(&iface, "unbind");
        }

        self.close_binding(&binding);
        Ok(())
    }

    /// Closes a binding once all of its interfaces have unlinked.
    #[instrument(skip(self))]
    pub fn close(&self, binding: BindingId) -> MuxResult<()> {
        let binding = self.lookup_binding(binding)?;
        if !binding.begin_close() {
            return Err(MuxError::Closing(binding.device().to_string()));
        }
        drop(binding.interfaces.write());
        self.close_binding(&binding);
        Ok(())
    }

    fn close_binding(&self, binding: &Arc<PhysicalBinding>) {
        let policy = self.config.halt_drain;
        while !binding.linked.wait_idle_until(policy.deadline()) {
            warn!(
                binding = %binding.id(),
                remaining = binding.linked.count(),
                "waiting for interfaces to unlink"
            );
        }

        if let Err(status) = self.lower.close(binding.handle()).wait() {
            warn!(binding = %binding.id(), %status, "lower close failed");
        }
        self.bindings
            .write()
            .retain(|entry| !Arc::ptr_eq(entry, binding));
        self.release_binding(binding, "allocation");
        info!(binding = %binding.id(), device = binding.device(), "binding closed");
    }

    // ---- interface lifecycle ----

    /// Links a new interface to the binding and asks the upper layer to
    /// instantiate it. On refusal the interface is unlinked again.
    #[instrument(skip(self))]
    pub fn create_interface(&self, binding: BindingId, name: &str) -> Result<VifId, CreateError> {
        let handle = self
            .lookup_binding(binding)
            .map_err(|_| CreateError::UnknownBinding {
                binding: binding.to_string(),
            })?;

        let iface = {
            let mut arena = handle.interfaces.write();
            if handle.is_closing() {
                return Err(CreateError::BindingClosing {
                    binding: binding.to_string(),
                });
            }
            if arena.len() >= MAX_INTERFACES {
                return Err(CreateError::Resources {
                    name: name.to_string(),
                });
            }
            let number = handle.next_number();
            let iface = arena.insert_with(|slot, generation| {
                let id = VifId {
                    binding,
                    slot,
                    generation,
                };
                Arc::new(VirtualInterface::new(id, name, number, &handle, &self.config))
            });
            handle.refs.acquire("interface");
            handle.linked.increment();
            iface
        };

        if let Err(from) = iface.transition(VifState::InitPending) {
            error!(interface = name, %from, "new interface in unexpected state");
        }
        debug!(interface = name, vif = %iface.id(), number = iface.number(), "interface linked");

        if let Err(source) = self.upper.instantiate(iface.id(), name) {
            warn!(interface = name, err = %source, "instantiation refused");
            self.unlink(&iface);
            return Err(CreateError::Instantiate {
                name: name.to_string(),
                source,
            });
        }
        Ok(iface.id())
    }

    /// The upper layer acknowledged the instance of `vif`.
    #[instrument(skip(self))]
    pub fn initialize_interface(&self, vif: VifId, params: InitParams) -> MuxResult<()> {
        let (_, iface) = self.lookup_interface(vif)?;
        let state = iface.state();
        if state != VifState::InitPending {
            return Err(MuxError::InvalidTransition {
                interface: iface.name().to_string(),
                from: state,
                to: VifState::Active,
            });
        }

        iface.apply_init(&params);
        iface
            .transition(VifState::Active)
            .map_err(|from| MuxError::InvalidTransition {
                interface: iface.name().to_string(),
                from,
                to: VifState::Active,
            })?;
        iface.init_done.signal(());
        info!(
            interface = iface.name(),
            vlan_id = %iface.vlan_id(),
            address = %iface.current_address(),
            "interface active"
        );
        Ok(())
    }

    /// The upper layer failed to instantiate `vif` after accepting the
    /// request.
    #[instrument(skip(self))]
    pub fn instantiation_failed(&self, vif: VifId) -> MuxResult<()> {
        let (_, iface) = self.lookup_interface(vif)?;
        let state = iface.state();
        if state != VifState::InitPending {
            return Err(MuxError::InvalidTransition {
                interface: iface.name().to_string(),
                from: state,
                to: VifState::Destroyed,
            });
        }
        warn!(interface = iface.name(), "instantiation failed");
        self.unlink(&iface);
        iface.init_done.signal(());
        Ok(())
    }

    /// Stops `vif`. Only the first call has an effect.
    #[instrument(skip(self))]
    pub fn halt(&self, vif: VifId) -> MuxResult<()> {
        let (binding, iface) = self.lookup_interface(vif)?;
        self.halt_interface(&binding, &iface);
        Ok(())
    }

    pub(crate) fn halt_interface(&self, binding: &Arc<PhysicalBinding>, iface: &Arc<VirtualInterface>) {
        if !iface.begin_stop() {
            debug!(interface = iface.name(), "interface already stopping");
            return;
        }
        self.fail_queued(iface, MuxError::LowerLayer(LowerStatus::Failure));
        self.flush_receive_queue(binding, iface);

        match iface.state() {
            VifState::InitPending => {
                if self.upper.cancel_instantiation(iface.id()) {
                    info!(interface = iface.name(), "pending instantiation cancelled");
                    self.unlink(iface);
                    iface.init_done.signal(());
                    return;
                }
                debug!(interface = iface.name(), "waiting for instantiation to finish");
                iface.init_done.wait();
                if iface.state() == VifState::Active {
                    self.request_teardown(iface);
                }
            }
            VifState::Active => self.request_teardown(iface),
            state => debug!(interface = iface.name(), %state, "nothing to halt"),
        }
    }

    fn request_teardown(&self, iface: &VirtualInterface) {
        if iface.transition(VifState::Halting).is_ok() {
            debug!(interface = iface.name(), "requesting teardown");
            self.upper.request_teardown(iface.id());
        }
    }

    /// The upper layer tore down the instance of `vif`. Drains the interface
    /// and unlinks it.
    #[instrument(skip(self))]
    pub fn on_instance_halt(&self, vif: VifId) -> MuxResult<()> {
        let (binding, iface) = self.lookup_interface(vif)?;
        match iface.transition(VifState::Halting) {
            // Already halting when the teardown was requested by the engine.
            Ok(_) | Err(VifState::Halting) => {}
            Err(from) => {
                return Err(MuxError::InvalidTransition {
                    interface: iface.name().to_string(),
                    from,
                    to: VifState::Halting,
                })
            }
        }
        iface.begin_stop();

        self.fail_queued(&iface, MuxError::LowerLayer(LowerStatus::Failure));
        self.apply_packet_filter(&binding, &iface, PacketFilter::empty());
        self.flush_receive_queue(&binding, &iface);

        let deadline = self.config.halt_drain.deadline();
        if !iface.sends.wait_idle_until(deadline) {
            warn!(
                interface = iface.name(),
                outstanding = iface.sends.count(),
                "sends still outstanding at halt"
            );
        }
        if !iface.receives.wait_idle_until(deadline) {
            warn!(
                interface = iface.name(),
                outstanding = iface.receives.count(),
                "receives still outstanding at halt"
            );
        }

        self.unlink(&iface);
        self.upper.halt_acknowledged(vif);
        info!(interface = iface.name(), "interface halted");
        Ok(())
    }

    /// Removes the interface from its binding and drops the references the
    /// link held. In-flight frames and requests keep the interface alive
    /// until they release theirs.
    pub(crate) fn unlink(&self, iface: &Arc<VirtualInterface>) {
        let Some(binding) = iface.detach_binding() else {
            debug!(interface = iface.name(), "interface already unlinked");
            return;
        };
        if binding.interfaces.write().remove(iface.id()).is_none() {
            warn!(interface = iface.name(), "interface missing from its binding");
        }
        let previous = iface.mark_destroyed();
        binding.linked.decrement();
        debug!(interface = iface.name(), %previous, "interface unlinked");

        self.release_interface(iface, "allocation");
        self.release_binding(&binding, "interface");
    }

    pub(crate) fn release_interface(&self, iface: &VirtualInterface, reason: &'static str) {
        match iface.refs.release(reason) {
            Ok(Release::Freed) => debug!(interface = iface.name(), "interface freed"),
            Ok(Release::Retained(_)) => {}
            Err(err) => error!(%err, "interface reference release failed"),
        }
    }

    pub(crate) fn release_binding(&self, binding: &PhysicalBinding, reason: &'static str) {
        match binding.refs.release(reason) {
            Ok(Release::Freed) => debug!(binding = %binding.id(), "binding freed"),
            Ok(Release::Retained(_)) => {}
            Err(err) => error!(%err, "binding reference release failed"),
        }
    }

    // ---- lookups ----

    pub(crate) fn lookup_binding(&self, id: BindingId) -> MuxResult<Arc<PhysicalBinding>> {
        self.bindings
            .read()
            .iter()
            .find(|binding| binding.id() == id)
            .cloned()
            .ok_or_else(|| MuxError::not_found(id.to_string()))
    }

    pub(crate) fn lookup_interface(
        &self,
        vif: VifId,
    ) -> MuxResult<(Arc<PhysicalBinding>, Arc<VirtualInterface>)> {
        let binding = self.lookup_binding(vif.binding)?;
        let iface = binding
            .interfaces
            .read()
            .get(vif)
            .cloned()
            .ok_or_else(|| MuxError::not_found(vif.to_string()))?;
        Ok((binding, iface))
    }

    /// Open bindings, in open order.
    pub fn bindings(&self) -> Vec<BindingId> {
        self.bindings.read().iter().map(|b| b.id()).collect()
    }

    pub fn find_binding(&self, device: &str) -> Option<BindingId> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.device() == device)
            .map(|b| b.id())
    }

    pub fn binding_info(&self, binding: BindingId) -> MuxResult<BindingInfo> {
        Ok(self.lookup_binding(binding)?.info())
    }

    pub fn binding_stats(&self, binding: BindingId) -> MuxResult<BindingStats> {
        Ok(self.lookup_binding(binding)?.stats())
    }

    /// Interfaces linked to the binding, in slot order.
    pub fn interfaces(&self, binding: BindingId) -> MuxResult<Vec<VifId>> {
        let binding = self.lookup_binding(binding)?;
        let ids = binding.interfaces.read().iter().map(|i| i.id()).collect();
        Ok(ids)
    }

    pub fn find_interface(&self, binding: BindingId, name: &str) -> Option<VifId> {
        let binding = self.lookup_binding(binding).ok()?;
        let id = binding.interfaces.read().find_by_name(name).map(|i| i.id());
        id
    }

    pub fn interface_state(&self, vif: VifId) -> MuxResult<VifState> {
        Ok(self.lookup_interface(vif)?.1.state())
    }

    pub fn interface_stats(&self, vif: VifId) -> MuxResult<VifStats> {
        Ok(self.lookup_interface(vif)?.1.counters.snapshot())
    }

    pub fn interface_info(&self, vif: VifId) -> MuxResult<InterfaceInfo> {
        Ok(self.lookup_interface(vif)?.1.info())
    }

    /// The interface behind `vif`. The returned handle stays readable after
    /// the interface unlinks.
    pub fn interface(&self, vif: VifId) -> MuxResult<Arc<VirtualInterface>> {
        Ok(self.lookup_interface(vif)?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::{LowerHandle, LowerOp, LowerOpened, MockLowerBinding};
    use crate::testing::{self, Recorder};
    use crate::upper::MockUpperEdge;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_caches_adapter_info() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));

        let id = mux.open("eth0").unwrap();
        let info = mux.binding_info(id).unwrap();
        assert_eq!(info.link_speed, testing::LINK_SPEED);
        assert_eq!(info.lookahead, testing::LOOKAHEAD);
        assert_eq!(info.address, testing::ADAPTER_ADDRESS);
        assert_eq!(mux.find_binding("eth0"), Some(id));
    }

    #[test]
    fn test_open_failure_maps_status() {
        let mut lower = MockLowerBinding::new();
        lower
            .expect_open()
            .returning(|_, _| LowerOp::Ready(Err(LowerStatus::Resources)));
        let mux = testing::mux(lower, MockUpperEdge::new());
        assert!(matches!(
            mux.open("eth0"),
            Err(OpenError::Resources { .. })
        ));
        assert!(mux.bindings().is_empty());
    }

    #[test]
    fn test_open_rejects_other_medium() {
        let mut lower = MockLowerBinding::new();
        lower.expect_open().returning(|_, _| {
            LowerOp::Ready(Ok(LowerOpened {
                handle: LowerHandle(9),
                medium: Medium::Other(7),
            }))
        });
        lower
            .expect_close()
            .times(1)
            .returning(|_| LowerOp::Ready(Ok(())));
        let mux = testing::mux(lower, MockUpperEdge::new());
        assert!(matches!(
            mux.open("wlan0"),
            Err(OpenError::UnsupportedMedium { .. })
        ));
    }

    #[test]
    fn test_failed_queries_keep_defaults() {
        let lower = testing::adapter_with(|_| LowerStatus::Failure);
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(lower, testing::upper(&recorder));

        let id = mux.open("eth0").unwrap();
        let info = mux.binding_info(id).unwrap();
        assert_eq!(info.link_speed, mux.config().default_link_speed);
        assert_eq!(info.lookahead, mux.config().default_lookahead);
        assert_eq!(info.address, MacAddress::ZERO);
    }

    #[test]
    fn test_create_and_initialize() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();

        let vif = mux.create_interface(binding, "vlan5").unwrap();
        assert_eq!(mux.interface_state(vif).unwrap(), VifState::InitPending);
        assert_eq!(recorder.instantiated(), vec![vif]);

        mux.initialize_interface(
            vif,
            InitParams {
                vlan_id: 5,
                ..InitParams::default()
            },
        )
        .unwrap();
        let info = mux.interface_info(vif).unwrap();
        assert_eq!(info.state, VifState::Active);
        assert_eq!(info.vlan_id, 5);
        assert_eq!(info.link_speed, testing::LINK_SPEED);
        assert_eq!(info.current_address, MacAddress::for_virtual_interface(0));

        assert!(matches!(
            mux.initialize_interface(vif, InitParams::default()),
            Err(MuxError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_initialize_address_override_and_vlan_fallback() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();

        let local = mux.create_interface(binding, "local").unwrap();
        let address: MacAddress = "02:aa:bb:cc:dd:ee".parse().unwrap();
        mux.initialize_interface(
            local,
            InitParams {
                network_address: Some(address),
                vlan_id: 4095,
                ..InitParams::default()
            },
        )
        .unwrap();
        let info = mux.interface_info(local).unwrap();
        assert_eq!(info.current_address, address);
        assert_eq!(info.vlan_id, 0);

        let global = mux.create_interface(binding, "global").unwrap();
        let address: MacAddress = "00:aa:bb:cc:dd:ee".parse().unwrap();
        mux.initialize_interface(
            global,
            InitParams {
                network_address: Some(address),
                ..InitParams::default()
            },
        )
        .unwrap();
        let info = mux.interface_info(global).unwrap();
        assert_eq!(info.current_address, MacAddress::for_virtual_interface(1));
    }

    #[test]
    fn test_instantiate_refusal_unlinks() {
        let mut upper = MockUpperEdge::new();
        upper
            .expect_instantiate()
            .returning(|_, _| Err(MuxError::Upper("no slots".into())));
        let mux = testing::mux(testing::adapter(), upper);
        let binding = mux.open("eth0").unwrap();

        let err = mux.create_interface(binding, "vlan5").unwrap_err();
        assert!(matches!(err, CreateError::Instantiate { .. }));
        assert_eq!(mux.interfaces(binding).unwrap(), vec![]);
        assert_eq!(mux.binding_info(binding).unwrap().references, 1);
    }

    #[test]
    fn test_bootstrap_skips_duplicates() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();

        let created = mux
            .bootstrap_virtual_interfaces(binding, &["vlan5", "VLAN5", "vlan6"])
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(mux.interfaces(binding).unwrap().len(), 2);

        let created = mux
            .reconfigure(|_| vec!["vlan5".to_string(), "vlan7".to_string()]);
        assert_eq!(created, 1);
        assert!(mux.find_interface(binding, "vlan7").is_some());
    }

    #[test]
    fn test_halt_cancels_pending_instantiation() {
        let recorder = Arc::new(Recorder::default());
        recorder.set_cancel_instantiation(true);
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();
        let vif = mux.create_interface(binding, "vlan5").unwrap();

        mux.halt(vif).unwrap();
        assert!(mux.interfaces(binding).unwrap().is_empty());
        assert!(recorder.teardowns().is_empty());
        assert!(matches!(
            mux.interface_state(vif),
            Err(MuxError::NotFound(_))
        ));
    }

    #[test]
    fn test_halt_active_interface_runs_teardown() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();
        let vif = testing::active_interface(&mux, binding, "vlan5", 5);

        mux.halt(vif).unwrap();
        assert_eq!(mux.interface_state(vif).unwrap(), VifState::Halting);
        assert_eq!(recorder.teardowns(), vec![vif]);

        // Second halt is a no-op.
        mux.halt(vif).unwrap();
        assert_eq!(recorder.teardowns(), vec![vif]);

        mux.on_instance_halt(vif).unwrap();
        assert_eq!(recorder.halted(), vec![vif]);
        assert!(mux.interfaces(binding).unwrap().is_empty());
        assert_eq!(mux.binding_info(binding).unwrap().references, 1);
    }

    #[test]
    fn test_instance_halt_before_activation_is_refused() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();
        let vif = mux.create_interface(binding, "vlan5").unwrap();

        assert!(matches!(
            mux.on_instance_halt(vif),
            Err(MuxError::InvalidTransition {
                from: VifState::InitPending,
                ..
            })
        ));
        let info = mux.interface_info(vif).unwrap();
        assert!(!info.stopping);
        assert_eq!(info.state, VifState::InitPending);
    }

    #[test]
    fn test_unbind_halts_everything_and_closes() {
        let recorder = Arc::new(Recorder::default());
        recorder.set_auto_initialize(true);
        recorder.set_auto_halt(true);
        let mux = Arc::new(testing::mux(testing::adapter(), testing::upper(&recorder)));
        recorder.attach(&mux);

        let binding = mux.bind("eth0", &["vlan5", "vlan6"]).unwrap();
        assert_eq!(mux.interfaces(binding).unwrap().len(), 2);

        mux.unbind(binding).unwrap();
        assert!(mux.bindings().is_empty());
        assert_eq!(recorder.halted().len(), 2);
        assert!(matches!(mux.unbind(binding), Err(MuxError::NotFound(_))));
    }

    #[test]
    fn test_create_on_closing_binding_fails() {
        let recorder = Arc::new(Recorder::default());
        let mux = testing::mux(testing::adapter(), testing::upper(&recorder));
        let binding = mux.open("eth0").unwrap();
        mux.close(binding).unwrap();
        assert!(matches!(
            mux.create_interface(binding, "vlan5"),
            Err(CreateError::UnknownBinding { .. })
        ));
    }
}
