//! Daemon lifecycle: bind configured devices, pump the loopback wires,
//! reload on request and unbind everything on shutdown.

use crate::error::Result;
use crate::loopback::LoopbackAdapter;
use crate::source::ConfigSource;
use crate::stack::{LoggingStack, StackCounters};
use netmux_core::{BindingInfo, InterfaceInfo, LowerBinding, Mux, MuxConfig, UpperEdge};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// How often the loopback wires are pumped.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot printed on shutdown.
#[derive(Debug, Serialize)]
pub struct Report {
    pub bindings: Vec<BindingInfo>,
    pub interfaces: Vec<InterfaceInfo>,
    pub stack: StackCounters,
}

pub struct Daemon {
    mux: Arc<Mux>,
    adapter: Arc<LoopbackAdapter>,
    stack: Arc<LoggingStack>,
    source: Arc<dyn ConfigSource>,
}

impl Daemon {
    /// Loads the configuration and binds every configured device.
    #[instrument(skip(source), fields(source = %source.describe()))]
    pub async fn start(source: Arc<dyn ConfigSource>) -> Result<Self> {
        let config = source.load().await?;
        let adapter = Arc::new(LoopbackAdapter::new());
        let stack = Arc::new(LoggingStack::new(config.clone()));
        let lower: Arc<dyn LowerBinding> = Arc::clone(&adapter) as Arc<dyn LowerBinding>;
        let upper: Arc<dyn UpperEdge> = Arc::clone(&stack) as Arc<dyn UpperEdge>;
        let mux = Arc::new(Mux::new(config.engine.clone(), lower, upper));
        stack.attach(&mux);

        let daemon = Self {
            mux,
            adapter,
            stack,
            source,
        };
        daemon.bind_missing(&config).await?;
        info!(bindings = daemon.mux.bindings().len(), "netmuxd started");
        Ok(daemon)
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    pub fn adapter(&self) -> &Arc<LoopbackAdapter> {
        &self.adapter
    }

    pub fn stack(&self) -> &Arc<LoggingStack> {
        &self.stack
    }

    /// Binds every configured device that has no binding yet. A device that
    /// fails to bind is logged and skipped.
    async fn bind_missing(&self, config: &MuxConfig) -> Result<usize> {
        let mut bound = 0;
        for binding in &config.bindings {
            if self.mux.find_binding(&binding.device).is_some() {
                continue;
            }
            let mux = Arc::clone(&self.mux);
            let device = binding.device.clone();
            let names = binding.interface_names();
            match tokio::task::spawn_blocking(move || mux.bind(&device, names.as_slice())).await? {
                Ok(id) => {
                    info!(device = %binding.device, binding = %id, "device bound");
                    bound += 1;
                }
                Err(err) => error!(device = %binding.device, %err, "failed to bind device"),
            }
        }
        Ok(bound)
    }

    /// Re-reads the configuration, binds new devices and creates interfaces
    /// that are configured but missing. Returns the number of interfaces
    /// created on existing bindings.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<usize> {
        let config = self.source.load().await?;
        if config.engine != *self.mux.config() {
            warn!("engine settings changed; they take effect on restart");
        }
        self.stack.update_config(config.clone());
        self.bind_missing(&config).await?;

        let mux = Arc::clone(&self.mux);
        let created =
            tokio::task::spawn_blocking(move || mux.reconfigure(|device| config.names_for(device)))
                .await?;
        info!(created, "configuration reloaded");
        Ok(created)
    }

    /// Indicates everything waiting on the loopback wires.
    pub async fn pump(&self) -> Result<usize> {
        let mux = Arc::clone(&self.mux);
        let adapter = Arc::clone(&self.adapter);
        Ok(tokio::task::spawn_blocking(move || adapter.pump(&mux)).await?)
    }

    pub fn report(&self) -> Report {
        let bindings: Vec<BindingInfo> = self
            .mux
            .bindings()
            .into_iter()
            .filter_map(|id| self.mux.binding_info(id).ok())
            .collect();
        let interfaces = self
            .mux
            .bindings()
            .into_iter()
            .flat_map(|id| self.mux.interfaces(id).unwrap_or_default())
            .filter_map(|vif| self.mux.interface_info(vif).ok())
            .collect();
        Report {
            bindings,
            interfaces,
            stack: self.stack.counters(),
        }
    }

    /// Runs until `shutdown` is raised, reloading whenever `reload` is.
    pub async fn run(&self, shutdown: Arc<AtomicBool>, reload: Arc<AtomicBool>) -> Result<()> {
        let mut ticker = tokio::time::interval(PUMP_INTERVAL);
        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            if reload.swap(false, Ordering::Relaxed) {
                if let Err(err) = self.reload().await {
                    warn!(%err, "reload failed; keeping current configuration");
                }
            }
            self.pump().await?;
        }
        info!("netmuxd: Received shutdown signal");
        Ok(())
    }

    /// Unbinds every device. Returns the final report.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<Report> {
        self.pump().await?;
        for id in self.mux.bindings() {
            let mux = Arc::clone(&self.mux);
            if let Err(err) = tokio::task::spawn_blocking(move || mux.unbind(id)).await? {
                warn!(binding = %id, %err, "unbind failed");
            }
        }
        let report = self.report();
        info!(
            halted = report.stack.halted,
            frames = report.stack.frames,
            "netmuxd stopped"
        );
        Ok(report)
    }
}
