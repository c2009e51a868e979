//! Plugin instance lifecycle
//!
//! A [`Bridge`] is the per-instance plugin context. Its lifecycle is carried
//! by ownership: `initialize` either returns a ready bridge or an error (no
//! instance exists), `dispatch` borrows it, and `shutdown` consumes it, so
//! there is no way back to a usable instance after either end state.

use crate::config::{BridgeConfig, SourceMode};
use crate::dispatch;
use crate::error::{BridgeError, LoadError};
use crate::logging::{self, LogSink};
use crate::runtime::Runtime;
use crate::source::{CachedSource, HandlerSource, PerCallSource};
use ovpn_hook_api::{HookMask, Outcome};
use tracing::Dispatch;

/// A ready plugin instance
pub struct Bridge {
    config: BridgeConfig,
    source: Box<dyn HandlerSource>,
    log: Dispatch,
}

impl Bridge {
    /// Start the runtime, import the module and scan its handlers
    ///
    /// Anything acquired before a failure is released before returning.
    pub fn initialize(config: BridgeConfig, sink: Option<LogSink>) -> Result<Self, BridgeError> {
        let log = match logging::dispatch(sink.clone(), &config.log_filter) {
            Ok(log) => log,
            Err(e) => {
                // The instance filter is unusable; report through an error-only one.
                let fallback = logging::dispatch(sink, "error")?;
                tracing::dispatcher::with_default(&fallback, || {
                    tracing::error!("Invalid plugin configuration: {}", e)
                });
                return Err(e.into());
            }
        };

        let source = tracing::dispatcher::with_default(&log, || -> Result<_, BridgeError> {
            config
                .validate()
                .inspect_err(|e| tracing::error!("Invalid plugin configuration: {}", e))?;
            tracing::debug!(module = %config.module, mode = ?config.mode, "Initializing hook bridge");

            Self::bind(&config).map_err(|e| {
                tracing::error!("Failed to load hook module: {}", e.diagnostic());
                BridgeError::from(e)
            })
        })?;

        Ok(Self::ready(config, source, log))
    }

    /// Build an instance around an existing handler source
    pub fn with_source(
        config: BridgeConfig,
        source: Box<dyn HandlerSource>,
        sink: Option<LogSink>,
    ) -> Result<Self, BridgeError> {
        let log = logging::dispatch(sink, &config.log_filter)?;
        Ok(Self::ready(config, source, log))
    }

    fn bind(config: &BridgeConfig) -> Result<Box<dyn HandlerSource>, LoadError> {
        Ok(match config.mode {
            SourceMode::Cached => {
                let runtime = Runtime::acquire()?;
                Box::new(CachedSource::load(&runtime, config)?)
            }
            SourceMode::PerCall => Box::new(PerCallSource::probe(config)?),
        })
    }

    fn ready(config: BridgeConfig, source: Box<dyn HandlerSource>, log: Dispatch) -> Self {
        let mask = source.mask();
        tracing::dispatcher::with_default(&log, || {
            tracing::info!(
                module = %config.module,
                mask = format_args!("{:#x}", mask.bits()),
                hooks = mask.iter().count(),
                "Hook module ready"
            );
        });

        Self {
            config,
            source,
            log,
        }
    }

    /// Hooks this instance services, as reported to the host
    pub fn mask(&self) -> HookMask {
        self.source.mask()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `f` with this instance's log sink as the default subscriber
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.log, f)
    }

    /// Handle one host event
    pub fn dispatch<E: AsRef<str>>(&self, hook_id: i32, entries: &[E]) -> Outcome {
        tracing::dispatcher::with_default(&self.log, || {
            dispatch::dispatch(self.source.as_ref(), hook_id, entries)
        })
    }

    /// Release handlers, module and (if last) the runtime
    pub fn shutdown(self) {
        let Self { config, source, log } = self;
        tracing::dispatcher::with_default(&log, || {
            tracing::debug!(module = %config.module, "Shutting down hook bridge");
            drop(source);
        });
    }
}
