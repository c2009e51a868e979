//! Handler sources
//!
//! A [`HandlerSource`] answers two questions for the dispatcher: which hooks
//! can be serviced, and what a handler returned for a given environment.
//! Two implementations trade latency for freshness:
//!
//! | | [`CachedSource`] | [`PerCallSource`] |
//! |-|------------------|-------------------|
//! | Module import | once, at initialize | every dispatch |
//! | Handler lookup | once, cached | every dispatch |
//! | Runtime held | for the instance's life | during a dispatch only |
//! | Module edits on disk | ignored | picked up |

use crate::config::BridgeConfig;
use crate::error::{InvokeError, LoadError};
use crate::module::{self, LoadedModule, ModuleLocator};
use crate::outcome::ReturnValue;
use crate::runtime::Runtime;
use ovpn_hook_api::{Environment, Hook, HookMask};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use wasmtime::Func;

/// Provider of bound handlers
pub trait HandlerSource: Send + Sync {
    /// Hooks this source can service, fixed at construction
    fn mask(&self) -> HookMask;

    /// Invoke the handler for `hook` with `env` as its only argument
    fn invoke(&self, hook: Hook, env: &Environment) -> Result<ReturnValue, InvokeError>;
}

/// Eager-cache source: one import, handlers cached until shutdown
pub struct CachedSource {
    state: Mutex<CachedState>,
    mask: HookMask,
}

struct CachedState {
    module: LoadedModule,
    handlers: HashMap<Hook, Func>,
}

impl CachedSource {
    /// Import the configured module and cache every supported handler
    pub fn load(runtime: &Runtime, config: &BridgeConfig) -> Result<Self, LoadError> {
        let path = ModuleLocator::new(config.search_path.clone()).locate(&config.module)?;
        let mut module = module::load(runtime, &path, config.fuel)?;
        let (handlers, mask) = module.scan();

        Ok(Self {
            state: Mutex::new(CachedState { module, handlers }),
            mask,
        })
    }

    /// Number of cached handlers
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    // A panic inside an earlier call must not disable the instance.
    fn lock(&self) -> std::sync::MutexGuard<'_, CachedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandlerSource for CachedSource {
    fn mask(&self) -> HookMask {
        self.mask
    }

    fn invoke(&self, hook: Hook, env: &Environment) -> Result<ReturnValue, InvokeError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let func = state
            .handlers
            .get(&hook)
            .cloned()
            .ok_or(InvokeError::Unsupported(hook.handler_name()))?;

        state.module.invoke(&func, hook, env)
    }
}

impl Drop for CachedSource {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(
            handlers = state.handlers.len(),
            path = %state.module.path().display(),
            "Releasing cached hook handlers"
        );
    }
}

/// Per-call source: import, resolve, call, release on every dispatch
pub struct PerCallSource {
    locator: ModuleLocator,
    module: String,
    fuel: Option<u64>,
    mask: HookMask,
}

impl PerCallSource {
    /// Probe the module once to learn which hooks it supports
    ///
    /// Everything acquired by the probe is released before returning.
    pub fn probe(config: &BridgeConfig) -> Result<Self, LoadError> {
        let locator = ModuleLocator::new(config.search_path.clone());
        let mask = {
            let runtime = Runtime::acquire()?;
            let path = locator.locate(&config.module)?;
            let mut module = module::load(&runtime, &path, config.fuel)?;
            module.scan().1
        };

        Ok(Self {
            locator,
            module: config.module.clone(),
            fuel: config.fuel,
            mask,
        })
    }
}

impl HandlerSource for PerCallSource {
    fn mask(&self) -> HookMask {
        self.mask
    }

    fn invoke(&self, hook: Hook, env: &Environment) -> Result<ReturnValue, InvokeError> {
        if !self.mask.contains(hook) {
            return Err(InvokeError::Unsupported(hook.handler_name()));
        }

        let runtime = Runtime::acquire()?;
        let path = self.locator.locate(&self.module)?;
        let mut module = module::load(&runtime, &path, self.fuel)?;
        let func = module
            .resolve(hook.handler_name())
            .ok_or(InvokeError::Unsupported(hook.handler_name()))?;

        module.invoke(&func, hook, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const DEFERRING: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "plugin_alloc") (param i32) (result i32) i32.const 1024)
          (func (export "plugin_dealloc") (param i32 i32))
          (func (export "plugin_tls_verify") (param i32 i32) (result i32) i32.const 2))
    "#;

    fn config_for(dir: &Path) -> BridgeConfig {
        std::fs::write(dir.join("deferring.wat"), DEFERRING).unwrap();
        BridgeConfig::new("deferring").search_path([dir])
    }

    #[test]
    fn test_cached_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let runtime = Runtime::acquire().unwrap();
        let source = CachedSource::load(&runtime, &config).unwrap();

        assert_eq!(source.handler_count(), 1);
        assert!(source.mask().contains(Hook::TlsVerify));

        let env = Environment::new();
        assert_eq!(
            source.invoke(Hook::TlsVerify, &env).unwrap(),
            ReturnValue::Int(2)
        );
        assert!(matches!(
            source.invoke(Hook::Up, &env),
            Err(InvokeError::Unsupported("plugin_up"))
        ));
    }

    #[test]
    fn test_per_call_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let source = PerCallSource::probe(&config).unwrap();

        assert_eq!(source.mask().bits(), Hook::TlsVerify.mask_bit());

        let env = Environment::new();
        assert_eq!(
            source.invoke(Hook::TlsVerify, &env).unwrap(),
            ReturnValue::Int(2)
        );
        assert!(matches!(
            source.invoke(Hook::Down, &env),
            Err(InvokeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_per_call_source_reports_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let source = PerCallSource::probe(&config).unwrap();

        std::fs::remove_file(dir.path().join("deferring.wat")).unwrap();

        let result = source.invoke(Hook::TlsVerify, &Environment::new());
        assert!(matches!(
            result,
            Err(InvokeError::Load(LoadError::NotFound { .. }))
        ));
    }
}
