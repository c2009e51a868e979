//! Hook module binding using wasmtime
//!
//! Imports exactly one Wasm module and resolves hook handlers from its
//! exports by name. A missing or non-callable export is not an error; the
//! hook is simply unsupported.

use crate::error::{InvokeError, LoadError};
use crate::outcome::ReturnValue;
use crate::runtime::{self, Runtime};
use ovpn_hook_api::{
    encode_environment, Environment, Hook, HookMask, API_VERSION, EXPORT_ALLOC,
    EXPORT_API_VERSION, EXPORT_DEALLOC, EXPORT_MEMORY,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use wasmtime::*;

/// Finds the file behind a module identifier
#[derive(Debug, Clone)]
pub struct ModuleLocator {
    search_path: Vec<PathBuf>,
}

impl ModuleLocator {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Resolve an identifier to a module file
    ///
    /// An existing path wins. Otherwise `<dir>/<identifier>.wasm` and
    /// `<dir>/<identifier>.wat` are tried for every search directory.
    pub fn locate(&self, identifier: &str) -> Result<PathBuf, LoadError> {
        let direct = Path::new(identifier);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        let mut searched = Vec::new();
        for dir in &self.search_path {
            for ext in ["wasm", "wat"] {
                let candidate = dir.join(format!("{identifier}.{ext}"));
                if candidate.is_file() {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
        }

        Err(LoadError::NotFound {
            module: identifier.to_string(),
            searched,
        })
    }
}

/// An instantiated hook module
pub struct LoadedModule {
    store: Store<()>,
    instance: Instance,
    memory: Memory,
    alloc_fn: TypedFunc<i32, i32>,
    dealloc_fn: TypedFunc<(i32, i32), ()>,
    fuel: Option<u64>,
    path: PathBuf,
    _runtime: Runtime,
}

/// Import a module file
pub fn load(runtime: &Runtime, path: &Path, fuel: Option<u64>) -> Result<LoadedModule, LoadError> {
    // 1. Read and compile (binary or text format)
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let module = Module::new(runtime.engine(), &bytes).map_err(LoadError::Compilation)?;

    // 2. Create store, no host imports are offered
    let mut store = runtime.new_store();
    arm_load_fuel(&mut store, fuel)?;
    let linker = Linker::new(runtime.engine());

    // 3. Instantiate, running the start function if any
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(LoadError::Instantiation)?;

    // 4. Memory and allocator are needed to pass the environment
    let memory = instance
        .get_memory(&mut store, EXPORT_MEMORY)
        .ok_or(LoadError::MissingExport(EXPORT_MEMORY))?;
    let alloc_fn = instance
        .get_typed_func::<i32, i32>(&mut store, EXPORT_ALLOC)
        .map_err(|_| LoadError::MissingExport(EXPORT_ALLOC))?;
    let dealloc_fn = instance
        .get_typed_func::<(i32, i32), ()>(&mut store, EXPORT_DEALLOC)
        .map_err(|_| LoadError::MissingExport(EXPORT_DEALLOC))?;

    // 5. Validate API version when the module declares one
    if let Some(version_fn) = instance.get_func(&mut store, EXPORT_API_VERSION) {
        let version = version_fn
            .typed::<(), i32>(&store)
            .and_then(|f| f.call(&mut store, ()))
            .map_err(|e| LoadError::Instantiation(e.context("hook_api_version failed")))?;
        if i64::from(version) != i64::from(API_VERSION) {
            return Err(LoadError::ApiVersionMismatch {
                expected: API_VERSION,
                actual: i64::from(version),
            });
        }
    }

    tracing::debug!(path = %path.display(), "Hook module loaded");

    Ok(LoadedModule {
        store,
        instance,
        memory,
        alloc_fn,
        dealloc_fn,
        fuel,
        path: path.to_path_buf(),
        _runtime: runtime.clone(),
    })
}

fn arm_load_fuel(store: &mut Store<()>, fuel: Option<u64>) -> Result<(), LoadError> {
    runtime::arm_fuel(store, fuel)
        .map_err(|e| LoadError::Instantiation(e.context("Failed to set fuel for instantiation")))
}

impl LoadedModule {
    /// File the module was imported from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a callable export by name
    pub fn resolve(&mut self, name: &str) -> Option<Func> {
        match self.instance.get_export(&mut self.store, name) {
            Some(Extern::Func(func)) => Some(func),
            _ => None,
        }
    }

    /// Resolve every hook in the table
    ///
    /// Returns the bound handlers and the mask of hooks they cover.
    pub fn scan(&mut self) -> (HashMap<Hook, Func>, HookMask) {
        let mut handlers = HashMap::new();
        let mut mask = HookMask::empty();

        for hook in Hook::ALL {
            match self.resolve(hook.handler_name()) {
                Some(func) => {
                    handlers.insert(hook, func);
                    mask.insert(hook);
                    tracing::debug!("hook {} is enabled", hook.handler_name());
                }
                None => {
                    tracing::debug!("hook {} is disabled", hook.handler_name());
                }
            }
        }

        (handlers, mask)
    }

    /// Call a handler with the environment as its only argument
    ///
    /// The environment is written to guest memory as MessagePack and the
    /// handler receives `(ptr, len)`.
    pub fn invoke(
        &mut self,
        func: &Func,
        hook: Hook,
        env: &Environment,
    ) -> Result<ReturnValue, InvokeError> {
        // 1. Serialize environment
        let bytes = encode_environment(env)?;
        let len = i32::try_from(bytes.len())
            .map_err(|_| InvokeError::Memory(format!("environment too large: {}", bytes.len())))?;

        // 2. Allocate memory in guest
        self.refuel()?;
        let ptr = self
            .alloc_fn
            .call(&mut self.store, len)
            .map_err(|source| InvokeError::Trap {
                function: EXPORT_ALLOC,
                source,
            })?;
        if ptr == 0 && len > 0 {
            return Err(InvokeError::Memory("guest allocation failed".to_string()));
        }

        // 3. Write environment to guest memory
        self.memory
            .write(&mut self.store, ptr as usize, &bytes)
            .map_err(|e| InvokeError::Memory(format!("Failed to write environment: {}", e)))?;

        // 4. Call handler
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        let called = func.call(
            &mut self.store,
            &[Val::I32(ptr), Val::I32(len)],
            &mut results,
        );

        // 5. Release the environment even if the handler trapped
        let released = self.refuel().and_then(|()| {
            self.dealloc_fn
                .call(&mut self.store, (ptr, len))
                .map_err(|source| InvokeError::Trap {
                    function: EXPORT_DEALLOC,
                    source,
                })
        });
        if let Err(e) = released {
            tracing::error!(hook = %hook, "Failed to release environment: {}", e);
        }

        called.map_err(|source| InvokeError::Trap {
            function: hook.handler_name(),
            source,
        })?;

        Ok(ReturnValue::from_results(&results))
    }

    fn refuel(&mut self) -> Result<(), InvokeError> {
        runtime::arm_fuel(&mut self.store, self.fuel).map_err(|source| InvokeError::Trap {
            function: "set_fuel",
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{self, tests::capture, Severity};

    const MINIMAL: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "plugin_alloc") (param i32) (result i32) i32.const 1024)
          (func (export "plugin_dealloc") (param i32 i32))
          (func (export "plugin_up") (param i32 i32) (result i32) i32.const 0)
          (global (export "plugin_down") i32 (i32.const 0)))
    "#;

    fn write_module(dir: &Path, name: &str, wat: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, wat).unwrap();
        path
    }

    #[test]
    fn test_locate_by_name_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "auth.wat", MINIMAL);
        let locator = ModuleLocator::new(vec![dir.path().to_path_buf()]);

        assert_eq!(locator.locate("auth").unwrap(), path);
        assert_eq!(locator.locate(path.to_str().unwrap()).unwrap(), path);
    }

    #[test]
    fn test_locate_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ModuleLocator::new(vec![dir.path().to_path_buf()]);

        match locator.locate("missing") {
            Err(LoadError::NotFound { module, searched }) => {
                assert_eq!(module, "missing");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("Expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_resolve_only_callables() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.wat", MINIMAL);
        let runtime = Runtime::acquire().unwrap();
        let mut module = load(&runtime, &path, None).unwrap();

        assert!(module.resolve("plugin_up").is_some());
        assert!(module.resolve("plugin_down").is_none());
        assert!(module.resolve("plugin_nonexistent").is_none());
    }

    #[test]
    fn test_scan_builds_mask() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.wat", MINIMAL);
        let runtime = Runtime::acquire().unwrap();
        let mut module = load(&runtime, &path, None).unwrap();

        let (handlers, mask) = module.scan();
        assert_eq!(handlers.len(), 1);
        assert!(handlers.contains_key(&Hook::Up));
        assert_eq!(mask.bits(), Hook::Up.mask_bit());
    }

    #[test]
    fn test_load_requires_allocator() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(
            dir.path(),
            "m.wat",
            r#"(module (memory (export "memory") 1))"#,
        );
        let runtime = Runtime::acquire().unwrap();

        assert!(matches!(
            load(&runtime, &path, None),
            Err(LoadError::MissingExport(EXPORT_ALLOC))
        ));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.wasm", "not a module");
        let runtime = Runtime::acquire().unwrap();

        assert!(matches!(
            load(&runtime, &path, None),
            Err(LoadError::Compilation(_))
        ));
    }

    #[test]
    fn test_invoke_passes_environment_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(
            dir.path(),
            "m.wat",
            r#"
            (module
              (memory (export "memory") 1)
              (func (export "plugin_alloc") (param i32) (result i32) i32.const 1024)
              (func (export "plugin_dealloc") (param i32 i32))
              (func (export "plugin_up") (param i32 i32) (result i32) local.get 1))
            "#,
        );
        let runtime = Runtime::acquire().unwrap();
        let mut module = load(&runtime, &path, None).unwrap();
        let func = module.resolve("plugin_up").unwrap();

        let mut env = Environment::new();
        env.insert("script_type".into(), "up".into());
        let expected = encode_environment(&env).unwrap().len() as i64;

        let value = module.invoke(&func, Hook::Up, &env).unwrap();
        assert_eq!(value, ReturnValue::Int(expected));
    }

    #[test]
    fn test_dealloc_trap_is_logged_and_result_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(
            dir.path(),
            "m.wat",
            r#"
            (module
              (memory (export "memory") 1)
              (func (export "plugin_alloc") (param i32) (result i32) i32.const 1024)
              (func (export "plugin_dealloc") (param i32 i32) unreachable)
              (func (export "plugin_up") (param i32 i32) (result i32) i32.const 2))
            "#,
        );
        let runtime = Runtime::acquire().unwrap();
        let mut module = load(&runtime, &path, None).unwrap();
        let func = module.resolve("plugin_up").unwrap();
        let (sink, lines) = capture();
        let log = logging::dispatch(Some(sink), "debug").unwrap();

        let value = tracing::dispatcher::with_default(&log, || {
            module.invoke(&func, Hook::Up, &Environment::new())
        })
        .unwrap();
        assert_eq!(value, ReturnValue::Int(2));

        let lines = lines.lock().unwrap();
        assert!(lines.iter().any(|(severity, line)| *severity == Severity::Error
            && line.contains("Failed to release environment")
            && line.contains(EXPORT_DEALLOC)));
    }

    #[test]
    fn test_fuel_setup_failure_is_instantiation_error() {
        // an engine without fuel metering rejects set_fuel
        let mut store = Store::new(&Engine::default(), ());

        match arm_load_fuel(&mut store, Some(10)) {
            Err(e @ LoadError::Instantiation(_)) => {
                assert!(e.diagnostic().contains("Failed to set fuel"));
            }
            other => panic!("Expected instantiation error, got {other:?}"),
        }
    }
}
