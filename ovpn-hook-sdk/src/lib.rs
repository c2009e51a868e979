//! ovpn-hook-sdk: SDK for writing hook modules
//!
//! A hook module is a Wasm plugin loaded by the OpenVPN hook bridge. It
//! exports one function per hook it handles (`plugin_up`,
//! `plugin_auth_user_pass_verify`, ...) plus an allocator the bridge uses to
//! hand over each event's environment.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ovpn_hook_sdk::prelude::*;
//!
//! struct AuthHook;
//!
//! impl HookPlugin for AuthHook {
//!     fn handle(hook: Hook, env: &Environment) -> Outcome {
//!         match env.get("username").map(String::as_str) {
//!             Some("alice") => Outcome::Success,
//!             _ => Outcome::Error,
//!         }
//!     }
//! }
//!
//! // Export plugin_auth_user_pass_verify and the allocator
//! export_hooks!(AuthHook: plugin_auth_user_pass_verify);
//! ```

use std::alloc::{alloc, dealloc, Layout};

// Re-export everything from ovpn-hook-api
pub use ovpn_hook_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{export_hooks, memory, HookPlugin};
    pub use ovpn_hook_api::{Environment, Hook, Outcome, API_VERSION};
}

/// Trait that hook modules implement
pub trait HookPlugin {
    /// Handle one event; only hooks listed in `export_hooks!` reach here
    fn handle(hook: Hook, env: &Environment) -> Outcome;
}

/// Decode an environment and run the plugin for the named hook
///
/// Returns the integer code the bridge expects. An unknown name or an
/// undecodable environment yields `Outcome::Error`.
pub fn handle_bytes<P: HookPlugin>(handler_name: &str, bytes: &[u8]) -> i32 {
    let Some(hook) = Hook::from_handler_name(handler_name) else {
        return Outcome::Error.code();
    };
    match decode_environment(bytes) {
        Ok(env) => P::handle(hook, &env).code(),
        Err(_) => Outcome::Error.code(),
    }
}

/// Memory utilities for Wasm hook modules
pub mod memory {
    use super::*;

    /// Allocate memory in the Wasm linear memory
    #[inline]
    pub fn plugin_alloc(size: i32) -> i32 {
        if size <= 0 {
            return 0;
        }
        match Layout::from_size_align(size as usize, 1) {
            Ok(layout) => unsafe { alloc(layout) as i32 },
            Err(_) => 0,
        }
    }

    /// Deallocate memory in the Wasm linear memory
    ///
    /// The ptr must have been allocated by `plugin_alloc` with the same size.
    #[inline]
    pub fn plugin_dealloc(ptr: i32, size: i32) {
        if ptr == 0 || size <= 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(size as usize, 1) {
            unsafe { dealloc(ptr as *mut u8, layout) }
        }
    }

    /// View a host-written buffer
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes written by the host.
    pub unsafe fn host_bytes<'a>(ptr: i32, len: i32) -> &'a [u8] {
        if ptr == 0 || len <= 0 {
            return &[];
        }
        std::slice::from_raw_parts(ptr as *const u8, len as usize)
    }
}

/// Macro to export hook handlers and the allocator
///
/// Every listed name must be a handler name from the hook table; the
/// bridge advertises exactly these hooks to OpenVPN.
///
/// # Example
///
/// ```rust,ignore
/// struct MyHooks;
///
/// impl HookPlugin for MyHooks {
///     fn handle(hook: Hook, env: &Environment) -> Outcome { /* ... */ }
/// }
///
/// export_hooks!(MyHooks: plugin_client_connect, plugin_learn_address);
/// ```
#[macro_export]
macro_rules! export_hooks {
    ($plugin:ty: $($handler:ident),+ $(,)?) => {
        $(
            #[no_mangle]
            pub extern "C" fn $handler(env_ptr: i32, env_len: i32) -> i32 {
                let bytes = unsafe { $crate::memory::host_bytes(env_ptr, env_len) };
                $crate::handle_bytes::<$plugin>(stringify!($handler), bytes)
            }
        )+

        #[no_mangle]
        pub extern "C" fn hook_api_version() -> i32 {
            $crate::API_VERSION as i32
        }

        #[no_mangle]
        pub extern "C" fn plugin_alloc(size: i32) -> i32 {
            $crate::memory::plugin_alloc(size)
        }

        #[no_mangle]
        pub extern "C" fn plugin_dealloc(ptr: i32, size: i32) {
            $crate::memory::plugin_dealloc(ptr, size)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gate;

    impl HookPlugin for Gate {
        fn handle(hook: Hook, env: &Environment) -> Outcome {
            match (hook, env.get("username").map(String::as_str)) {
                (Hook::AuthUserPassVerify, Some("alice")) => Outcome::Success,
                (Hook::AuthUserPassVerify, Some("later")) => Outcome::Deferred,
                _ => Outcome::Error,
            }
        }
    }

    fn encoded(pairs: &[(&str, &str)]) -> Vec<u8> {
        let env: Environment = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        encode_environment(&env).unwrap()
    }

    #[test]
    fn test_handle_bytes_routes_by_name() {
        let name = "plugin_auth_user_pass_verify";
        assert_eq!(handle_bytes::<Gate>(name, &encoded(&[("username", "alice")])), 0);
        assert_eq!(handle_bytes::<Gate>(name, &encoded(&[("username", "later")])), 2);
        assert_eq!(handle_bytes::<Gate>(name, &encoded(&[("username", "mallory")])), 1);
    }

    #[test]
    fn test_handle_bytes_rejects_bad_input() {
        let env = encoded(&[("username", "alice")]);
        assert_eq!(handle_bytes::<Gate>("plugin_unknown", &env), 1);
        assert_eq!(handle_bytes::<Gate>("plugin_auth_user_pass_verify", &[0xc1]), 1);
    }

    #[test]
    fn test_alloc_edge_cases() {
        assert_eq!(memory::plugin_alloc(0), 0);
        assert_eq!(memory::plugin_alloc(-1), 0);
        assert!(unsafe { memory::host_bytes(0, 10) }.is_empty());
    }

    // Note: Allocation round trips run inside Wasm; pointers are 32-bit there
    // and the functions are not meaningful on a 64-bit native target.
}
