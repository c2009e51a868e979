//! ovpn-hook-bridge: OpenVPN plugin dispatching hooks to a Wasm module
//!
//! Built as a `cdylib`, this crate exports OpenVPN's v3 plugin entry
//! points. At open time it imports one Wasm module, reports which hooks the
//! module handles, and then forwards each event's environment to the
//! matching export, mapping its return value to success, error or deferred.

pub mod abi;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod logging;
pub mod module;
pub mod outcome;
pub mod runtime;
pub mod source;

pub use bridge::Bridge;
pub use config::{BridgeConfig, SourceMode};
pub use error::{BridgeError, ConfigError, InvokeError, LoadError};
pub use logging::{LogSink, Severity};
pub use outcome::{map, ReturnValue};
pub use source::{CachedSource, HandlerSource, PerCallSource};
pub use ovpn_hook_api::{Environment, Hook, HookMask, Outcome};
