//! OpenVPN plugin ABI (v3)
//!
//! Struct layouts and constants mirror `openvpn-plugin.h`. Only the fields
//! the bridge reads are typed; the rest are opaque pointers.
//!
//! No panic unwinds across these functions: every entry point catches it and
//! answers with `OPENVPN_PLUGIN_FUNC_ERROR` (or does nothing, for close).

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ConfigError};
use crate::logging::{self, LogSink, Severity};
use libc::{c_char, c_int, c_uint, c_void};
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

pub const OPENVPN_PLUGIN_FUNC_SUCCESS: c_int = 0;
pub const OPENVPN_PLUGIN_FUNC_ERROR: c_int = 1;
pub const OPENVPN_PLUGIN_FUNC_DEFERRED: c_int = 2;

pub const PLOG_ERR: c_int = 1 << 0;
pub const PLOG_WARN: c_int = 1 << 1;
pub const PLOG_NOTE: c_int = 1 << 2;
pub const PLOG_DEBUG: c_int = 1 << 3;

/// Plugin API version the bridge is written against
pub const OPENVPN_PLUGIN_VERSION_MIN: c_int = 3;

pub const PLUGIN_NAME: &CStr = c"ovpn-hook-bridge";

/// `plugin_log_t`
pub type PluginLog =
    unsafe extern "C" fn(flags: c_int, plugin_name: *const c_char, format: *const c_char, ...);

/// `struct openvpn_plugin_callbacks`
#[repr(C)]
pub struct PluginCallbacks {
    pub plugin_log: Option<PluginLog>,
    pub plugin_vlog: *const c_void,
    pub plugin_secure_memzero: *const c_void,
    pub plugin_base64_encode: *const c_void,
    pub plugin_base64_decode: *const c_void,
}

/// `struct openvpn_plugin_args_open_in`
#[repr(C)]
pub struct OpenArgsIn {
    pub type_mask: c_int,
    pub argv: *const *const c_char,
    pub envp: *const *const c_char,
    pub callbacks: *const PluginCallbacks,
    pub ssl_api: c_int,
    pub ovpn_version: *const c_char,
    pub ovpn_version_major: c_uint,
    pub ovpn_version_minor: c_uint,
    pub ovpn_version_patch: *const c_char,
}

/// `struct openvpn_plugin_args_open_return`
#[repr(C)]
pub struct OpenArgsReturn {
    pub type_mask: c_int,
    pub handle: *mut c_void,
    pub return_list: *mut *mut c_void,
}

/// `struct openvpn_plugin_args_func_in`
#[repr(C)]
pub struct FuncArgsIn {
    pub type_: c_int,
    pub argv: *const *const c_char,
    pub envp: *const *const c_char,
    pub handle: *mut c_void,
    pub per_client_context: *mut c_void,
    pub current_cert_depth: c_int,
    pub current_cert: *mut c_void,
}

/// `struct openvpn_plugin_args_func_return`
#[repr(C)]
pub struct FuncArgsReturn {
    pub return_list: *mut *mut c_void,
}

/// Initialize a plugin instance
///
/// # Safety
/// `args` and `ret` must be null or point to valid structs as passed by
/// OpenVPN; `argv` must be a null-terminated array of C strings.
#[no_mangle]
pub unsafe extern "C" fn openvpn_plugin_open_v3(
    version: c_int,
    args: *const OpenArgsIn,
    ret: *mut OpenArgsReturn,
) -> c_int {
    let (Some(args), Some(ret)) = (args.as_ref(), ret.as_mut()) else {
        return OPENVPN_PLUGIN_FUNC_ERROR;
    };
    ret.type_mask = 0;
    ret.handle = ptr::null_mut();

    let opened = panic::catch_unwind(AssertUnwindSafe(|| open(version, args)));
    match opened {
        Ok(Ok(bridge)) => {
            ret.type_mask = bridge.mask().bits() as c_int;
            ret.handle = Box::into_raw(Box::new(bridge)).cast();
            OPENVPN_PLUGIN_FUNC_SUCCESS
        }
        _ => OPENVPN_PLUGIN_FUNC_ERROR,
    }
}

/// Dispatch one hook event
///
/// # Safety
/// `args` must be null or valid, with `handle` either null or a value
/// returned by [`openvpn_plugin_open_v3`] and not yet closed.
#[no_mangle]
pub unsafe extern "C" fn openvpn_plugin_func_v3(
    _version: c_int,
    args: *const FuncArgsIn,
    _ret: *mut FuncArgsReturn,
) -> c_int {
    let Some(args) = args.as_ref() else {
        return OPENVPN_PLUGIN_FUNC_ERROR;
    };
    let Some(bridge) = args.handle.cast::<Bridge>().as_ref() else {
        return OPENVPN_PLUGIN_FUNC_ERROR;
    };

    panic::catch_unwind(AssertUnwindSafe(|| {
        bridge.in_scope(|| {
            let entries = string_array_lossy(args.envp);
            bridge.dispatch(args.type_, &entries)
        })
    }))
    .map(|outcome| outcome.code())
        .unwrap_or(OPENVPN_PLUGIN_FUNC_ERROR)
}

/// Shut a plugin instance down
///
/// # Safety
/// `handle` must be null or a value returned by [`openvpn_plugin_open_v3`],
/// closed at most once.
#[no_mangle]
pub unsafe extern "C" fn openvpn_plugin_close_v1(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    let bridge = Box::from_raw(handle.cast::<Bridge>());
    let _ = panic::catch_unwind(AssertUnwindSafe(move || bridge.shutdown()));
}

/// Minimum plugin API version the host must offer
#[no_mangle]
pub extern "C" fn openvpn_plugin_min_version_required_v1() -> c_int {
    OPENVPN_PLUGIN_VERSION_MIN
}

unsafe fn open(version: c_int, args: &OpenArgsIn) -> Result<Bridge, BridgeError> {
    start(version, string_array(args.argv), host_sink(args.callbacks))
}

fn start(
    version: c_int,
    argv: Result<Vec<String>, ConfigError>,
    sink: Option<LogSink>,
) -> Result<Bridge, BridgeError> {
    // Configuration problems are logged before the instance's own filter exists.
    let bootstrap = logging::dispatch(sink.clone(), "debug")?;
    let config = tracing::dispatcher::with_default(&bootstrap, || {
        tracing::debug!(version, "openvpn_plugin_open_v3");
        argv.and_then(|argv| BridgeConfig::from_args(argv.as_slice()))
            .inspect_err(|e| tracing::error!("Invalid plugin configuration: {}", e))
    })?;

    Bridge::initialize(config, sink)
}

/// Wrap OpenVPN's `plugin_log` callback as a sink
unsafe fn host_sink(callbacks: *const PluginCallbacks) -> Option<LogSink> {
    let log = callbacks.as_ref()?.plugin_log?;
    Some(Arc::new(move |severity: Severity, line: &str| {
        let flags = match severity {
            Severity::Error => PLOG_ERR,
            Severity::Warn => PLOG_WARN,
            Severity::Note => PLOG_NOTE,
            Severity::Debug => PLOG_DEBUG,
        };
        let line = CString::new(line.replace('\0', "\\0")).unwrap_or_default();
        unsafe { log(flags, PLUGIN_NAME.as_ptr(), c"%s".as_ptr(), line.as_ptr()) };
    }))
}

/// Collect a null-terminated C string array, rejecting invalid UTF-8
unsafe fn string_array(array: *const *const c_char) -> Result<Vec<String>, ConfigError> {
    raw_strings(array)
        .map(|s| s.to_str().map(str::to_string).map_err(|_| ConfigError::InvalidUtf8))
        .collect()
}

/// Collect a null-terminated C string array, replacing invalid UTF-8
unsafe fn string_array_lossy(array: *const *const c_char) -> Vec<String> {
    raw_strings(array)
        .enumerate()
        .map(|(index, s)| match s.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => {
                tracing::warn!(index, "Environment entry is not valid UTF-8, bytes replaced");
                s.to_string_lossy().into_owned()
            }
        })
        .collect()
}

unsafe fn raw_strings<'a>(array: *const *const c_char) -> impl Iterator<Item = &'a CStr> {
    let mut cursor = array;
    std::iter::from_fn(move || {
        if cursor.is_null() {
            return None;
        }
        let item = unsafe { *cursor };
        if item.is_null() {
            return None;
        }
        cursor = unsafe { cursor.add(1) };
        Some(unsafe { CStr::from_ptr(item) })
    })
}
