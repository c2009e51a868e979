//! ovpn-hook-api: Shared types for the OpenVPN hook bridge
//!
//! This crate defines the protocol between the bridge (host) and a hook
//! module (guest, a Wasm plugin): the closed hook table, the three-valued
//! outcome and the MessagePack encoding of the event environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// API version for compatibility checking
///
/// A module may export `hook_api_version() -> i32`; when present it must
/// return this value.
pub const API_VERSION: u32 = 1;

/// Export name of the optional API version function
pub const EXPORT_API_VERSION: &str = "hook_api_version";

/// Export name of the guest allocator
pub const EXPORT_ALLOC: &str = "plugin_alloc";

/// Export name of the guest deallocator
pub const EXPORT_DEALLOC: &str = "plugin_dealloc";

/// Export name of the guest linear memory
pub const EXPORT_MEMORY: &str = "memory";

/// Key/value view of an OpenVPN event's environment
pub type Environment = BTreeMap<String, String>;

/// Event kinds the host signals, numbered as `OPENVPN_PLUGIN_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Hook {
    Up = 0,
    Down = 1,
    RouteUp = 2,
    IpChange = 3,
    TlsVerify = 4,
    AuthUserPassVerify = 5,
    ClientConnect = 6,
    ClientDisconnect = 7,
    LearnAddress = 8,
    ClientConnectV2 = 9,
    TlsFinal = 10,
    EnablePf = 11,
    RoutePredown = 12,
}

/// Hook table: every supported hook and the export name handling it
pub const HOOK_TABLE: [(Hook, &str); 13] = [
    (Hook::Up, "plugin_up"),
    (Hook::Down, "plugin_down"),
    (Hook::RouteUp, "plugin_route_up"),
    (Hook::IpChange, "plugin_ipchange"),
    (Hook::TlsVerify, "plugin_tls_verify"),
    (Hook::AuthUserPassVerify, "plugin_auth_user_pass_verify"),
    (Hook::ClientConnect, "plugin_client_connect"),
    (Hook::ClientDisconnect, "plugin_client_disconnect"),
    (Hook::LearnAddress, "plugin_learn_address"),
    (Hook::ClientConnectV2, "plugin_client_connect_v2"),
    (Hook::TlsFinal, "plugin_tls_final"),
    (Hook::EnablePf, "plugin_enable_pf"),
    (Hook::RoutePredown, "plugin_route_predown"),
];

impl Hook {
    /// All hooks in id order
    pub const ALL: [Hook; 13] = [
        Hook::Up,
        Hook::Down,
        Hook::RouteUp,
        Hook::IpChange,
        Hook::TlsVerify,
        Hook::AuthUserPassVerify,
        Hook::ClientConnect,
        Hook::ClientDisconnect,
        Hook::LearnAddress,
        Hook::ClientConnectV2,
        Hook::TlsFinal,
        Hook::EnablePf,
        Hook::RoutePredown,
    ];

    /// Map a host event id to a hook, `None` if outside the table
    pub fn from_id(id: i32) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx))
            .copied()
    }

    /// Map a handler export name back to its hook
    pub fn from_handler_name(name: &str) -> Option<Self> {
        HOOK_TABLE
            .iter()
            .find(|(_, handler)| *handler == name)
            .map(|(hook, _)| *hook)
    }

    /// The host event id
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Canonical export name of the handler for this hook
    pub fn handler_name(self) -> &'static str {
        HOOK_TABLE[self as usize].1
    }

    /// The bit this hook occupies in a [`HookMask`]
    pub fn mask_bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handler_name())
    }
}

/// Look up the handler name for a host event id
pub fn lookup(hook_id: i32) -> Option<&'static str> {
    Hook::from_id(hook_id).map(Hook::handler_name)
}

/// Set of hooks an instance services, laid out as OpenVPN's `type_mask`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HookMask(u32);

impl HookMask {
    /// Empty mask
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a hook
    pub fn insert(&mut self, hook: Hook) {
        self.0 |= hook.mask_bit();
    }

    /// Check whether a hook is in the mask
    pub fn contains(&self, hook: Hook) -> bool {
        self.0 & hook.mask_bit() != 0
    }

    /// Raw bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// True when no hook is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the hooks in the mask in id order
    pub fn iter(&self) -> impl Iterator<Item = Hook> + '_ {
        Hook::ALL.into_iter().filter(move |hook| self.contains(*hook))
    }
}

impl FromIterator<Hook> for HookMask {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for hook in iter {
            mask.insert(hook);
        }
        mask
    }
}

/// Result of a hook, as OpenVPN's `OPENVPN_PLUGIN_FUNC_*` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Outcome {
    Success = 0,
    Error = 1,
    Deferred = 2,
}

impl Outcome {
    /// Integer code returned to the host (and by guest handlers)
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Serialize an environment for the guest (MessagePack map)
pub fn encode_environment(env: &Environment) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(env)
}

/// Deserialize an environment received from the host
pub fn decode_environment(bytes: &[u8]) -> Result<Environment, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_table_is_exhaustive_and_ordered() {
        for (idx, (hook, name)) in HOOK_TABLE.iter().enumerate() {
            assert_eq!(hook.id(), idx as i32);
            assert_eq!(Hook::ALL[idx], *hook);
            assert_eq!(hook.handler_name(), *name);
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(0), Some("plugin_up"));
        assert_eq!(lookup(5), Some("plugin_auth_user_pass_verify"));
        assert_eq!(lookup(12), Some("plugin_route_predown"));
        assert_eq!(lookup(13), None);
        assert_eq!(lookup(-1), None);
        assert_eq!(Hook::from_handler_name("plugin_tls_final"), Some(Hook::TlsFinal));
        assert_eq!(Hook::from_handler_name("PLUGIN_UP"), None);
    }

    #[test]
    fn test_mask_bits_match_openvpn_layout() {
        let mask: HookMask = [Hook::Up, Hook::ClientConnect].into_iter().collect();
        assert_eq!(mask.bits(), (1 << 0) | (1 << 6));
        assert!(mask.contains(Hook::Up));
        assert!(!mask.contains(Hook::Down));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![Hook::Up, Hook::ClientConnect]);
        assert!(HookMask::empty().is_empty());
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::Success.code(), 0);
        assert_eq!(Outcome::Error.code(), 1);
        assert_eq!(Outcome::Deferred.code(), 2);
    }

    #[test]
    fn test_environment_serialization() {
        let mut env = Environment::new();
        env.insert("common_name".into(), "alice".into());
        env.insert("untrusted_ip".into(), "10.0.0.1".into());

        let bytes = encode_environment(&env).unwrap();
        let decoded = decode_environment(&bytes).unwrap();
        assert_eq!(decoded, env);
    }
}
