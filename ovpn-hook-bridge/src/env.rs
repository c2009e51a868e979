//! Environment marshalling
//!
//! OpenVPN describes every event as a list of `NAME=VALUE` strings. Handlers
//! receive them as a single map.

pub use ovpn_hook_api::Environment;

/// Build the environment mapping for one dispatch
///
/// Entries are split on the first `=`. Entries without one are logged and
/// skipped. A repeated name keeps the last value.
pub fn marshal<E: AsRef<str>>(entries: &[E]) -> Environment {
    let mut env = Environment::new();
    for entry in entries {
        let entry = entry.as_ref();
        match entry.split_once('=') {
            Some((name, value)) => {
                env.insert(name.to_string(), value.to_string());
            }
            None => {
                tracing::error!(entry, "Environment variable parse error, '=' not found");
            }
        }
    }
    env
}
