//! Hook dispatch
//!
//! Routes one host event to its handler and turns whatever happens into
//! exactly one [`Outcome`]. Nothing here can fail the instance.

use crate::env::marshal;
use crate::outcome::{map, Outcome};
use crate::source::HandlerSource;
use ovpn_hook_api::Hook;

/// Dispatch a host event
///
/// Unknown and unsupported hooks return `Error` without invoking anything.
/// A failing handler is logged and returns `Error`.
pub fn dispatch<S, E>(source: &S, hook_id: i32, entries: &[E]) -> Outcome
where
    S: HandlerSource + ?Sized,
    E: AsRef<str>,
{
    let Some(hook) = Hook::from_id(hook_id) else {
        tracing::debug!(hook_id, "Event kind outside the hook table");
        return Outcome::Error;
    };
    if !source.mask().contains(hook) {
        tracing::debug!(hook = %hook, "No handler bound for hook");
        return Outcome::Error;
    }

    let env = marshal(entries);

    match source.invoke(hook, &env) {
        Ok(value) => {
            let outcome = map(value);
            tracing::debug!(hook = %hook, ?value, ?outcome, "Result of call");
            outcome
        }
        Err(e) => {
            tracing::error!(hook = %hook, error = %e, "Call failed");
            Outcome::Error
        }
    }
}
