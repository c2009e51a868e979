//! Auth Hook - A minimal hook module for the OpenVPN hook bridge
//!
//! Build with `cargo build --release --target wasm32-unknown-unknown` and
//! point the plugin at the resulting `auth_hook.wasm`:
//!
//! ```text
//! plugin /usr/lib/openvpn/libovpn_hook_bridge.so auth_hook path=/etc/openvpn/hooks
//! ```
//!
//! Handles:
//! - plugin_auth_user_pass_verify: static user list, `pending-*` users deferred
//! - plugin_client_connect: rejects clients without a common name
//! - plugin_learn_address: accepts every address change

use ovpn_hook_sdk::prelude::*;

const USERS: &[(&str, &str)] = &[("alice", "wonderland"), ("bob", "builder")];

struct AuthHook;

impl AuthHook {
    fn verify(env: &Environment) -> Outcome {
        let (Some(username), Some(password)) = (env.get("username"), env.get("password")) else {
            return Outcome::Error;
        };

        if username.starts_with("pending-") {
            // Answered later through the auth control file
            return Outcome::Deferred;
        }

        let known = USERS
            .iter()
            .any(|(user, pass)| user == username && pass == password);
        if known {
            Outcome::Success
        } else {
            Outcome::Error
        }
    }
}

impl HookPlugin for AuthHook {
    fn handle(hook: Hook, env: &Environment) -> Outcome {
        match hook {
            Hook::AuthUserPassVerify => Self::verify(env),
            Hook::ClientConnect => match env.get("common_name") {
                Some(cn) if !cn.is_empty() => Outcome::Success,
                _ => Outcome::Error,
            },
            Hook::LearnAddress => Outcome::Success,
            _ => Outcome::Error,
        }
    }
}

export_hooks!(AuthHook: plugin_auth_user_pass_verify, plugin_client_connect, plugin_learn_address);
