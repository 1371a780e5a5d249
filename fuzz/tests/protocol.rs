//! Bolero fuzzer for the worker protocol gate and the session lifecycle.
//!
//! Properties tested:
//! - A handshake with the right view and id must come first, exactly once
//! - `exec` is compute-only and admitted once; `flush`/`shutdown` are relay-only
//! - Session states only move forward and never leave `Completed`

use bolero::check;
use proofwire_core::Role;
use proofwire_fuzz::protocol_model::{execute_and_verify, state_from_raw, verify_lifecycle, MsgOp};

fn main() {
    check!()
        .with_type::<(bool, Vec<u8>, Vec<u8>)>()
        .for_each(|(is_relay, msg_tags, state_tags)| {
            let role = if *is_relay { Role::Relay } else { Role::Compute };
            let ops: Vec<MsgOp> = msg_tags.iter().map(|t| MsgOp::from_raw(*t)).collect();
            if let Err(e) = execute_and_verify(role, &ops) {
                panic!("Gate diverged: {}", e);
            }

            let targets: Vec<_> = state_tags.iter().map(|t| state_from_raw(*t)).collect();
            if let Err(e) = verify_lifecycle(&targets) {
                panic!("Lifecycle diverged: {}", e);
            }
        });
}
