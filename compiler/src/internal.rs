//! Internal-consistency failure channel
//!
//! The CFG and lowering passes run on MIL that has already been scope-checked
//! and type-checked, so no user-facing diagnostics originate here. The only
//! failures this subsystem can produce are violated internal invariants (a
//! tail-only label acquiring a second predecessor, a successor list read
//! before discovery, a global looked up before its initializer ran). Those
//! are fatal to the compilation run and are reported through this channel,
//! never through the ordinary diagnostic path.

/// Report a violated internal invariant and abort the compilation run.
///
/// Accepts `format!`-style arguments. The message is logged at error level
/// under the `milc::internal` target before the panic so it survives in
/// captured logs even when the panic message itself is swallowed.
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!(target: "milc::internal", "{}", msg);
        panic!("internal error: {}", msg)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "internal error: node 7 is missing")]
    fn test_internal_error_panics_with_prefix() {
        crate::logging::init_test();
        internal_error!("node {} is missing", 7);
    }
}
