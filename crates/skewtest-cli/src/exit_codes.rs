//! Process exit codes. Part of the public contract: scripts driving the
//! matrix distinguish a failing test command from a broken harness.

pub const SUCCESS: i32 = 0;
pub const COMMAND_FAILED: i32 = 1; // Wrapped command exited nonzero or was killed
pub const INTERNAL_ERROR: i32 = 2; // Spawn, log/state I/O, missing shim or config error
pub const PROVISION_FAILED: i32 = 3; // Shim fetch/build/self-test/install failed
