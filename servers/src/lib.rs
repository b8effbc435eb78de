//! Shared logic of the relay binaries, exposed as a library so that the
//! integration tests can drive the same router the server runs.

pub mod relay_logic;
