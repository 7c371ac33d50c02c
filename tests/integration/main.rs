//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises the session against the scripted controller
//! in `mock_link`.  Everything runs on the host with no radio.

mod request_tests;
mod session_tests;
