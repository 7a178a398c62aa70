//! Engine-level tests driven through transport messages, plus the REST
//! client and configuration loading against real I/O

pub mod engine_test;
pub mod rejection_test;
pub mod resync_test;
pub mod rest_client_test;
