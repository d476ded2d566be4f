//! Common test utilities for integration tests

pub mod mock_server;
