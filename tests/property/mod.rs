//! Property-based tests

pub mod batching_proptest;
