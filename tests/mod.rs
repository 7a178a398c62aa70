//! Test suite for XFCollab
//!
//! This module organizes all tests

pub mod common;
pub mod integration;
pub mod property;
