//! Precompiled package tests
//!
//! These tests verify:
//! - Pack/unpack of containers with every field populated
//! - Bounds safety on truncated and mutated buffers
//! - Redundant marker checks
//! - Directory search and file extraction
