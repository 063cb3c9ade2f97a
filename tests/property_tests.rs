//! Property-based tests for the dispatch core.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that the
//! queue and limiter invariants hold across all interleavings.

mod property;
