//! End-to-end mesh scenarios over the in-process transport.
//!
//! These tests stand up real nodes with real packet traffic; only the
//! transport is swapped for the deterministic in-memory registry.

pub mod test_utils;

#[cfg(test)]
mod mesh_formation_tests;

#[cfg(test)]
mod multi_hop_tests;
