// ============================================================================
// UNIT TESTS MODULE
// Facade-level tests exercising Collab directly, without a running server.
// Per-module unit tests live beside the code they test in `#[cfg(test)]`
// blocks; this tree covers behavior that only shows up once the store,
// conflict resolution, and room manager are wired together.
// ============================================================================

#[path = "../common/mod.rs"]
pub mod common;
#[path = "../fixtures/mod.rs"]
pub mod fixtures;

mod scenario_tests;
