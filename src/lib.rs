//! Workspace root package.
//!
//! Carries repository-level tooling (cargo-husky git hooks); all protocol
//! functionality lives in the `crates/*` members.
