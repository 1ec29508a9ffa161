//! Integration test binary: end-to-end runs over deterministic fixtures.

mod mock_gateway;
mod simulation;
