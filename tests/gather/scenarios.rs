//! BDD scenarios for the bootstrap gather pipeline.

use rstest_bdd_macros::scenario;

use super::test_helpers::{GatherContext, gather_context};

#[scenario(
    path = "tests/features/gather.feature",
    name = "Merge console logs and host logs"
)]
fn scenario_merge_bundles(gather_context: GatherContext) {
    drop(gather_context);
}

#[scenario(
    path = "tests/features/gather.feature",
    name = "Gather console logs when the bootstrap host is unreachable"
)]
fn scenario_unreachable_host(gather_context: GatherContext) {
    drop(gather_context);
}

#[scenario(
    path = "tests/features/gather.feature",
    name = "Fall back to the host bundle without a platform backend"
)]
fn scenario_no_backend(gather_context: GatherContext) {
    drop(gather_context);
}

#[scenario(
    path = "tests/features/gather.feature",
    name = "Reject a bootstrap host without control-plane hosts"
)]
fn scenario_partial_input(gather_context: GatherContext) {
    drop(gather_context);
}
