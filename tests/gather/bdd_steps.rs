//! BDD step definitions for the bootstrap gather pipeline.

use bootstrap_gather::test_support::{instance_view, read_bundle, virtual_machine};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    GatherContext, GatherResult, SERIAL_URI, STORAGE_KEY, failure_kind,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to build the orchestrator: {0}")]
    Setup(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a bootstrap host that completes the diagnostic script")]
fn host_completes(gather_context: GatherContext) -> GatherContext {
    // connect, run, pull
    gather_context.runner.push_success();
    gather_context.runner.push_success();
    gather_context.runner.push_success();
    gather_context.seed_host_bundle();
    gather_context
}

#[given("a bootstrap host that refuses connections")]
fn host_refuses(gather_context: GatherContext) -> GatherContext {
    gather_context.runner.push_connection_refused();
    gather_context
}

#[given("the Azure inventory lists a bootstrap machine with a serial console log")]
fn azure_inventory(gather_context: GatherContext) -> GatherContext {
    let api = &gather_context.api;
    api.push_page(vec![
        virtual_machine("bootstrap", true),
        virtual_machine("worker-0", false),
    ]);
    api.set_instance_view("bootstrap", instance_view(None, Some(SERIAL_URI)));
    api.add_account("sabootstrap", &[STORAGE_KEY]);
    api.add_blob(SERIAL_URI, Some(STORAGE_KEY), b"console output");
    gather_context
}

#[given("the platform has no gather backend")]
fn no_backend(mut gather_context: GatherContext) -> GatherContext {
    gather_context.with_backend = false;
    gather_context
}

#[given("only a bootstrap host is supplied")]
fn bootstrap_only(mut gather_context: GatherContext) -> GatherContext {
    gather_context.request.masters.clear();
    gather_context
}

#[when("I gather the bootstrap logs")]
fn gather_logs(gather_context: GatherContext) -> Result<GatherContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Setup(err.to_string()))?;
    let orchestrator = gather_context
        .orchestrator()
        .map_err(|err| StepError::Setup(err.to_string()))?;

    let request = gather_context.request.clone();
    let result = runtime.block_on(async move { orchestrator.gather_bootstrap(&request).await });
    let outcome = match result {
        Ok(outcome) => GatherResult::Success(outcome),
        Err(err) => GatherResult::Failure {
            kind: failure_kind(&err).to_owned(),
            message: err.to_string(),
        },
    };

    Ok(GatherContext {
        result: Some(outcome),
        ..gather_context
    })
}

fn combined_entries(gather_context: &GatherContext) -> Result<Vec<String>, StepError> {
    let Some(GatherResult::Success(outcome)) = &gather_context.result else {
        return Err(StepError::Assertion(String::from(
            "expected a successful gather",
        )));
    };
    let entries = read_bundle(&outcome.combined_bundle)
        .map_err(|err| StepError::Assertion(format!("read combined bundle: {err}")))?;
    Ok(entries.into_iter().map(|(name, _)| name).collect())
}

#[then("the gather succeeds")]
fn gather_succeeds(gather_context: &GatherContext) -> Result<(), StepError> {
    match &gather_context.result {
        Some(GatherResult::Success(_)) => Ok(()),
        Some(GatherResult::Failure { message, .. }) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the gather fails with a \"{kind}\" error")]
fn gather_fails(gather_context: &GatherContext, kind: String) -> Result<(), StepError> {
    match &gather_context.result {
        Some(GatherResult::Failure { kind: actual, .. }) if *actual == kind => Ok(()),
        Some(GatherResult::Failure { kind: actual, message }) => Err(StepError::Assertion(
            format!("expected a {kind} failure, got {actual}: {message}"),
        )),
        Some(GatherResult::Success(_)) => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the combined bundle contains \"{entry}\"")]
fn combined_contains(gather_context: &GatherContext, entry: String) -> Result<(), StepError> {
    let names = combined_entries(gather_context)?;
    if names.contains(&entry) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "combined bundle lacks {entry}: {names:?}"
        )))
    }
}

#[then("the combined bundle matches the host bundle")]
fn combined_matches_host(gather_context: &GatherContext) -> Result<(), StepError> {
    let combined = combined_entries(gather_context)?;
    let host: Vec<String> = read_bundle(&gather_context.host_bundle())
        .map_err(|err| StepError::Assertion(format!("read host bundle: {err}")))?
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    if combined == host {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {host:?}, got {combined:?}"
        )))
    }
}

#[then("a serial bundle is left in the install directory")]
fn serial_bundle_left(gather_context: &GatherContext) -> Result<(), StepError> {
    let path = gather_context.serial_bundle();
    if path.is_file() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("missing serial bundle {path}")))
    }
}

#[then("no command is run on the bootstrap host")]
fn no_commands(gather_context: &GatherContext) -> Result<(), StepError> {
    let invocations = gather_context.runner.invocations();
    if invocations.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no commands, got {invocations:?}"
        )))
    }
}

#[then("the temporary bootstrap key is removed")]
fn key_removed(gather_context: &GatherContext) -> Result<(), StepError> {
    let keys = gather_context.offered_keys();
    if keys.is_empty() {
        return Err(StepError::Assertion(String::from(
            "no key was offered to ssh",
        )));
    }
    match keys.iter().find(|key| key.exists()) {
        Some(left) => Err(StepError::Assertion(format!("key {left} still exists"))),
        None => Ok(()),
    }
}
