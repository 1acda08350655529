//! Binary entry point for the kiln CLI.

use std::fmt::Display;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kiln::{
    Clock, DescriptorError, HttpResourceApi, KilnConfig, PreparedResources, ProvisioningSession,
    ResourceApi, ResourceDescriptor, TeardownError,
};

mod cli;

use cli::{Cli, PrepareCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("provisioning failed: {0}")]
    Provision(String),
    #[error("{0}")]
    Teardown(#[from] TeardownError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Prepare(command) => prepare_command(command).await,
    }
}

async fn prepare_command(args: PrepareCommand) -> Result<(), CliError> {
    let config =
        KilnConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let environment = load_descriptor(
        args.environment_name.as_deref(),
        args.environment_spec.as_deref(),
    )?;
    let compute_template =
        load_descriptor(args.compute_name.as_deref(), args.compute_spec.as_deref())?;

    let api =
        HttpResourceApi::from_config(&config).map_err(|err| CliError::Backend(err.to_string()))?;
    let timeout = args
        .timeout
        .map_or_else(|| config.build_timeout(), Duration::from_secs);
    let mut session = ProvisioningSession::new(
        api,
        config.session_settings(),
        environment,
        compute_template,
    );

    run_session(&mut session, timeout, args.teardown, &mut io::stdout().lock()).await
}

fn load_descriptor(
    name: Option<&str>,
    spec_path: Option<&str>,
) -> Result<ResourceDescriptor, CliError> {
    match (name, spec_path) {
        (Some(resource_name), Some(path)) => Ok(ResourceDescriptor::from_json_file(
            resource_name,
            Utf8Path::new(path),
        )?),
        _ => Ok(ResourceDescriptor::inactive()),
    }
}

async fn run_session<A, C>(
    session: &mut ProvisioningSession<A, C>,
    timeout: Duration,
    teardown: bool,
    out: &mut impl Write,
) -> Result<(), CliError>
where
    A: ResourceApi,
    C: Clock,
{
    match session.prepare(timeout).await {
        Ok(prepared) => {
            write_prepared(out, &prepared)?;
            if teardown {
                let summary = session.teardown().await?;
                info!(deleted = summary.deleted.len(), "teardown complete");
            }
            Ok(())
        }
        Err(err) => {
            let teardown_error = if teardown {
                session.teardown().await.err()
            } else {
                None
            };
            Err(CliError::Provision(append_teardown_note(
                err.to_string(),
                teardown_error.as_ref(),
            )))
        }
    }
}

fn write_prepared(out: &mut impl Write, prepared: &PreparedResources) -> Result<(), CliError> {
    let fields = [
        ("compute_template_id", prepared.compute_template_id.as_deref()),
        ("environment_id", prepared.environment_id.as_deref()),
        ("build_id", prepared.build_id.as_deref()),
    ];
    for (key, value) in fields {
        if let Some(id) = value {
            writeln!(out, "{key}={id}").map_err(|err| CliError::Output(err.to_string()))?;
        }
    }
    Ok(())
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln::test_support::{ApiCall, ManualClock, ScriptedApi, build_at};
    use kiln::{BuildStatus, SessionSettings, TeardownTarget};
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn api() -> ScriptedApi {
        ScriptedApi::new()
    }

    fn session(api: &ScriptedApi) -> ProvisioningSession<ScriptedApi, ManualClock> {
        ProvisioningSession::with_clock(
            api.clone(),
            ManualClock::new(),
            SessionSettings::new("prj"),
            ResourceDescriptor::new("release-env", json!({"image": "py311"})),
            ResourceDescriptor::new("gpu-small", json!({"head": "m5.large"})),
        )
    }

    fn output(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).expect("utf8")
    }

    #[rstest]
    #[tokio::test]
    async fn run_session_prints_resolved_ids(api: ScriptedApi) {
        api.set_builds(vec![build_at("b1", BuildStatus::Succeeded, 1)]);
        let mut buffer = Vec::new();

        run_session(&mut session(&api), Duration::from_secs(5), false, &mut buffer)
            .await
            .expect("prepare succeeds");

        assert_eq!(
            output(buffer),
            "compute_template_id=cpt-created\nenvironment_id=env-created\nbuild_id=b1\n"
        );
        assert_eq!(
            api.count_calls(|call| matches!(call, ApiCall::Delete(..))),
            0
        );
    }

    #[rstest]
    #[tokio::test]
    async fn run_session_tears_down_when_requested(api: ScriptedApi) {
        api.set_builds(vec![build_at("b1", BuildStatus::Succeeded, 1)]);
        let mut buffer = Vec::new();
        let mut prepared = session(&api);

        run_session(&mut prepared, Duration::from_secs(5), true, &mut buffer)
            .await
            .expect("prepare and teardown succeed");

        assert!(output(buffer).contains("build_id=b1"));
        assert_eq!(prepared.environment_id(), None);
        assert_eq!(
            api.count_calls(|call| matches!(call, ApiCall::Delete(..))),
            3
        );
    }

    #[rstest]
    #[tokio::test]
    async fn failed_prepare_reports_teardown_failure(api: ScriptedApi) {
        api.fail_delete(TeardownTarget::Environment);
        let mut buffer = Vec::new();

        let err = run_session(&mut session(&api), Duration::from_secs(5), true, &mut buffer)
            .await
            .expect_err("missing build must fail");

        let message = err.to_string();
        assert!(message.starts_with("provisioning failed"), "{message}");
        assert!(message.contains("no build found"), "{message}");
        assert!(message.contains("teardown also failed"), "{message}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn append_teardown_note_keeps_message_without_error() {
        assert_eq!(
            append_teardown_note::<String>(String::from("boom"), None),
            "boom"
        );
    }

    #[test]
    fn load_descriptor_without_spec_is_inactive() {
        let descriptor = load_descriptor(Some("env"), None).expect("no file to read");
        assert!(!descriptor.is_active());
    }

    #[test]
    fn load_descriptor_reports_missing_file() {
        let err = load_descriptor(Some("env"), Some("/nonexistent/kiln/env.json"))
            .expect_err("missing file must fail");
        assert!(matches!(err, CliError::Descriptor(_)), "unexpected: {err}");
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Config(String::from("missing API token")));
        let rendered = output(buf);
        assert!(
            rendered.contains("configuration error: missing API token"),
            "rendered: {rendered}"
        );
    }
}
