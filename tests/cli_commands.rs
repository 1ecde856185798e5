use std::time::Duration;

use clap::Parser;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

use gattwrap::{
    Args, AttributeHandle, BackendError, Command, DeviceAddress, ListenArgs, OutputFormat,
    ScanArgs,
};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl gattwrap::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: Args, output_format: OutputFormat) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let log_level = args.log_level();
    let (command, settings) = args.into_command_and_backend()?;
    gattwrap::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        &settings,
        log_level,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, OutputFormat::Json).await
}

#[tokio::test]
async fn scan_prints_fixture_devices_as_json() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattwrap",
        "--backend",
        "fake",
        "--fake-scan",
        "C4:7C:8D:6A:3E:01|Flower care;65:B8:8C:38:D5:77|-",
        "scan",
        "--duration",
        "1s",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    [
      {
        "address": "C4:7C:8D:6A:3E:01",
        "name": "Flower care"
      },
      {
        "address": "65:B8:8C:38:D5:77",
        "name": null
      }
    ]
    "#);
    Ok(())
}

#[tokio::test]
async fn scan_pretty_output_renders_a_table() -> anyhow::Result<()> {
    let args = Args::fake(Command::Scan(ScanArgs::new(Duration::from_secs(1))))
        .with_fake_scan("C4:7C:8D:6A:3E:01|Flower care".parse()?);

    let stdout = run_with_parsed_args(args, OutputFormat::Pretty).await?;

    assert!(stdout.contains("│ C4:7C:8D:6A:3E:01 │ Flower care │"));
    Ok(())
}

#[tokio::test]
async fn write_reports_confirmation() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "gattwrap",
        "--backend",
        "fake",
        "write",
        "c4:7c:8d:6a:3e:01",
        "0x33",
        "A01F",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {
      "address": "C4:7C:8D:6A:3E:01",
      "handle": "0x0033",
      "value": "A01F",
      "confirmed": true
    }
    "#);
    Ok(())
}

#[tokio::test]
async fn read_of_unknown_handle_fails_after_releasing_the_connection() {
    let result = run_with_argv([
        "gattwrap",
        "--backend",
        "fake",
        "read",
        "C4:7C:8D:6A:3E:01",
        "56",
    ])
    .await;

    let error = result.expect_err("fake peripheral has no value at 0x38");
    assert!(matches!(
        error.downcast_ref::<BackendError>(),
        Some(BackendError::Protocol(_))
    ));
}

#[tokio::test]
async fn listen_prints_each_notification() -> anyhow::Result<()> {
    let address: DeviceAddress = "C4:7C:8D:6A:3E:01".parse()?;
    let args = Args::fake(Command::Listen(ListenArgs::new(
        address,
        AttributeHandle::new(0x0F),
        Duration::from_secs(1),
    )))
    .with_fake_notifications("543D32372E33,543D32372E32".parse()?);

    let stdout = run_with_parsed_args(args, OutputFormat::Pretty).await?;

    assert_eq!(
        vec![
            "#1 0x000f 54 3D 32 37 2E 33",
            "#2 0x000f 54 3D 32 37 2E 32",
            "Received 2 notifications from C4:7C:8D:6A:3E:01",
        ],
        stdout.lines().collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn check_reports_fake_backend_as_available() -> anyhow::Result<()> {
    let stdout = run_with_parsed_args(Args::fake(Command::Check), OutputFormat::Json).await?;

    let statuses: serde_json::Value = serde_json::from_str(&stdout)?;
    let fake = statuses
        .as_array()
        .and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry["backend"] == "fake")
        })
        .cloned();
    assert_eq!(
        Some(serde_json::json!({ "backend": "fake", "available": true })),
        fake
    );
    Ok(())
}

#[tokio::test]
async fn fake_fixtures_with_real_backend_are_rejected() {
    let result = run_with_argv([
        "gattwrap",
        "--fake-notifications",
        "0100",
        "check",
    ])
    .await;

    let error = result.expect_err("fixtures need the fake backend");
    assert_eq!(
        "`--fake-scan` and `--fake-notifications` require `--backend fake`",
        error.to_string()
    );
}
