//! `cargo run --example getip -- [--ipv4|-4] [--ipv6|-6] [--https|-h] [--timeout|-t <ms>]`

use std::env;
use std::process::ExitCode;

use getip::{Options, Version};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

const USAGE: &str = "\
Usage
  $ getip
Options
  --ipv4, -4          Return the IPv4 address (default)
  --ipv6, -6          Return the IPv6 address
  --https, -h         Use HTTPS instead of DNS
  --timeout=<ms>, -t  Timeout in milliseconds (default: 5000)";

fn parse_args() -> Result<(Version, Options), String> {
    let mut version = Version::V4;
    let mut options = Options::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_owned(), Some(value.to_owned())),
            None => (arg, None),
        };
        match flag.as_str() {
            "--ipv4" | "-4" => version = Version::V4,
            "--ipv6" | "-6" => version = Version::V6,
            "--https" | "-h" => options = options.with_https_only(true),
            "--timeout" | "-t" => {
                let value = inline
                    .or_else(|| args.next())
                    .ok_or("--timeout needs a value")?;
                let millis = value
                    .parse()
                    .map_err(|_| format!("invalid timeout: {value}"))?;
                options = options.with_timeout_ms(millis);
            }
            "--help" => return Err(USAGE.to_owned()),
            other => return Err(format!("unknown option: {other}\n\n{USAGE}")),
        }
    }
    Ok((version, options))
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (version, options) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut lookup = getip::resolve(version, options);
    let result = tokio::select! {
        result = &mut lookup => result,
        _ = tokio::signal::ctrl_c() => {
            lookup.cancel();
            return ExitCode::from(130);
        }
    };

    match result {
        Ok((addr, _)) => {
            println!("{addr}");
            ExitCode::SUCCESS
        }
        Err(err) if err.is_cancelled() => ExitCode::from(130),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
