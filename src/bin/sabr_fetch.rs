// Copyright (c) 2026 contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thin CLI wrapper around `sabr_client::fetch`. Flags map directly onto
//! `FetchConfig` fields; see `--help`.

use std::path::PathBuf;
use std::process::ExitCode;

use sabr_client::FetchConfig;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn usage() -> &'static str {
    "usage: sabr-fetch --url <streaming-url> --itag <itag> --out <file> [options]

options:
  --url <url>               streaming URL from the player response (required)
  --itag <n>                 preferred audio itag (required)
  --out <path>                output file path (required)
  --lmt <n>                   last-modified-time disambiguator
  --po-token <base64>          poToken, base64 (URL-safe-no-pad or standard)
  --ustreamer-config <base64>   ustreamerConfig, base64
  --visitor-data <s>
  --client-name <n>            defaults to 67 (web music)
  --client-version <s>
  --user-agent <s>
  --hl <s>
  --gl <s>
  --cookie <s>
  --proxy <url>"
}

fn parse_args() -> Result<FetchConfig, String> {
    let mut url = None;
    let mut itag = None;
    let mut out = None;
    let mut config_extras: Vec<(String, String)> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("{flag} requires a value"));
        match flag.as_str() {
            "--url" => url = Some(value()?),
            "--itag" => {
                itag = Some(
                    value()?
                        .parse::<i32>()
                        .map_err(|e| format!("--itag: {e}"))?,
                )
            }
            "--out" => out = Some(value()?),
            "-h" | "--help" => return Err(usage().to_string()),
            other if other.starts_with("--") => {
                config_extras.push((other.trim_start_matches("--").to_string(), value()?))
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    let url = url.ok_or("--url is required")?;
    let itag = itag.ok_or("--itag is required")?;
    let out = out.ok_or("--out is required")?;

    let mut config = FetchConfig::new(url, itag, PathBuf::from(out));
    for (key, value) in config_extras {
        match key.as_str() {
            "lmt" => config.lmt = value.parse().map_err(|e| format!("--lmt: {e}"))?,
            "po-token" => config.po_token = Some(value),
            "ustreamer-config" => config.ustreamer_config = Some(value),
            "visitor-data" => config.visitor_data = Some(value),
            "client-name" => {
                config.client_name = value.parse().map_err(|e| format!("--client-name: {e}"))?
            }
            "client-version" => config.client_version = Some(value),
            "user-agent" => config.user_agent = Some(value),
            "hl" => config.hl = Some(value),
            "gl" => config.gl = Some(value),
            "cookie" => config.cookie = Some(value),
            "proxy" => config.proxy = Some(value),
            other => return Err(format!("unrecognized argument: --{other}")),
        }
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}\n\n{}", usage());
            return ExitCode::FAILURE;
        }
    };

    match sabr_client::fetch(config).await {
        Ok(outcome) => {
            tracing::info!(
                bytes_written = outcome.bytes_written,
                output_file = %outcome.output_file.display(),
                "fetch complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sabr-fetch: {e}");
            ExitCode::FAILURE
        }
    }
}
