use std::path::Path;
use std::process::ExitCode;

use gemini_adapter::config::{load_config, parse_config, AdapterConfig};
use gemini_adapter::observability::init_tracing;
use gemini_adapter::protocol::canonical::{CanonicalRequest, CanonicalStreamEvent};
use gemini_adapter::protocol::gemini::encoder::encode_gemini_request;
use gemini_adapter::protocol::gemini::response_decoder::decode_gemini_response;
use gemini_adapter::protocol::gemini::GeminiResponse;
use gemini_adapter::stream::{spawn_gemini_stream, StreamHandle, StreamOptions};
use gemini_adapter::{CanonicalError, GeminiClient};

const CONFIG_PATH: &str = "config.yaml";
const DEFAULT_REPLAY_MODEL: &str = "gemini-replay";

const USAGE: &str = "\
usage: gemini-adapter <command> [args]

commands:
  encode <canonical.json>            print the Gemini request body
  decode <vendor.json> [model]       print the canonical response
  replay <capture.sse> [model]       run the stream translator over a capture
  generate <canonical.json>          call generateContent and print the result
  stream <canonical.json>            call streamGenerateContent and print events";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let config = match load_adapter_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Failed to load configuration: {message}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.features.log_level, config.features.json_logs);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(command, &args[1..], &config));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage) => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
        Err(CliError::Failed(message)) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

enum CliError {
    Usage,
    Failed(String),
}

impl From<CanonicalError> for CliError {
    fn from(err: CanonicalError) -> Self {
        CliError::Failed(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Failed(format!("invalid JSON: {err}"))
    }
}

fn load_adapter_config() -> Result<AdapterConfig, String> {
    if Path::new(CONFIG_PATH).exists() {
        load_config(CONFIG_PATH).map_err(|e| e.to_string())
    } else {
        parse_config("").map_err(|e| e.to_string())
    }
}

async fn run(command: &str, args: &[String], config: &AdapterConfig) -> Result<(), CliError> {
    let path = args.first().ok_or(CliError::Usage)?;
    let model_arg = args.get(1).map(String::as_str);
    let options = config.convert_options();

    match command {
        "encode" => {
            let request: CanonicalRequest = serde_json::from_slice(&std::fs::read(path)?)?;
            let body = encode_gemini_request(&request, &options)?;
            print_json(&body)
        }
        "decode" => {
            let vendor: GeminiResponse = serde_json::from_slice(&std::fs::read(path)?)?;
            let response = decode_gemini_response(&vendor, model_arg.unwrap_or_default(), &options);
            print_json(&response)
        }
        "replay" => {
            let capture = std::fs::read_to_string(path)?;
            let lines: Vec<Result<String, CanonicalError>> =
                capture.lines().map(|line| Ok(line.to_string())).collect();
            let stream_options = StreamOptions::new(model_arg.unwrap_or(DEFAULT_REPLAY_MODEL))
                .with_convert_options(options)
                .with_channel_capacity(config.stream.channel_capacity);
            let handle = spawn_gemini_stream(futures_util::stream::iter(lines), stream_options, None);
            print_events(handle).await
        }
        "generate" => {
            let request: CanonicalRequest = serde_json::from_slice(&std::fs::read(path)?)?;
            let client = GeminiClient::from_config(config)?;
            let response = client.generate(&request).await?;
            print_json(&response)
        }
        "stream" => {
            let request: CanonicalRequest = serde_json::from_slice(&std::fs::read(path)?)?;
            let client = GeminiClient::from_config(config)?;
            let handle = client.stream(&request, None, None).await?;
            print_events(handle).await
        }
        _ => Err(CliError::Usage),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_events(mut handle: StreamHandle) -> Result<(), CliError> {
    while let Some(event) = handle.next_event().await {
        print_event(&event)?;
    }
    let (_, summary) = handle.finish().await?;
    if summary.terminal.is_none() {
        return Err(CliError::Failed("stream ended without a terminal event".into()));
    }
    Ok(())
}

fn print_event(event: &CanonicalStreamEvent) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
