//! The conversion client.
//!
//! Connects to a running scribad, negotiates the version, and submits a
//! conversion or comparison. `-` as an input means stdin, as the output
//! means stdout; exit codes distinguish the failure classes for shell
//! use.

use clap::Parser;
use scriba_core::rpc::{CompareRequest, ConversionRequest, ServiceClient};
use scriba_core::transport::Locator;
use scriba_core::{Result, ScribaError};
use scriba_rpc::cli::{ClientArgs, ClientCommand, CompareArgs, ConvertArgs, STDIO_SENTINEL};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    if let Err(e) = run(args).await {
        eprintln!("scriba: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(args: ClientArgs) -> Result<()> {
    let client = ServiceClient::connect(
        &args.host,
        args.port,
        args.retries,
        Duration::from_secs(args.retry_interval),
    )
    .await?;

    match args.command {
        ClientCommand::Convert(convert) => {
            run_convert(&client, convert, args.host_location).await
        }
        ClientCommand::Compare(compare) => {
            run_compare(&client, compare, args.host_location).await
        }
    }
}

async fn run_convert(
    client: &ServiceClient,
    args: ConvertArgs,
    host_location: scriba_core::HostLocation,
) -> Result<()> {
    let mut request = ConversionRequest::new(input_locator(&args.infile)?);
    request.output_path = output_path(&args.outfile);
    request.convert_to = args.convert_to;
    request.input_filter = args.input_filter;
    request.output_filter = args.output_filter;
    request.filter_options = args.filter_options;
    request.update_index = !args.dont_update_index;
    request.host_location = host_location;

    let bytes = client.submit_conversion(&request).await?;
    emit(bytes)
}

async fn run_compare(
    client: &ServiceClient,
    args: CompareArgs,
    host_location: scriba_core::HostLocation,
) -> Result<()> {
    if args.oldfile == STDIO_SENTINEL && args.newfile == STDIO_SENTINEL {
        return Err(ScribaError::InvalidRequest {
            message: "Only one of the compared files can come from stdin".to_string(),
        });
    }

    let request = CompareRequest {
        old: input_locator(&args.oldfile)?,
        new: input_locator(&args.newfile)?,
        output_path: output_path(&args.outfile),
        file_type: args.file_type,
        host_location,
    };

    let bytes = client.submit_comparison(&request).await?;
    emit(bytes)
}

fn input_locator(arg: &str) -> Result<Locator> {
    if arg == STDIO_SENTINEL {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .map_err(ScribaError::from)?;
        Ok(Locator::Bytes(data))
    } else {
        Ok(Locator::Path(PathBuf::from(arg)))
    }
}

fn output_path(arg: &str) -> Option<PathBuf> {
    (arg != STDIO_SENTINEL).then(|| PathBuf::from(arg))
}

/// Write returned bytes to stdout; `None` means the output file is
/// already in place.
fn emit(bytes: Option<Vec<u8>>) -> Result<()> {
    if let Some(data) = bytes {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&data).map_err(ScribaError::from)?;
        stdout.flush().map_err(ScribaError::from)?;
    }
    Ok(())
}
