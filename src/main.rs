// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use clap::Parser;
use s3pipe::{
    core::sizing::{MemoryBudget, PartSizing, MIB},
    ClientOptions, ObjectTarget, UploadOptions, Uploader,
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "s3pipe",
    version,
    about = "Stream stdin to S3 through a memory-bounded multipart upload",
    after_help = "\
Credentials and region come from the standard AWS environment
(AWS_ACCESS_KEY_ID, AWS_PROFILE, AWS_REGION, ...).

Example:
  tar c /data | s3pipe --size $(du -sb /data | cut -f1) s3://backups/data.tar"
)]
struct Cli {
    /// Destination, as s3://bucket/key
    #[arg(value_name = "S3_URI", value_parser = ObjectTarget::parse)]
    target: ObjectTarget,

    /// Exact number of bytes that will arrive on stdin
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    size: u64,

    /// Part size in MiB (min 5), ignored with --auto-part-size
    #[arg(
        long,
        value_name = "MB",
        default_value_t = 64,
        env = "S3PIPE_PART_SIZE",
        value_parser = clap::value_parser!(u64).range(5..=5120)
    )]
    part_size: u64,

    /// Derive the part size from available memory, overriding --part-size
    #[arg(long)]
    auto_part_size: bool,

    /// Memory budget in MiB for --auto-part-size, instead of what the host reports
    #[arg(long, value_name = "MB", requires = "auto_part_size")]
    memory_limit: Option<u64>,

    /// Parts uploaded at once
    #[arg(
        long,
        default_value_t = 1,
        env = "S3PIPE_CONCURRENCY",
        value_parser = clap::value_parser!(u64).range(1..=64)
    )]
    concurrency: u64,

    /// Custom S3-compatible endpoint URL
    #[arg(long, env = "S3PIPE_ENDPOINT")]
    endpoint: Option<String>,

    /// Use the dual-stack (IPv4 and IPv6) endpoint
    #[arg(long)]
    dualstack: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn upload_options(&self) -> UploadOptions {
        let sizing = if self.auto_part_size {
            PartSizing::Memory(match self.memory_limit {
                Some(limit) => MemoryBudget::Limit(limit.saturating_mul(MIB)),
                None => MemoryBudget::Available,
            })
        } else {
            PartSizing::Fixed(self.part_size * MIB)
        };

        UploadOptions::new(self.size)
            .sizing(sizing)
            .concurrency(self.concurrency as usize)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let uploader = Uploader::new(ClientOptions {
        endpoint: cli.endpoint.clone(),
        dual_stack: cli.dualstack,
    })
    .await;

    match uploader
        .upload_stream(&cli.target, tokio::io::stdin(), cli.upload_options())
        .await
    {
        Ok(receipt) => {
            info!(
                parts = receipt.parts,
                bytes = receipt.bytes,
                "Uploaded to {}", receipt.location
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(kind = ?err.kind(), "{}", err);
            ExitCode::FAILURE
        }
    }
}
