//! Strand operator shell entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load `.strand/config.toml` (or `--config`),
//!    apply command-line overrides, and validate the result.
//! 2. **Wire observability**: install a `tracing-subscriber` layer writing
//!    pretty or JSON logs to stderr.
//! 3. **Construct infrastructure**: build the runtime adapter and hand it to
//!    the [`shell::Shell`] as its branch, metadata and object-store ports.
//! 4. **Run the command loop**: read lines from stdin until `quit` or EOF.

mod config;
mod observability;
mod shell;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, info_span, Instrument};

use pipeline::{
    CompileError, LenientAddressing, SessionId, SiteId, SiteRole, SiteValidator,
    StrictAddressing,
};
use runtime::LoopbackRuntime;

use crate::config::{AddressingMode, LogFormat, ShellConfig};
use crate::shell::{CommandError, Outcome, Shell};

const PROMPT: &str = "(strand) ";

#[derive(Debug, Parser)]
#[command(name = "strand-shell", version, about = "Interactive shell for a Strand cluster")]
struct Args {
    /// Configuration file (defaults to `.strand/config.toml` if present).
    #[arg(short, long, env = "STRAND_CONFIG")]
    config: Option<PathBuf>,

    /// Ordinal of this client.
    #[arg(short, long = "id")]
    id: Option<u32>,

    /// Host of the ring directory.
    #[arg(short, long)]
    ring: Option<String>,

    /// Worker threads.
    #[arg(short, long = "thread")]
    threads: Option<u32>,

    /// Enable branch feeder mode.
    #[arg(short = 'b', long)]
    use_branch: bool,

    /// Reject undefined roles and ordinals that do not fit in 17 bits.
    #[arg(long)]
    strict_addressing: bool,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Args {
    fn apply(&self, config: &mut ShellConfig) {
        if let Some(id) = self.id {
            config.client_id = id;
        }
        if let Some(ring) = &self.ring {
            config.ring = ring.clone();
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.use_branch {
            config.use_branch = true;
        }
        if self.strict_addressing {
            config.addressing = AddressingMode::Strict;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ShellConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate()?;

    observability::init(&config.log)?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads as usize)
        .enable_all()
        .build()
        .context("building async runtime")?
        .block_on(run(config))
}

async fn run(config: ShellConfig) -> anyhow::Result<()> {
    let session = SessionId::new_random();
    let client = SiteId::new(SiteRole::Client, u64::from(config.client_id));
    let span = info_span!("session", %session, %client);

    async move {
        info!(
            ring = %config.ring,
            port = config.client_port(),
            threads = config.threads,
            use_branch = config.use_branch,
            "starting shell"
        );

        let runtime = Arc::new(
            [
                (SiteRole::Metadata, config.loopback.mds),
                (SiteRole::MetadataStorage, config.loopback.mdsl),
                (SiteRole::ObjectStorage, config.loopback.osd),
                (SiteRole::BranchPublisher, config.loopback.bp),
            ]
            .into_iter()
            .fold(LoopbackRuntime::new(), |rt, (role, count)| {
                rt.with_sites(role, count, &config.ring, config.port_base)
            }),
        );
        let validator: Box<dyn SiteValidator> = match config.addressing {
            AddressingMode::Lenient => Box::new(LenientAddressing),
            AddressingMode::Strict => Box::new(StrictAddressing),
        };
        let shell = Shell::new(
            runtime.clone(),
            runtime.clone(),
            runtime,
            validator,
            config.use_branch,
        );

        if config.use_branch {
            println!("Enable branch feeder mode");
        }
        println!("Welcome to the Strand shell, client {client}. Type 'quit' to leave.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{PROMPT}");
            std::io::stdout().flush().context("writing prompt")?;

            let Some(line) = lines.next_line().await.context("reading stdin")? else {
                println!();
                break;
            };
            match shell.execute(&line).await {
                Ok(Outcome::Quit) => break,
                Ok(Outcome::Output(text)) if text.is_empty() => {}
                Ok(Outcome::Output(text)) => println!("{text}"),
                Err(e) => {
                    if let CommandError::Compile(CompileError::NoValidStages { diagnostics }) = &e {
                        for diagnostic in diagnostics {
                            println!("Ignore this OP: {diagnostic}");
                        }
                    }
                    println!("{e}");
                }
            }
        }

        println!("Quitting ...");
        info!("shell stopped");
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
