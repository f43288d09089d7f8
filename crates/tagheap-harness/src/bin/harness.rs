//! CLI entrypoint for the tagheap trace harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Trace tooling for tagheap.
#[derive(Debug, Parser)]
#[command(name = "tagheap-harness")]
#[command(about = "Trace-replay conformance harness for tagheap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a trace fixture and validate heap behavior.
    Run {
        /// Fixture JSON path.
        #[arg(long)]
        trace: PathBuf,
        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Run the whole-heap audit every N ops (0 = only at the end).
        #[arg(long, default_value_t = 1)]
        check_every: usize,
    },
    /// Synthesize a seeded random fixture.
    Synth {
        /// Generator seed.
        #[arg(long)]
        seed: u64,
        /// Scripted ops before the final drain.
        #[arg(long, default_value_t = 256)]
        ops: usize,
        /// Output path (if omitted, prints to stdout).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            trace,
            json,
            check_every,
        } => {
            let fixture = tagheap_harness::TraceFixture::from_file(&trace)?;
            let runner = tagheap_harness::TraceRunner { check_every };
            let report = runner.run(&fixture)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("fixture:  {}", report.fixture);
                println!("ops:      {}", report.ops_executed);
                println!(
                    "peak:     {} blocks / {} bytes",
                    report.peak_live_blocks, report.peak_live_bytes
                );
                println!("pages:    {} maps / {} unmaps", report.maps, report.unmaps);
                println!("events:   sha256:{}", report.events_sha256);
                for failure in &report.failures {
                    eprintln!("FAIL: {failure}");
                }
                println!("result:   {}", if report.passed { "PASS" } else { "FAIL" });
            }

            if !report.passed {
                return Err(format!(
                    "trace '{}' failed with {} violation(s)",
                    report.fixture,
                    report.failures.len()
                )
                .into());
            }
        }
        Command::Synth { seed, ops, out } => {
            let fixture = tagheap_harness::synth_fixture(seed, ops);
            match out {
                Some(path) => {
                    fixture.to_file(&path)?;
                    eprintln!(
                        "Wrote '{}' ({} ops) to {}",
                        fixture.name,
                        fixture.ops.len(),
                        path.display()
                    );
                }
                None => println!("{}", fixture.to_json()?),
            }
        }
    }

    Ok(())
}
