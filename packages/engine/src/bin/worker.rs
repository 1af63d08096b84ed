// packages/engine/src/bin/worker.rs
//! taskmill-worker, the worker child process.
//!
//! Spawned by the engine with piped stdio: stdin is the command pipe,
//! stdout carries status replies and result envelopes, stderr carries
//! logs. Not intended to be run by hand.

use clap::Parser;

use taskmill_engine::worker::WorkerOptions;

#[derive(Parser, Debug)]
#[command(name = "taskmill-worker")]
struct Args {
    /// Stable worker identity, e.g. "cpu-0" or "io-3".
    #[arg(long)]
    worker_id: String,

    /// Executor thread count.
    #[arg(long)]
    threads: usize,

    /// Capacity of the local task channel.
    #[arg(long, default_value_t = 1024)]
    channel_capacity: usize,

    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    taskmill_engine::worker::run_worker(WorkerOptions {
        worker_id: args.worker_id,
        threads: args.threads,
        channel_capacity: args.channel_capacity,
        log_level: args.log_level,
    })?;
    Ok(())
}
