use std::{sync::Arc, time::Duration};

use clap::Parser;
use fn_queuer::{Host, TicketCall};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod adder;
use adder::{add_operation, Adder, AdderError};

const DEFAULT_TICKETS: usize = 5;
const DEFAULT_DELAY_MS: u64 = 25;
const ENTRY_POINT: &str = "add";

#[derive(Parser)]
/// Reserves a batch of tickets on a queued `add`, calls them out of order and shows
/// that they still run in reservation order.
struct Opts {
    /// Number of tickets to reserve
    #[arg(long, default_value_t = DEFAULT_TICKETS)]
    tickets: usize,

    /// How long each `add` call takes, in milliseconds
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,

    /// Make the call with this reservation number fail
    #[arg(long)]
    fail_at: Option<usize>,

    /// Call tickets in reservation order instead of backwards
    #[arg(long)]
    forward: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let adder = Arc::new(Adder::new(Duration::from_millis(opts.delay_ms), opts.fail_at));
    let host = Host::new(Arc::clone(&adder));
    host.define(ENTRY_POINT, add_operation());

    let queue = host.attach(ENTRY_POINT)?;
    let tickets: Vec<_> = (0..opts.tickets).map(|_| queue.reserve()).collect();
    info!("reserved {} tickets", queue.pending_len());

    let order: Vec<usize> = if opts.forward {
        (0..opts.tickets).collect()
    } else {
        (0..opts.tickets).rev().collect()
    };

    let mut calls: Vec<(usize, TicketCall<i64, AdderError>)> = Vec::with_capacity(order.len());
    for i in order {
        info!("calling ticket #{}", i);
        calls.push((i, tickets[i].call((i, i as i64, 1))?));
    }

    // goes through the host, so it queues behind every reservation above
    let direct = host.invoke(ENTRY_POINT, (opts.tickets, opts.tickets as i64, 1))?;

    for (i, call) in calls {
        match call.await {
            Ok(sum) => println!("ticket #{} -> {}", i, sum),
            Err(e) => warn!("ticket #{} failed: {}", i, e),
        }
    }
    match direct.await {
        Ok(sum) => println!("direct call -> {}", sum),
        Err(e) => warn!("direct call failed: {}", e),
    }

    println!("execution order: {:?}", adder.started());

    host.detach(ENTRY_POINT)?;
    let unqueued = host.invoke(ENTRY_POINT, (opts.tickets + 1, 40, 2))?.await?;
    println!("after detach -> {}", unqueued);

    Ok(())
}
