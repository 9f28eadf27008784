use clap::Parser;
use dataflow_harness::{JoinTopology, RowsReader};
use dataflow_log::{Row, Value};
use std::collections::HashMap;

/// Assembles the two-input-group, four-join-channel topology used by
/// the test scenarios and runs it to completion, standing in for an
/// external driver script at the level the core can exercise
/// deterministically.
#[derive(Parser)]
#[command(name = "dataflow-harness", about = "Run the dataflow runtime core's reference join topology")]
struct Args {
    /// Mappers per input group (A and B each get this many channels).
    #[arg(long, default_value_t = 2, env = "DATAFLOW_MAPPERS")]
    mappers: u32,

    /// Join channels, hash-partitioned on the key column mod this count.
    #[arg(long, default_value_t = 4, env = "DATAFLOW_JOIN_CHANNELS")]
    join_channels: u32,

    /// Number of distinct keys to synthesize across both input groups.
    #[arg(long, default_value_t = 100, env = "DATAFLOW_ROWS")]
    rows: u64,

    /// Executions between checkpoints (`K`).
    #[arg(long, default_value_t = 5, env = "DATAFLOW_CHECKPOINT_EVERY")]
    checkpoint_every: u64,
}

fn synth_rows(rows: u64, mappers: u32, mapper_channel: u32, value_field: &str) -> Vec<Row> {
    (0..rows)
        .filter(|key| (*key as u32) % mappers == mapper_channel)
        .map(|key| {
            let mut row = Row::new();
            row.insert("key".to_string(), Value::Int(key as i64));
            row.insert(value_field.to_string(), Value::Int(key as i64 * 10));
            row
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let topology = JoinTopology::new(args.mappers, args.join_channels, "key");

    let mut tasks = Vec::new();
    for channel in 0..args.mappers {
        let (actor, resume_from) = topology.construct_mapper(topology.a_node, channel, args.checkpoint_every).await?;
        let rows = synth_rows(args.rows, args.mappers, channel, "a_val");
        tasks.push(tokio::spawn(async move {
            actor.run(Box::new(RowsReader::new(rows)), resume_from, None).await
        }));

        let (actor, resume_from) = topology.construct_mapper(topology.b_node, channel, args.checkpoint_every).await?;
        let rows = synth_rows(args.rows, args.mappers, channel, "b_val");
        tasks.push(tokio::spawn(async move {
            actor.run(Box::new(RowsReader::new(rows)), resume_from, None).await
        }));
    }

    for channel in 0..args.join_channels {
        let actor = topology.construct_join_channel(channel, args.checkpoint_every).await?;
        tasks.push(tokio::spawn(async move { actor.run().await }));
    }

    for task in tasks {
        task.await??;
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for (actor, _, batch) in topology.output.all() {
        *counts.entry(actor.channel).or_default() += batch.len();
    }
    for channel in 0..args.join_channels {
        tracing::info!(channel, rows = counts.get(&channel).copied().unwrap_or(0), "join channel output");
    }

    Ok(())
}
