use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use overlap::aggregate::HeatBucket;
use overlap::compactor;
use overlap::config::Config;
use overlap::engine::Engine;
use overlap::model::{EventId, NewEvent, ParticipantKey};
use overlap::sync::{LocalView, Session, SyncClient};

#[derive(Parser)]
#[command(name = "overlap")]
#[command(about = "Shared availability grids with a live group heatmap")]
struct Cli {
    /// Data directory (overrides OVERLAP_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an event and print its id
    Create {
        title: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start_date: String,

        /// Last day (YYYY-MM-DD), defaults to the first day
        #[arg(long)]
        end_date: Option<String>,

        #[arg(long, default_value = "09:00")]
        start_time: String,

        #[arg(long, default_value = "21:00")]
        end_time: String,
    },
    /// Add a participant
    Join { event: String, name: String },
    /// Mark one cell
    Set {
        event: String,
        name: String,
        row: usize,
        col: usize,

        /// Mark unavailable instead of available
        #[arg(long)]
        off: bool,
    },
    /// Mark many cells with the same value
    Paint {
        event: String,
        name: String,

        /// Cell as ROW,COL; repeat for more cells
        #[arg(long = "cell", value_parser = parse_cell, required = true)]
        cells: Vec<(usize, usize)>,

        #[arg(long)]
        off: bool,
    },
    /// Delete a participant and all their cells
    Remove { event: String, name: String },
    /// Print the grid and heatmap
    Show {
        event: String,

        #[arg(long)]
        json: bool,
    },
    /// Rewrite the WAL down to one record per event
    Compact,
}

fn parse_cell(s: &str) -> Result<(usize, usize), String> {
    let (row, col) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got '{s}'"))?;
    let row = row.trim().parse().map_err(|e| format!("row: {e}"))?;
    let col = col.trim().parse().map_err(|e| format!("col: {e}"))?;
    Ok((row, col))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    overlap::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::open(&config.wal_path())?);
    let client = SyncClient::new(engine.clone());
    info!(data_dir = %config.data_dir.display(), "store opened");

    match cli.command {
        Commands::Create {
            title,
            start_date,
            end_date,
            start_time,
            end_time,
        } => {
            let end_date = end_date.as_deref().unwrap_or(&start_date);
            let event = NewEvent::parse(&title, &start_date, end_date, &start_time, &end_time)?;
            let id = client.create_event(event).await?;
            println!("{id}");
        }
        Commands::Join { event, name } => {
            let key = client.join(&EventId::new(event), &name).await?;
            println!("joined as {key}");
        }
        Commands::Set {
            event,
            name,
            row,
            col,
            off,
        } => {
            let mut session = participant_session(&client, event, &name).await?;
            session.set_cell(row, col, !off).await?;
            session.stop();
        }
        Commands::Paint {
            event,
            name,
            cells,
            off,
        } => {
            let mut session = participant_session(&client, event, &name).await?;
            session.paint(&cells, !off).await?;
            session.stop();
        }
        Commands::Remove { event, name } => {
            let key = ParticipantKey::normalize(&name)?;
            client.remove_participant(&EventId::new(event), &key).await?;
        }
        Commands::Show { event, json } => {
            let mut session = Session::new(client.clone(), EventId::new(event));
            let view = session.start().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view_json(view))?);
            } else {
                print_view(view);
            }
            session.stop();
        }
        Commands::Compact => {
            engine.compact_wal().await?;
            return Ok(());
        }
    }

    if let Err(e) = compactor::compact_if_needed(&engine, config.compact_threshold).await {
        tracing::warn!("compaction skipped: {e}");
    }
    Ok(())
}

/// Started session acting as `name`. The participant record is created by
/// the first write if they never joined.
async fn participant_session(
    client: &SyncClient<Engine>,
    event: String,
    name: &str,
) -> Result<Session<Engine>, Box<dyn std::error::Error>> {
    let key = ParticipantKey::normalize(name)?;
    let mut session = Session::new(client.clone(), EventId::new(event)).with_identity(key);
    session.start().await?;
    Ok(session)
}

fn view_json(view: &LocalView) -> serde_json::Value {
    let agg = view.aggregate();
    let participants: Vec<&str> = view.participants().map(ParticipantKey::as_str).collect();
    serde_json::json!({
        "title": view.metadata().title(),
        "createdAt": view.metadata().created_at(),
        "slots": view.slots(),
        "days": view.days(),
        "participants": participants,
        "counts": agg.counts(),
        "buckets": agg.buckets(),
        "best": agg.best_cells(),
    })
}

fn print_view(view: &LocalView) {
    let meta = view.metadata();
    let agg = view.aggregate();
    println!(
        "{}  ({} .. {}, {} - {})",
        meta.title(),
        meta.start_date(),
        meta.end_date(),
        meta.start_time().format("%H:%M"),
        meta.end_time().format("%H:%M"),
    );
    let names: Vec<&str> = view.participants().map(ParticipantKey::as_str).collect();
    println!("participants ({}): {}", names.len(), names.join(", "));
    println!();

    print!("{:>6}", "");
    for day in view.days() {
        print!("  {:>10}", format!("{} {}", day.weekday_label, day.display_label));
    }
    println!();
    for slot in view.slots() {
        print!("{:>6}", slot.label);
        for day in view.days() {
            let cell = format!(
                "{}/{} {}",
                agg.count(slot.index, day.index),
                agg.total(),
                heat_glyph(agg.bucket(slot.index, day.index)),
            );
            print!("  {cell:>10}");
        }
        println!();
    }

    let best = agg.best_cells();
    if let Some(&(row, col)) = best.first() {
        let count = agg.count(row, col);
        let when: Vec<String> = best
            .iter()
            .map(|&(r, c)| format!("{} {}", view.days()[c].iso_date, view.slots()[r].label))
            .collect();
        println!();
        println!("best ({count}/{}): {}", agg.total(), when.join(", "));
    }
}

fn heat_glyph(bucket: HeatBucket) -> &'static str {
    match bucket {
        HeatBucket::Empty => " ",
        HeatBucket::None => ".",
        HeatBucket::Low => "░",
        HeatBucket::Medium => "▒",
        HeatBucket::High => "▓",
        HeatBucket::VeryHigh => "█",
        HeatBucket::Full => "■",
    }
}
