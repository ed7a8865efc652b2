use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use gatewatch_capture::FrameGrabber;
use gatewatch_core::Gallery;
use gatewatch_store::{Registry, TenantStore};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gatewatch", about = "Gatewatch operator CLI")]
struct Cli {
    /// Data directory (defaults to $GATEWATCH_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras the monitor would poll
    Cameras,
    /// Show a school's enrolled roster and descriptor health
    Roster {
        school_id: i64,
    },
    /// Show a school's attendance for one day
    Attendance {
        school_id: i64,
        /// Day to show (YYYY-MM-DD); defaults to today
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Capture a single frame from a stream URL
    Snapshot {
        url: String,
        /// Output file for the captured frame
        #[arg(short, long, default_value = "frame.jpg")]
        output: PathBuf,
        /// Capture timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir.clone().unwrap_or_else(|| {
        std::env::var("GATEWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("gatewatch")
            })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let data_dir = data_dir(&cli);

    match cli.command {
        Commands::Cameras => {
            let registry = Registry::open(&data_dir.join("registry.db"))
                .await
                .context("failed to open camera registry")?;
            let cameras = registry.eligible_cameras().await?;
            if cameras.is_empty() {
                println!("No eligible cameras (active + entrance/presence + stream URL).");
                return Ok(());
            }
            for cam in cameras {
                println!(
                    "#{:<4} school {:<4} {:<24} [{}] {}",
                    cam.id,
                    cam.school_id,
                    cam.name,
                    cam.purpose,
                    gatewatch_capture::redacted(&cam.url)
                );
            }
        }
        Commands::Roster { school_id } => {
            let store = TenantStore::open(&data_dir, school_id).await?;
            let rows = store.enrolled_descriptors().await?;
            let total = rows.len();
            let gallery = Gallery::build(rows);
            println!(
                "School {school_id}: {} enrolled, {} with valid descriptors",
                total,
                gallery.len()
            );
            for entry in gallery.entries() {
                println!("  #{:<6} {}", entry.student_id, entry.name);
            }
        }
        Commands::Attendance { school_id, day } => {
            let store = TenantStore::open(&data_dir, school_id).await?;
            let day = day.unwrap_or_else(|| Local::now().date_naive());
            let rows = store.attendance_on(day).await?;
            if rows.is_empty() {
                println!("No attendance for {day}.");
                return Ok(());
            }
            for row in rows {
                println!("  {} {:<24} {} ({})", row.arrived_at, row.student_name, row.status, row.day);
            }
        }
        Commands::Snapshot { url, output, timeout } => {
            let grabber = FrameGrabber::new("ffmpeg", Duration::from_secs(timeout));
            match grabber.grab(&url).await {
                Some(frame) => {
                    std::fs::write(&output, &frame)
                        .with_context(|| format!("failed to write {}", output.display()))?;
                    println!("Wrote {} bytes to {}", frame.len(), output.display());
                }
                None => bail!("no frame captured from {}", gatewatch_capture::redacted(&url)),
            }
        }
    }

    Ok(())
}
