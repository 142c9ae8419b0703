use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use pista::booking;
use pista::config::Config;
use pista::engine::Engine;
use pista::model::*;
use pista::notify::NotifyHub;

#[derive(Debug, Parser)]
#[clap(name = "pista", version, about = "Court booking store")]
struct Cli {
    /// Data directory holding pista.wal
    #[clap(long, env = "PISTA_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Print JSON instead of text
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List courts
    Courts,
    /// Register a court
    AddCourt {
        #[clap(long)]
        name: String,
        #[clap(long)]
        opens: WallClock,
        #[clap(long)]
        closes: WallClock,
        /// Slot length in minutes
        #[clap(long, default_value = "60")]
        slot: u32,
        #[clap(long, default_value = "0")]
        price_cents: u64,
    },
    /// Change a court's settings
    UpdateCourt {
        id: Ulid,
        #[clap(long)]
        name: Option<String>,
        #[clap(long, requires = "closes")]
        opens: Option<WallClock>,
        #[clap(long, requires = "opens")]
        closes: Option<WallClock>,
        /// Slot length in minutes
        #[clap(long)]
        slot: Option<u32>,
        #[clap(long)]
        price_cents: Option<u64>,
        #[clap(long)]
        active: Option<bool>,
    },
    /// Slots of a court on a date
    Slots { court: Ulid, date: NaiveDate },
    /// Free windows of a court on a date
    Free {
        court: Ulid,
        date: NaiveDate,
        /// Drop windows shorter than this many minutes
        #[clap(long)]
        min_minutes: Option<u32>,
    },
    /// Book a court
    Book {
        court: Ulid,
        date: NaiveDate,
        start: WallClock,
        end: WallClock,
        #[clap(long)]
        by: String,
        /// Other players (comma-separated)
        #[clap(long, value_delimiter = ',')]
        with: Vec<String>,
    },
    Confirm { id: Ulid },
    Cancel { id: Ulid },
    /// Record a match result
    Result {
        id: Ulid,
        #[clap(long)]
        score_a: u32,
        #[clap(long)]
        score_b: u32,
        #[clap(long, value_delimiter = ',')]
        winners: Vec<String>,
    },
    /// Reservations of a court on a date, or of a player
    Reservations {
        #[clap(long, requires = "date")]
        court: Option<Ulid>,
        #[clap(long)]
        date: Option<NaiveDate>,
        #[clap(long, conflicts_with = "court")]
        user: Option<String>,
        /// Include canceled and completed reservations
        #[clap(long)]
        all: bool,
    },
    /// Practice-partner requests
    #[clap(subcommand)]
    Challenge(ChallengeCommand),
    /// Print the slots of a court on a date each time they change
    Watch { court: Ulid, date: NaiveDate },
}

#[derive(Debug, Subcommand)]
enum ChallengeCommand {
    Open {
        date: NaiveDate,
        #[clap(long)]
        by: String,
        #[clap(long)]
        court: Option<Ulid>,
        #[clap(long)]
        note: Option<String>,
    },
    Match { first: Ulid, second: Ulid },
    Cancel { id: Ulid },
    List {
        #[clap(long)]
        date: Option<NaiveDate>,
    },
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

fn court_line(c: &Court) -> String {
    format!(
        "{}  {:<24} {}-{} every {}m  {} cents/h{}",
        c.id,
        c.name,
        c.hours.opens,
        c.hours.closes,
        c.hours.slot.minutes(),
        c.hourly_price_cents,
        if c.active { "" } else { "  (inactive)" }
    )
}

fn reservation_line(r: &Reservation, engine: &Engine) -> String {
    let clock = |t| {
        engine
            .calendar
            .wall_clock_of(t)
            .map_or_else(|| t.to_string(), |w| w.to_string())
    };
    let players: Vec<&str> = r.participants.iter().map(UserId::as_str).collect();
    format!(
        "{}  {} {}-{}  {:<9} {}",
        r.id,
        r.date,
        clock(r.span.start),
        clock(r.span.end),
        r.status.kind().as_str(),
        players.join(",")
    )
}

fn slot_lines(slots: &Vec<TimeSlot>) -> String {
    slots
        .iter()
        .map(|s| match s.occupied_by {
            Some(id) => format!("{}  taken ({id})", s.label),
            None => format!("{}  free", s.label),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn challenge_line(c: &Challenge) -> String {
    format!(
        "{}  {}  {:<16} {:?}{}",
        c.id,
        c.date,
        c.created_by,
        c.status,
        c.note.as_deref().map(|n| format!("  \"{n}\"")).unwrap_or_default()
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pista::observability::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    pista::observability::init(config.metrics_port)?;

    let calendar = config.calendar()?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()), calendar)?);
    let json = cli.json;

    match cli.command {
        Command::Courts => {
            emit(json, &engine.list_courts().await, |cs| {
                cs.iter().map(court_line).collect::<Vec<_>>().join("\n")
            })?;
        }
        Command::AddCourt {
            name,
            opens,
            closes,
            slot,
            price_cents,
        } => {
            let hours = OperatingHours::new(opens, closes, SlotDuration::from_minutes(slot)?)?;
            let id = engine
                .create_court(NewCourt {
                    name,
                    hours,
                    hourly_price_cents: price_cents,
                })
                .await?;
            emit(json, &id, Ulid::to_string)?;
        }
        Command::UpdateCourt {
            id,
            name,
            opens,
            closes,
            slot,
            price_cents,
            active,
        } => {
            let hours = if opens.is_some() || slot.is_some() {
                let current = engine.get_court(id).await?.hours;
                let slot = match slot {
                    Some(minutes) => SlotDuration::from_minutes(minutes)?,
                    None => current.slot,
                };
                Some(OperatingHours::new(
                    opens.unwrap_or(current.opens),
                    closes.unwrap_or(current.closes),
                    slot,
                )?)
            } else {
                None
            };
            let court = engine
                .update_court(
                    id,
                    CourtUpdate {
                        name,
                        hours,
                        hourly_price_cents: price_cents,
                        active,
                    },
                )
                .await?;
            emit(json, &court, court_line)?;
        }
        Command::Slots { court, date } => {
            let slots = booking::day_slots(engine.as_ref(), court, date).await?;
            emit(json, &slots, slot_lines)?;
        }
        Command::Free {
            court,
            date,
            min_minutes,
        } => {
            let min = min_minutes.map(|m| Ms::from(m) * MINUTE_MS);
            let windows = engine.free_windows(court, date, min).await?;
            emit(json, &windows, |ws| {
                ws.iter()
                    .map(|w| {
                        let from = engine.calendar.wall_clock_of(w.start);
                        let to = engine.calendar.wall_clock_of(w.end);
                        match (from, to) {
                            (Some(f), Some(t)) if w.end - w.start < DAY_MS => format!("{f}-{t}"),
                            _ => format!("[{}, {})", w.start, w.end),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Book {
            court,
            date,
            start,
            end,
            by,
            with,
        } => {
            let span = Span::checked(engine.calendar.at(date, start), engine.calendar.at(date, end))?;
            let id = booking::book(
                engine.as_ref(),
                NewReservation {
                    court_id: court,
                    span,
                    participants: with.into_iter().map(UserId::new).collect(),
                    created_by: UserId::new(by),
                },
            )
            .await?;
            emit(json, &id, Ulid::to_string)?;
        }
        Command::Confirm { id } => {
            let r = engine.confirm_reservation(id).await?;
            emit(json, &r, |r| reservation_line(r, &engine))?;
        }
        Command::Cancel { id } => {
            let r = engine.cancel_reservation(id).await?;
            emit(json, &r, |r| reservation_line(r, &engine))?;
        }
        Command::Result {
            id,
            score_a,
            score_b,
            winners,
        } => {
            let result = MatchResult {
                score_a,
                score_b,
                winners: winners.into_iter().map(UserId::new).collect(),
            };
            let r = engine.register_result(id, result).await?;
            emit(json, &r, |r| reservation_line(r, &engine))?;
        }
        Command::Reservations {
            court,
            date,
            user,
            all,
        } => {
            let statuses = if all { StatusKind::ALL } else { StatusKind::ACTIVE };
            let found = match (court, date, user) {
                (Some(court), Some(date), _) => engine.reservations_for_day(court, date, statuses).await?,
                (None, _, Some(user)) => engine
                    .reservations_for_user(&UserId::new(user))
                    .await
                    .into_iter()
                    .filter(|r| statuses.contains(&r.status.kind()))
                    .filter(|r| date.is_none_or(|d| r.date == d))
                    .collect(),
                _ => return Err("give --court with --date, or --user".into()),
            };
            emit(json, &found, |rs| {
                rs.iter()
                    .map(|r| reservation_line(r, &engine))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        Command::Challenge(cmd) => run_challenge(&engine, cmd, json).await?,
        Command::Watch { court, date } => {
            tokio::spawn(pista::maintenance::run_compactor(
                engine.clone(),
                config.compact_threshold,
            ));
            let mut slots = booking::watch_day_slots(engine.clone(), court, date);
            info!(%court, %date, "watching slots");
            loop {
                tokio::select! {
                    next = slots.next() => match next {
                        Some(snapshot) => emit(json, &snapshot?, slot_lines)?,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted, stopping watch");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_challenge(engine: &Engine, cmd: ChallengeCommand, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ChallengeCommand::Open { date, by, court, note } => {
            let id = engine
                .open_challenge(NewChallenge {
                    created_by: UserId::new(by),
                    date,
                    court_id: court,
                    note,
                })
                .await?;
            emit(json, &id, Ulid::to_string)?;
        }
        ChallengeCommand::Match { first, second } => {
            engine.match_challenges(first, second).await?;
            let pair = [engine.get_challenge(first).await?, engine.get_challenge(second).await?];
            emit(json, &pair, |p| p.iter().map(challenge_line).collect::<Vec<_>>().join("\n"))?;
        }
        ChallengeCommand::Cancel { id } => {
            engine.cancel_challenge(id).await?;
            emit(json, &engine.get_challenge(id).await?, challenge_line)?;
        }
        ChallengeCommand::List { date } => {
            emit(json, &engine.open_challenges(date).await, |cs| {
                cs.iter().map(challenge_line).collect::<Vec<_>>().join("\n")
            })?;
        }
    }
    Ok(())
}
