//! Race Tester CLI Tool
//!
//! Drives two in-process clients through the full race protocol over the
//! in-memory relay, without needing a broker.
//!
//! Usage:
//!   cargo run --bin race-tester -- --help
//!   cargo run --bin race-tester duel
//!   cargo run --bin race-tester rematch
//!   cargo run --bin race-tester disconnect
//!   cargo run --bin race-tester matchmaking --searchers 6
//!   cargo run --bin race-tester run-all

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use type_duel::config::AppConfig;
use type_duel::race::{RaceCoordinator, RacePhase, RaceStateMachine};
use type_duel::relay::RelayClient;
use type_duel::service::AppState;
use type_duel::types::{MatchOutcome, MatchPreference, Participant};

#[derive(Parser)]
#[command(name = "race-tester")]
#[command(about = "Protocol exerciser for type-duel matchmaking and race synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete duel between two simulated clients
    Duel,
    /// Run a duel followed by a rematch round
    Rematch,
    /// Run a duel where one player disconnects mid-race
    Disconnect,
    /// Push searchers with mixed preferences through matchmaking
    Matchmaking {
        /// Number of searchers to simulate
        #[arg(short, long, default_value = "6")]
        searchers: usize,
    },
    /// Run all scenarios in sequence
    RunAll,
}

/// A simulated client: matchmade pair, coordinator, and typing behavior.
struct SimulatedPair {
    app: Arc<AppState>,
    passage: String,
    room_id: String,
    alice: RaceCoordinator,
    bob: RaceCoordinator,
}

async fn matched_pair() -> Result<SimulatedPair> {
    let app = Arc::new(AppState::for_testing(AppConfig::default()));
    let preference = MatchPreference {
        language: "en".to_string(),
        max_passage_length: 120,
    };

    app.search(Participant::new("alice", "Alice"), preference.clone())
        .await?;
    let outcome = app
        .search(Participant::new("bob", "Bob"), preference)
        .await?;

    let (room, passage) = match outcome {
        MatchOutcome::Matched { room, passage, .. } => (room, passage),
        MatchOutcome::Waiting => anyhow::bail!("second searcher was not matched"),
    };
    println!("matched into room '{}'", room.room_id);
    println!("passage: {:?}", passage);

    let relay: Arc<dyn RelayClient> = app.relay();
    let alice_machine = RaceStateMachine::with_peer(
        Participant::new("alice", "Alice"),
        Participant::new("bob", "Bob"),
        passage.clone(),
        1,
    );
    let bob_machine = RaceStateMachine::with_peer(
        Participant::new("bob", "Bob"),
        Participant::new("alice", "Alice"),
        passage.clone(),
        1,
    );

    Ok(SimulatedPair {
        app,
        room_id: room.room_id.clone(),
        alice: RaceCoordinator::new(alice_machine, relay.clone(), &room.room_id),
        bob: RaceCoordinator::new(bob_machine, relay, &room.room_id),
        passage,
    })
}

/// Type the passage in chunks, with the given per-chunk delay.
async fn type_passage(coordinator: &RaceCoordinator, passage: &str, chunk_delay: Duration) {
    let words: Vec<&str> = passage.split(' ').collect();
    let mut typed = String::new();
    for word in words {
        if !typed.is_empty() {
            typed.push(' ');
        }
        typed.push_str(word);
        if coordinator.type_progress(&typed).await.is_err() {
            // Race already over (peer won or left)
            return;
        }
        sleep(chunk_delay).await;
    }
}

async fn run_to_racing(pair: &SimulatedPair) -> Result<()> {
    let _ = pair.alice.spawn().await?;
    let _ = pair.bob.spawn().await?;

    pair.alice.join().await?;
    pair.bob.join().await?;
    pair.alice.ready().await?;
    pair.bob.ready().await?;

    // Wait out the 1s countdown both clients run locally
    sleep(Duration::from_millis(1400)).await;

    let alice_phase = pair.alice.machine().lock().await.phase();
    let bob_phase = pair.bob.machine().lock().await.phase();
    println!("after countdown: alice={:?}, bob={:?}", alice_phase, bob_phase);
    anyhow::ensure!(alice_phase == RacePhase::Racing, "alice not racing");
    anyhow::ensure!(bob_phase == RacePhase::Racing, "bob not racing");
    Ok(())
}

async fn report_outcome(pair: &SimulatedPair) {
    sleep(Duration::from_millis(300)).await;
    for (name, coordinator) in [("alice", &pair.alice), ("bob", &pair.bob)] {
        let machine = coordinator.machine();
        let machine = machine.lock().await;
        println!(
            "{}: phase={:?}, winner={:?}, score(alice)={}, score(bob)={}",
            name,
            machine.phase(),
            machine.winner(),
            machine.session().score_of("alice"),
            machine.session().score_of("bob"),
        );
    }
}

async fn scenario_duel() -> Result<()> {
    println!("--- scenario: duel ---");
    let pair = matched_pair().await?;
    run_to_racing(&pair).await?;

    // Alice types faster than Bob
    let alice_typing = type_passage(&pair.alice, &pair.passage, Duration::from_millis(10));
    let bob_typing = type_passage(&pair.bob, &pair.passage, Duration::from_millis(40));
    tokio::join!(alice_typing, bob_typing);

    report_outcome(&pair).await;
    pair.app.leave_room(&pair.room_id, "alice").await?;
    pair.app.leave_room(&pair.room_id, "bob").await?;
    println!("duel scenario complete\n");
    Ok(())
}

async fn scenario_rematch() -> Result<()> {
    println!("--- scenario: rematch ---");
    let pair = matched_pair().await?;
    run_to_racing(&pair).await?;

    type_passage(&pair.alice, &pair.passage, Duration::from_millis(5)).await;
    sleep(Duration::from_millis(300)).await;

    println!("voting for a rematch...");
    pair.alice.play_again().await?;
    pair.bob.play_again().await?;
    sleep(Duration::from_millis(1600)).await;

    let alice_phase = pair.alice.machine().lock().await.phase();
    println!("after rematch votes: alice={:?}", alice_phase);
    anyhow::ensure!(
        alice_phase == RacePhase::Racing,
        "rematch did not restart the race"
    );

    // Bob wins the second round
    type_passage(&pair.bob, &pair.passage, Duration::from_millis(5)).await;
    report_outcome(&pair).await;
    println!("rematch scenario complete\n");
    Ok(())
}

async fn scenario_disconnect() -> Result<()> {
    println!("--- scenario: disconnect ---");
    let pair = matched_pair().await?;
    run_to_racing(&pair).await?;

    println!("alice leaves mid-race...");
    pair.alice.leave().await?;
    pair.app.leave_room(&pair.room_id, "alice").await?;
    sleep(Duration::from_millis(300)).await;

    let bob_phase = pair.bob.machine().lock().await.phase();
    println!("bob after peer left: {:?}", bob_phase);
    anyhow::ensure!(bob_phase == RacePhase::Idle, "bob did not exit");
    println!("disconnect scenario complete\n");
    Ok(())
}

async fn scenario_matchmaking(searchers: usize) -> Result<()> {
    println!("--- scenario: matchmaking ({} searchers) ---", searchers);
    let app = Arc::new(AppState::for_testing(AppConfig::default()));

    let languages = ["en", "fr"];
    let mut matched = 0;
    for i in 0..searchers {
        let id = format!("player{}", i);
        let preference = MatchPreference {
            language: languages[i % languages.len()].to_string(),
            max_passage_length: 120,
        };
        let outcome = app
            .search(Participant::new(id.clone(), id.clone()), preference.clone())
            .await?;
        match outcome {
            MatchOutcome::Matched { room, opponent, .. } => {
                matched += 1;
                println!(
                    "{} [{}] matched with {} in '{}'",
                    id, preference, opponent.id, room.room_id
                );
            }
            MatchOutcome::Waiting => {
                println!("{} [{}] waiting", id, preference);
            }
        }
    }

    let stats = app.matchmaking_stats()?;
    println!(
        "searches={}, matches={}, still waiting={}",
        stats.searches_served, stats.matches_made, stats.participants_waiting
    );
    anyhow::ensure!(matched == stats.matches_made as usize);
    println!("matchmaking scenario complete\n");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Duel => scenario_duel().await?,
        Commands::Rematch => scenario_rematch().await?,
        Commands::Disconnect => scenario_disconnect().await?,
        Commands::Matchmaking { searchers } => scenario_matchmaking(searchers).await?,
        Commands::RunAll => {
            scenario_duel().await?;
            scenario_rematch().await?;
            scenario_disconnect().await?;
            scenario_matchmaking(6).await?;
            println!("all scenarios passed");
        }
    }

    Ok(())
}
