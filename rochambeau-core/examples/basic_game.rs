use rochambeau_core::{
    generate_secret, Address, Choice, EngineConfig, GameEngine, RecordingTransfer, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Create temp dir
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("rochambeau.db");
    println!("Using database: {:?}", db_path);

    let owner = Address::new([0xee; 20]);
    let alice = Address::new([0xa1; 20]);
    let bob = Address::new([0xb0; 20]);
    let transfer = Arc::new(RecordingTransfer::new());

    let engine = GameEngine::open_db(
        &db_path,
        EngineConfig::default(),
        owner,
        Arc::new(SystemClock::new()),
        transfer.clone(),
    )
    .await?;
    println!("Game context: {}", engine.context());

    let mut events = engine.subscribe();

    // Alice commits to rock without revealing it
    let secret = generate_secret();
    let commitment = engine.commit(Choice::Rock.code(), &secret, &alice)?;
    engine
        .open(alice, commitment, 100, Duration::from_secs(600), bob, 500)
        .await?;
    println!("\nAlice opened play {}", commitment);

    engine.join(bob, commitment, Choice::Paper.code(), 500).await?;
    println!("Bob joined with paper");

    let outcome = engine.reveal(alice, Choice::Rock.code(), &secret).await?;
    println!("Alice revealed rock: {:?}", outcome);

    println!("\nBalances:");
    println!("Alice: {}", engine.balance(&alice).await);
    println!("Bob: {}", engine.balance(&bob).await);

    engine.withdraw(bob, engine.balance(&bob).await).await?;
    println!("\nPayouts: {:?}", transfer.payouts());

    println!("\nEvents:");
    while let Ok(event) = events.try_recv() {
        println!("  {:?}", event);
    }

    let conservation = engine.conservation().await?;
    println!("\nConservation holds: {}", conservation.holds());

    println!("\nExample completed successfully!");

    Ok(())
}
