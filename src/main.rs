use stress_test::{stress_test_handover, stress_test_scaling, stress_test_session};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod scene;
pub mod stress_test;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only warnings unless RUST_LOG says otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trellis=warn,trellis_session=warn".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATION SIMULATIONS                         ║");
    println!("║  Started {:<50}║", chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: small session
    let stats = stress_test_session(3, 10, 20).await?;
    stats.print();

    // Test 2: medium session
    let stats = stress_test_session(8, 50, 100).await?;
    stats.print();

    // Test 3: ownership handover
    let stats = stress_test_handover(5, 40).await?;
    stats.print();

    // Test 4: scaling analysis
    stress_test_scaling(12, 3).await?;

    println!("\n✓ All simulations completed successfully!");
    Ok(())
}
