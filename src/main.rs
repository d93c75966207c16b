use std::sync::Arc;
use std::time::Duration;

use reslock::manager::{AcquireOptions, LockManager};
use tokio::runtime::Runtime;
use tracing::warn;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let workers: usize = args.get(1).and_then(|arg| arg.parse().ok()).unwrap_or(6);
    let rounds: usize = args.get(2).and_then(|arg| arg.parse().ok()).unwrap_or(50);

    let rt = Runtime::new().unwrap();
    rt.block_on(run_simulation(workers, rounds))
}

/// Contention smoke run: each worker repeatedly grabs two resources out of a
/// small pool in rotating order, so timeouts and eager deadlock rejections
/// both show up in the logs and in the final stats.
async fn run_simulation(workers: usize, rounds: usize) -> anyhow::Result<()> {
    let manager = Arc::new(LockManager::new());

    let mut handles = Vec::new();
    for w in 0..workers {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("worker-{w}");
            let options = AcquireOptions {
                timeout: Duration::from_millis(200),
                ..Default::default()
            };
            for round in 0..rounds {
                let first = format!("res-{}", (w + round) % 3);
                let second = format!("res-{}", (w + round + 1) % 3);

                match manager.acquire(&first, &owner, options).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(owner = %owner, error = %err, "first acquisition rejected");
                        continue;
                    }
                }
                match manager.acquire(&second, &owner, options).await {
                    Ok(true) => {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        manager.release(&second, &owner);
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(owner = %owner, error = %err, "second acquisition rejected");
                    }
                }
                manager.release(&first, &owner);
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }

    println!("{}", serde_json::to_string_pretty(&manager.stats())?);
    manager.shutdown();
    Ok(())
}
