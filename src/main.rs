use std::sync::Arc;
use std::thread;

use dotenvy::dotenv;
use log::{error, info, warn};

use proof_ledger::config::NodeConfig;
use proof_ledger::node::Node;
use proof_ledger::wallet::{address_of, generate_keypair, secret_key_from_hex};

fn main() {
    let _ = dotenv();
    env_logger::init();

    let config = NodeConfig::from_env();
    let miner = match config.miner_secret_key.as_deref().map(secret_key_from_hex) {
        Some(Ok(sk)) => sk,
        Some(Err(err)) => {
            error!("MINER_SECRET_KEY is unusable: {}", err);
            std::process::exit(1);
        }
        None => {
            let (sk, _) = generate_keypair();
            warn!("no MINER_SECRET_KEY set, mining to a throwaway key");
            sk
        }
    };

    println!(
        "⛓️ Starting ledger node, mining {} block(s) to {}",
        config.mine_blocks,
        address_of(&miner)
    );

    let node = Arc::new(Node::new(config.protocol.clone()));
    let worker = {
        let node = Arc::clone(&node);
        let blocks = config.mine_blocks;
        thread::spawn(move || {
            for _ in 0..blocks {
                match node.mine_next(&miner) {
                    Ok(Some(block)) => info!(
                        "head {} at index {}, next difficulty {}",
                        block.hash(),
                        block.index(),
                        node.difficulty_for(block.hash()).unwrap_or_default()
                    ),
                    Ok(None) => info!("mining job cancelled, retrying on the new head"),
                    Err(err) => {
                        error!("mining stopped: {}", err);
                        break;
                    }
                }
            }
        })
    };

    if worker.join().is_err() {
        error!("mining worker panicked");
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&node.stats()) {
        Ok(stats) => println!("{stats}"),
        Err(err) => error!("could not render stats: {}", err),
    }
}
