//! Print a devnet genesis file.
//!
//! Validators use the deterministic devnet keys, so node `i` runs with
//! `validator_seed: i`.
//!
//! Usage:
//!   cargo run --example generate_genesis -- 4 > genesis.json

use tendril_consensus::generate_devnet_genesis;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let count = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 4,
    };

    let genesis = generate_devnet_genesis(count);
    genesis.validate()?;
    eprintln!(
        "chain {} with {} validators, genesis block {}",
        genesis.chain_id,
        count,
        genesis.block()?.hash()
    );
    println!("{}", serde_json::to_string_pretty(&genesis)?);
    Ok(())
}
