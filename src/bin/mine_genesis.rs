//! Grind a valid genesis nonce for a chosen network.
//!
//! Walks the nonce space from a starting point, hashing the genesis header
//! through the light-mode RandomX engine until the digest meets the genesis
//! target, then prints the winning header fields.
//!
//! Usage: mine_genesis [--chain main|testnet|regtest] [--time SECS]
//!                     [--start-nonce N] [--max-nonces N]

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use botcoin_pow::pow::randomx::MiningVm;
use botcoin_pow::pow::seed::genesis_seed_hash;
use botcoin_pow::pow::{check_proof_of_work, target};
use botcoin_pow::{Params, NONCE_OFFSET};

struct Args {
    params: Params,
    time: Option<u32>,
    start_nonce: u32,
    max_nonces: u64,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        params: Params::regtest(),
        time: None,
        start_nonce: 0,
        max_nonces: u64::from(u32::MAX) + 1,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("{flag} requires a value"))
        };
        match flag.as_str() {
            "--chain" => {
                args.params = match value()?.as_str() {
                    "main" => Params::main(),
                    "testnet" => Params::testnet(),
                    "regtest" => Params::regtest(),
                    other => bail!("unknown chain {other:?}"),
                }
            }
            "--time" => args.time = Some(value()?.parse().context("--time")?),
            "--start-nonce" => args.start_nonce = value()?.parse().context("--start-nonce")?,
            "--max-nonces" => args.max_nonces = value()?.parse().context("--max-nonces")?,
            other => bail!("unknown flag {other:?}"),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args()?;
    let params = args.params;

    let mut header = params.genesis;
    if let Some(time) = args.time {
        header.time = time;
    }

    let seed_hash = genesis_seed_hash();
    let Some(required) = target::derive_target(header.bits, params.pow_limit) else {
        bail!("genesis bits {:#010x} do not decode to a valid target", header.bits);
    };

    info!(chain = ?params.chain, bits = format!("{:#010x}", header.bits), time = header.time, "grinding genesis nonce");
    info!(seed = %hex::encode(seed_hash), target = format!("{required:064x}"));

    let mut vm = MiningVm::new();
    vm.initialize(&seed_hash, false)?;

    let mut buf = header.serialize();
    let mut nonce = args.start_nonce;
    let started = std::time::Instant::now();

    for attempt in 0..args.max_nonces {
        buf[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
        let digest = vm.hash(&buf)?;

        if check_proof_of_work(&digest, header.bits, &params) {
            header.nonce = nonce;
            let elapsed = started.elapsed().as_secs_f64();
            info!(
                nonce,
                attempts = attempt + 1,
                elapsed_secs = format!("{elapsed:.1}"),
                "genesis nonce found"
            );
            println!("nonce:       {nonce}");
            println!("time:        {}", header.time);
            println!("bits:        {:#010x}", header.bits);
            println!("pow digest:  {}", hex::encode(digest));
            println!("block hash:  {}", hex::encode(header.block_hash()));
            return Ok(());
        }

        if attempt % 1000 == 999 {
            let rate = (attempt + 1) as f64 / started.elapsed().as_secs_f64().max(0.001);
            info!(attempts = attempt + 1, hashrate = format!("{rate:.1}"), "still grinding");
        }
        nonce = nonce.wrapping_add(1);
    }

    bail!("no valid nonce within {} attempts", args.max_nonces)
}
