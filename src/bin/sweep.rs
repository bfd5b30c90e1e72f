use rand::Rng;
use serde::Serialize;
use std::env;
use std::time::Instant;
use virtmem::{logging, CacheStats, Config, DiskStats, Memory};

#[derive(Debug, Clone, Copy)]
enum Workload {
    Sequential,
    Reverse,
    Strided,
    Random,
}

impl Workload {
    fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "sequential" => Ok(Workload::Sequential),
            "reverse" => Ok(Workload::Reverse),
            "strided" => Ok(Workload::Strided),
            "random" => Ok(Workload::Random),
            other => anyhow::bail!(
                "unknown workload {:?}, expected sequential|reverse|strided|random",
                other
            ),
        }
    }

    /// Address visited at step `i` of a pass with the given shift.
    fn address(self, i: u64, shift: u64, size: u64, rng: &mut impl Rng) -> u64 {
        match self {
            Workload::Sequential => (i + shift) % size,
            Workload::Reverse => size - 1 - (i + shift) % size,
            Workload::Strided => (i * 97 + shift) % size,
            Workload::Random => rng.gen_range(0..size),
        }
    }
}

#[derive(Serialize)]
struct Report {
    workload: String,
    passes: u64,
    accesses: u64,
    mismatches: u64,
    elapsed_ms: u128,
    cache: Option<CacheStats>,
    disk: DiskStats,
}

fn value_at(address: u64) -> u8 {
    ((address * 7 + 5) % 256) as u8
}

fn main() -> anyhow::Result<()> {
    let config = match env::var("VIRTMEM_CONFIG") {
        Ok(path) => Config::from_json_file(path)?,
        Err(_) => Config::default(),
    };
    logging::init(&config.logging);

    let mut args = env::args().skip(1);
    let workload = Workload::parse(args.next().as_deref().unwrap_or("sequential"))?;
    let passes: u64 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 4,
    };

    let size = config.memory.address_space;
    let mut m = Memory::with_config(config.memory)?;
    let mut rng = rand::thread_rng();
    let start = Instant::now();
    let mut accesses = 0;
    let mut mismatches = 0;

    m.startup()?;
    // Writes go in address order so the expected value of every byte is known.
    for address in 0..size {
        m.write(address, value_at(address))?;
        accesses += 1;
    }
    for pass in 0..passes {
        let shift = pass * 100;
        for i in 0..size {
            let address = workload.address(i, shift, size, &mut rng);
            if m.read(address)? != value_at(address) {
                mismatches += 1;
            }
            accesses += 1;
        }
    }
    let cache = m.cache_stats();
    m.shutdown()?;

    let report = Report {
        workload: format!("{:?}", workload).to_lowercase(),
        passes,
        accesses,
        mismatches,
        elapsed_ms: start.elapsed().as_millis(),
        cache,
        disk: m.disk().stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if mismatches > 0 {
        anyhow::bail!("{} reads returned stale data", mismatches);
    }
    Ok(())
}
