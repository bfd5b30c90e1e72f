use std::env;
use std::sync::Arc;
use virtmem::{logging, Config, Disk, Memory, MemoryConfig};

fn pattern(address: u64) -> u8 {
    ((address * 5 + 6) % 256) as u8 ^ 0x80
}

fn load_config() -> anyhow::Result<Config> {
    match env::var("VIRTMEM_CONFIG") {
        Ok(path) => Ok(Config::from_json_file(path)?),
        Err(_) => Ok(Config::default()),
    }
}

fn open_disk(config: &MemoryConfig) -> anyhow::Result<Arc<Disk>> {
    let disk = match env::var("VIRTMEM_DISK") {
        Ok(path) => Disk::open_file(path, config.block_size)?,
        Err(_) => Disk::in_memory(config.block_size),
    };
    Ok(Arc::new(disk))
}

fn report(label: &str, m: &Memory) {
    println!(
        "  ✓ {:<28} disk reads: {:>5} | disk writes: {:>5}",
        label,
        m.read_count_disk(),
        m.write_count_disk()
    );
}

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    logging::init(&config.logging);
    let memory_config = config.memory;

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║  VIRTMEM - write-back block cache over a disk      ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    println!("📚 Geometry:");
    println!("  • Address space:   {} bytes", memory_config.address_space);
    println!("  • Block size:      {} bytes", memory_config.block_size);
    println!(
        "  • Physical memory: {} bytes ({} slots)",
        memory_config.physical_memory,
        memory_config.capacity()
    );
    println!("  • Out-of-range:    {:?}\n", memory_config.out_of_range);

    // 1. Persist a byte and read it back after a reboot.
    println!("▶ Single write, then reboot over the same disk...");
    let disk = open_disk(&memory_config)?;
    let mut m = Memory::with_disk(memory_config.clone(), Arc::clone(&disk))?;
    m.startup()?;
    m.write(0x8000, 0xFF)?;
    m.shutdown()?;

    let mut m = Memory::with_disk(memory_config.clone(), disk)?;
    m.startup()?;
    let value = m.read(0x8000)?;
    m.shutdown()?;
    println!("  ✓ read(0x8000) after reboot = {:#04x}", value);
    report("reboot", &m);
    println!();

    // 2. Counter behaviour on fresh disks.
    println!("▶ Write-back counters...");
    let mut m = Memory::with_config(memory_config.clone())?;
    m.startup()?;
    for address in 0..32 {
        m.write(address, 0xFF)?;
    }
    m.shutdown()?;
    report("32 writes, one block", &m);

    let mut m = Memory::with_config(memory_config.clone())?;
    m.startup()?;
    for i in 0..32 {
        m.write(i * 64, 0xFF)?;
    }
    m.shutdown()?;
    report("32 writes, 32 blocks", &m);
    println!();

    // 3. Fill the whole address space and verify it.
    println!("▶ End-to-end over the full address space...");
    let mut m = Memory::with_config(memory_config.clone())?;
    m.startup()?;
    for address in 0..memory_config.address_space {
        m.write(address, pattern(address))?;
    }
    let mut mismatches = 0;
    for address in (0..memory_config.address_space).rev() {
        if m.read(address)? != pattern(address) {
            mismatches += 1;
        }
    }
    if let Some(stats) = m.cache_stats() {
        println!(
            "  • cache: {} hits, {} misses, {} evictions",
            stats.hits, stats.misses, stats.evictions
        );
    }
    m.shutdown()?;
    report("forward write, backward read", &m);
    println!("  ✓ mismatches: {}", mismatches);

    println!("\n✅ All scenarios completed.");
    Ok(())
}
