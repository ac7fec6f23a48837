use clap::{App, Arg, SubCommand};
use chanpool::{
    allocators::{ArenaAllocator, PhysicalAllocator},
    boundary::SimulatedUserMemory,
    buffers::SgDescriptor,
    channel::{Channel, ChannelResponse},
    config::PoolConfig,
    error::ChanPoolError,
    memory::{BackingType, RegionConfig},
    request::{place_alloc_request, place_free_request, RawRequest, POOL_REQUEST_SENTINEL},
    Result,
};
use std::{path::PathBuf, sync::Arc};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("chanpool-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("DMA channel buffer pool tool")
        .subcommand(
            SubCommand::with_name("lifecycle")
                .about("Allocate, inspect and free a channel's buffers")
                .arg(
                    Arg::with_name("sizes")
                        .short("s")
                        .long("sizes")
                        .value_name("SIZES")
                        .help("Comma separated buffer sizes in bytes")
                        .default_value("4096,8192,4096")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("region_size")
                        .short("r")
                        .long("region-size")
                        .value_name("SIZE")
                        .help("Size of the DMA region in bytes")
                        .default_value("4194304")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("file")
                        .short("f")
                        .long("file")
                        .value_name("FILE")
                        .help("Back the region with this file")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("memfd")
                        .long("memfd")
                        .help("Use anonymous memory file descriptor (Linux only)"),
                )
                .arg(
                    Arg::with_name("max_buffers")
                        .short("m")
                        .long("max-buffers")
                        .value_name("COUNT")
                        .help("Largest buffer count a request may ask for")
                        .default_value("1024")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Show version, descriptor layout and default limits"),
        )
        .get_matches();

    match matches.subcommand() {
        ("lifecycle", Some(lifecycle_matches)) => run_lifecycle(lifecycle_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_usize(matches: &clap::ArgMatches, name: &str) -> Result<usize> {
    matches
        .value_of(name)
        .unwrap_or_default()
        .parse()
        .map_err(|_| ChanPoolError::invalid_parameter(name, "Invalid number"))
}

fn parse_sizes(list: &str) -> Result<Vec<usize>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ChanPoolError::invalid_parameter("sizes", format!("Invalid size '{}'", s)))
        })
        .collect()
}

fn run_lifecycle(matches: &clap::ArgMatches) -> Result<()> {
    let sizes = parse_sizes(matches.value_of("sizes").unwrap_or_default())?;
    let region_size = parse_usize(matches, "region_size")?;
    let max_buffers = parse_usize(matches, "max_buffers")?;

    let mut region = RegionConfig::new("cli", region_size);
    if matches.is_present("memfd") {
        #[cfg(target_os = "linux")]
        {
            region = region.with_backing_type(BackingType::MemFd);
        }
        #[cfg(not(target_os = "linux"))]
        {
            return Err(ChanPoolError::platform("memfd not supported on this platform"));
        }
    } else if let Some(file) = matches.value_of("file") {
        region = region
            .with_backing_type(BackingType::FileBacked)
            .with_file_path(PathBuf::from(file));
    }

    let arena = Arc::new(ArenaAllocator::new(region)?);
    let config = PoolConfig::new("cli").with_max_buffers(max_buffers);
    let channel = Channel::new(0, config, arena.clone())?;

    println!(
        "Region '{}': {} bytes ({}), bus base {:#x}",
        arena.region().name(),
        arena.region().size(),
        arena.region().backing_type().name(),
        arena.region().bus_base()
    );

    let mut mem = SimulatedUserMemory::new();
    let alloc = place_alloc_request(&mut mem, POOL_REQUEST_SENTINEL, &sizes);
    let free = place_free_request(&mut mem, POOL_REQUEST_SENTINEL);

    if let ChannelResponse::Allocated(summary) = channel.handle(&mem, RawRequest::Alloc(alloc))? {
        println!(
            "\nAllocated {}/{} buffers, descriptor table {}",
            summary.allocated,
            summary.buffer_count,
            if summary.table_ready { "ready" } else { "unavailable" }
        );
    }

    {
        let pool = channel.lock()?;
        println!("\nBuffers:");
        for (i, buffer) in pool.buffers().iter().enumerate() {
            match buffer.physical_address() {
                Some(phys) => println!("  [{}] {:>10} bytes @ {}", i, buffer.size(), phys),
                None => println!("  [{}] {:>10} bytes FAILED", i, buffer.size()),
            }
        }

        if let Some(table) = pool.descriptor_table() {
            println!("\nDescriptor table @ {}:", table.physical_base());
            for (i, slot) in table.slots().iter().enumerate() {
                println!(
                    "  [{}] buffer {} len {:>8} next {}",
                    i,
                    slot.buffer(),
                    slot.transfer_len(),
                    slot.next()
                );
            }
        }
    }

    if let ChannelResponse::Released(summary) = channel.handle(&mem, RawRequest::Free(free))? {
        println!(
            "\nReleased {} regions ({} skipped, {} free failures)",
            summary.freed, summary.skipped, summary.free_failures
        );
    }

    let status = channel.status()?;
    println!("\n{}", status.stats.summary());
    println!("Arena bytes in use after release: {}", arena.bytes_in_use());

    Ok(())
}

fn show_info() -> Result<()> {
    let defaults = PoolConfig::default();

    println!("chanpool v{}", chanpool::VERSION);
    println!("Per-channel DMA buffer pool manager");
    println!();
    println!("Request sentinel: {:#010x}", POOL_REQUEST_SENTINEL);
    println!(
        "Descriptor: {} bytes, {}-byte aligned, max transfer {} bytes",
        std::mem::size_of::<SgDescriptor>(),
        std::mem::align_of::<SgDescriptor>(),
        SgDescriptor::MAX_TRANSFER_LEN
    );
    println!("Default max buffers: {}", defaults.max_buffers);
    println!("Default max buffer size: {} bytes", defaults.max_buffer_size);
    println!();
    println!("Backing types:");
    let mut backings = vec![BackingType::Anonymous, BackingType::FileBacked];
    #[cfg(target_os = "linux")]
    backings.push(BackingType::MemFd);
    for backing in backings {
        println!(
            "  - {} ({})",
            backing.name(),
            if backing.is_supported() { "supported" } else { "unsupported" }
        );
    }
    println!();
    println!("Features:");
    println!("  - c-api: {}", cfg!(feature = "c-api"));

    Ok(())
}
