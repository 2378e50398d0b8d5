use clap::Parser;
use std::process;

use dbg68k::{HunkFile, SourceMap};

/// Amiga 68k hunk executable and debug info inspector
#[derive(Parser)]
#[command(name = "dbg68k", version, about)]
struct Cli {
    /// Input Amiga hunk executable file
    input: String,

    /// Show symbols per hunk
    #[arg(long)]
    symbols: bool,

    /// Show line debug tables per hunk
    #[arg(long)]
    lines: bool,

    /// Comma-separated segment base addresses (hex) to resolve the
    /// source map against, e.g. --bases aef,2000
    #[arg(long)]
    bases: Option<String>,

    /// Show additional detail
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let data = match std::fs::read(&cli.input) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error reading '{}': {}", cli.input, e);
            process::exit(1);
        }
    };

    let hunk_file = match dbg68k::parse_hunk_file(&data) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error parsing '{}': {}", cli.input, e);
            process::exit(1);
        }
    };

    print_hunk_info(&hunk_file, &cli);

    if let Some(bases) = &cli.bases {
        print_source_map(&hunk_file, bases);
    }
}

fn print_hunk_info(hunk_file: &HunkFile, cli: &Cli) {
    println!("Amiga Hunk Executable: {}", cli.input);
    println!(
        "Hunks: {} (first: {}, last: {})",
        hunk_file.hunks.len(),
        hunk_file.first_hunk,
        hunk_file.last_hunk
    );
    println!();

    for hunk in &hunk_file.hunks {
        println!(
            "  Hunk {:2}: {:<4} mem={:<4} alloc={:>6} bytes  data={:>6} bytes  (file offset 0x{:X})",
            hunk.index,
            hunk.kind.to_string(),
            hunk.memory_type.to_string(),
            hunk.alloc_size,
            hunk.data.len(),
            hunk.file_offset,
        );

        if !hunk.relocations.is_empty() {
            let total: usize = hunk.relocations.iter().map(|r| r.offsets.len()).sum();
            let targets: Vec<String> = hunk
                .relocations
                .iter()
                .map(|r| format!("hunk_{}", r.target_hunk))
                .collect();
            println!(
                "           relocations: {} entries -> [{}]",
                total,
                targets.join(", ")
            );
        }

        if !hunk.symbols.is_empty() {
            println!("           symbols: {}", hunk.symbols.len());
            if cli.symbols || cli.verbose {
                for sym in &hunk.symbols {
                    println!("             0x{:08X}  {}", sym.offset, sym.name);
                }
            }
        }

        for file in &hunk.source_files {
            println!(
                "           source: \"{}\" ({} lines, base 0x{:X})",
                file.name,
                file.lines.len(),
                file.base_offset,
            );
            if cli.lines || cli.verbose {
                for entry in &file.lines {
                    println!("             line {:>5} -> 0x{:08X}", entry.line, entry.offset);
                }
            }
        }
    }
}

fn print_source_map(hunk_file: &HunkFile, bases: &str) {
    let bases: Vec<u32> = match bases
        .split(',')
        .map(|b| u32::from_str_radix(b.trim().trim_start_matches("0x"), 16))
        .collect()
    {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error parsing --bases: {}", e);
            process::exit(1);
        }
    };

    let map = match SourceMap::new(&hunk_file.hunks, &bases) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error building source map: {}", e);
            process::exit(1);
        }
    };

    println!();
    println!("Segments:");
    for seg in map.segments() {
        println!(
            "  {:<16} base=0x{:08X} size={:>6} bytes",
            seg.name, seg.base_address, seg.size
        );
    }

    for source in map.sources() {
        println!();
        println!("Line table for \"{}\":", source);
        if let Some(lines) = map.source_lines(source) {
            for loc in lines {
                println!(
                    "  line {:>5} -> seg {} + 0x{:04X} = 0x{:08X}",
                    loc.line, loc.segment_index, loc.segment_offset, loc.address
                );
            }
        }
    }
}
