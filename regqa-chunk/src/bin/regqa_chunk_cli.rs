use clap::Parser;
use regqa_chunk::{ChunkerConfig, WindowChunker};
use std::fs;
use std::io::{self, Read};
use std::process;

/// A CLI tool to split text into token windows as JSON, using regqa-chunk.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Window size in tokens.
    #[arg(short, long, default_value_t = regqa_chunk::DEFAULT_WINDOW_TOKENS)]
    window_tokens: usize,

    /// Overlap between consecutive windows, in tokens.
    #[arg(short, long, default_value_t = regqa_chunk::DEFAULT_OVERLAP_TOKENS)]
    overlap_tokens: usize,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let text = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let chunker = WindowChunker::new(ChunkerConfig::new(
        args.window_tokens,
        args.overlap_tokens,
    ))?;
    let windows: Vec<_> = chunker.windows(&text).collect();

    println!("{}", serde_json::to_string_pretty(&windows)?);
    Ok(())
}
