use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use env_logger::Env;
use log::warn;
use unicode_segmentation::UnicodeSegmentation;

use alignfst::symbols::SymbolConfig;
use phonetize::{render_paths, Phoneticizer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Phoneticize written forms with a joint n-gram model")]
struct Args {
    /// Path to the joint model WFST
    #[arg(long)]
    model: PathBuf,
    /// Single entry to phoneticize
    #[arg(long)]
    word: Option<String>,
    /// File of entries, one per line, with an optional tab-separated reference
    #[arg(long)]
    wordlist: Option<PathBuf>,
    /// Number of hypotheses to print per entry
    #[arg(long, default_value_t = 1)]
    nbest: usize,
    /// Token separator for input entries (empty splits per grapheme cluster)
    #[arg(long, default_value = "")]
    sep: String,
}

fn tokenize(entry: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        entry.graphemes(true).map(|g| g.to_string()).collect()
    } else {
        entry
            .split(sep)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

fn decode_entry(
    decoder: &Phoneticizer,
    symbols: &SymbolConfig,
    entry: &str,
    reference: Option<&str>,
    nbest: usize,
    sep: &str,
) -> Result<()> {
    let tokens = tokenize(entry, sep);
    let paths = decoder.phoneticize(&tokens, nbest)?;
    if paths.is_empty() {
        warn!("no pronunciation found for {:?}", entry);
        return Ok(());
    }
    for line in render_paths(&paths, nbest, symbols, reference) {
        println!("{line}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let decoder = Phoneticizer::from_file(&args.model)?;
    let symbols = SymbolConfig::default();

    match (&args.word, &args.wordlist) {
        (Some(word), _) => decode_entry(&decoder, &symbols, word, None, args.nbest, &args.sep)?,
        (None, Some(path)) => {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (entry, reference) = match line.split_once('\t') {
                    Some((e, r)) => (e, Some(r)),
                    None => (line, None),
                };
                if let Err(e) =
                    decode_entry(&decoder, &symbols, entry, reference, args.nbest, &args.sep)
                {
                    warn!("skipping {:?}: {}", entry, e);
                }
            }
        }
        (None, None) => bail!("either --word or --wordlist is required"),
    }
    Ok(())
}
