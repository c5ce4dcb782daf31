use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use rustfst::prelude::*;

use alignfst::corpus::{compile_nbest_archive, load_dictionary, write_alignments, write_model};
use alignfst::{AlignerConfig, M2MFstAligner, SymbolConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Align a pronunciation dictionary for joint-model training")]
struct Args {
    /// Two-column input file to align
    #[arg(long)]
    input: PathBuf,
    /// Delimiter separating entry one and entry two in the input file
    #[arg(long, default_value = "\t")]
    delim: String,
    /// Sequence one token delimiter (empty splits per grapheme cluster)
    #[arg(long = "s1_char_delim", default_value = "")]
    s1_char_delim: String,
    /// Sequence two token delimiter
    #[arg(long = "s2_char_delim", default_value = " ")]
    s2_char_delim: String,
    /// Allow deletions in sequence one
    #[arg(long = "seq1_del", default_value_t = true, action = clap::ArgAction::Set)]
    seq1_del: bool,
    /// Allow deletions in sequence two
    #[arg(long = "seq2_del", default_value_t = true, action = clap::ArgAction::Set)]
    seq2_del: bool,
    /// Maximum subsequence length for sequence one
    #[arg(long = "seq1_max", default_value_t = 2)]
    seq1_max: usize,
    /// Maximum subsequence length for sequence two
    #[arg(long = "seq2_max", default_value_t = 2)]
    seq2_max: usize,
    /// Multi-token separator for sequence one subsequences
    #[arg(long = "seq1_sep", default_value = "|")]
    seq1_sep: String,
    /// Multi-token separator for sequence two subsequences
    #[arg(long = "seq2_sep", default_value = "|")]
    seq2_sep: String,
    /// Separator between the two sides of a joint symbol
    #[arg(long = "s1s2_sep", default_value = "}")]
    s1s2_sep: String,
    /// Epsilon symbol
    #[arg(long, default_value = "<eps>")]
    eps: String,
    /// Skip token marking a null transition (distinct from epsilon)
    #[arg(long, default_value = "_")]
    skip: String,
    /// Restrict arcs to 1-N and M-1 subsequence links
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    restrict: bool,
    /// Penalize arc scores before pruning
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    penalize: bool,
    /// Penalize arc scores during EM training
    #[arg(long = "penalize_em", default_value_t = false, action = clap::ArgAction::Set)]
    penalize_em: bool,
    /// Maximum number of EM iterations to perform
    #[arg(long, default_value_t = 11)]
    iter: u32,
    /// Delta threshold for EM termination
    #[arg(long, default_value_t = 1e-10)]
    thresh: f32,
    /// Output the N-best alignments for each entry
    #[arg(long, default_value_t = 1)]
    nbest: usize,
    /// Posterior pruning threshold (-99 disables it)
    #[arg(long, default_value_t = -99.0)]
    pthresh: f32,
    /// Use forward-backward pruning on the alignment lattices
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    fb: bool,
    /// Write the alignment lattices as a keyed FST archive instead of a corpus
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    lattice: bool,
    /// Output file (or archive directory with --lattice)
    #[arg(long)]
    ofile: PathBuf,
    /// If set, serialize the joint-symbol model WFST to this path
    #[arg(long = "write_model", default_value = "")]
    write_model: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let delim = match args.delim.as_bytes() {
        [b] => *b,
        _ => bail!("--delim must be a single byte, got {:?}", args.delim),
    };

    let symbols = SymbolConfig {
        eps: args.eps.clone(),
        skip: args.skip.clone(),
        seq1_sep: args.seq1_sep.clone(),
        seq2_sep: args.seq2_sep.clone(),
        s1s2_sep: args.s1s2_sep.clone(),
        ..Default::default()
    };
    let cfg = AlignerConfig {
        seq1_del: args.seq1_del,
        seq2_del: args.seq2_del,
        seq1_max: args.seq1_max,
        seq2_max: args.seq2_max,
        symbols,
        penalize: args.penalize,
        penalize_em: args.penalize_em,
        restrict: args.restrict,
    };

    let entries = load_dictionary(&args.input, delim, &args.s1_char_delim, &args.s2_char_delim)?;
    if entries.is_empty() {
        bail!("no usable entries in {}", args.input.display());
    }
    info!("loaded {} entries from {}", entries.len(), args.input.display());

    let mut aligner = M2MFstAligner::new(cfg);
    for (seq1, seq2) in &entries {
        aligner.entry_to_alignfst(seq1, seq2)?;
    }

    info!("starting EM");
    aligner.maximization(false)?;
    for i in 1..=args.iter {
        aligner.expectation()?;
        let delta = aligner.maximization(false)?;
        info!(
            "iteration {}: change {:.6e}, total log-likelihood {:.4}",
            i,
            delta,
            aligner.total_log_likelihood()
        );
        if delta < args.thresh {
            info!("converged after {} iterations", i);
            break;
        }
    }
    aligner.expectation()?;
    aligner.maximization(true)?;

    if !args.write_model.is_empty() {
        write_model(&aligner, args.write_model.as_ref())?;
    }

    let pthresh = if args.pthresh == -99.0 {
        TropicalWeight::zero()
    } else {
        TropicalWeight::new(args.pthresh)
    };
    if args.lattice {
        compile_nbest_archive(&aligner, &args.ofile, pthresh, args.nbest, args.fb, args.penalize)?;
    } else {
        write_alignments(&aligner, &args.ofile, pthresh, args.nbest, args.fb, args.penalize)?;
    }
    Ok(())
}
