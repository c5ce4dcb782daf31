//! Dictionary ingest and the three output surfaces of the aligner: the flat
//! aligned corpus, the keyed lattice archive, and the serialized joint model.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use rustfst::algorithms::rm_epsilon::rm_epsilon;
use rustfst::algorithms::{push_weights_with_config, shortest_path, PushWeightsConfig, ReweightType};
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{CoreFst, ExpandedFst, MutableFst, SerializableFst};
use rustfst::prelude::*;
use unicode_segmentation::UnicodeSegmentation;

use crate::aligner::M2MFstAligner;
use crate::pathfinder::FstPathFinder;
use crate::pruner::LatticePruner;
use crate::semiring::{log_to_tropical, tropical_to_log};

/// Width of the zero-padded keys in the lattice archive.
const ARCHIVE_KEY_WIDTH: usize = 7;

/// Read a two-column dictionary file into token-sequence pairs.
///
/// Lines without both fields are skipped with a warning naming the line. An
/// empty character delimiter splits the field into Unicode grapheme
/// clusters.
pub fn load_dictionary(
    path: &Path,
    delim: u8,
    s1_char_delim: &str,
    s2_char_delim: &str,
) -> Result<Vec<(Vec<String>, Vec<String>)>> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delim)
        .flexible(true)
        .from_reader(file);

    let mut data = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() < 2 {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            warn!("skipping malformed input at line {}", line);
            continue;
        }
        let seq1 = split_field(&record[0], s1_char_delim);
        let seq2 = split_field(&record[1], s2_char_delim);
        if seq1.is_empty() && seq2.is_empty() {
            continue;
        }
        data.push((seq1, seq2));
    }
    Ok(data)
}

fn split_field(field: &str, char_delim: &str) -> Vec<String> {
    if char_delim.is_empty() {
        field.graphemes(true).map(|g| g.to_string()).collect()
    } else {
        field
            .split(char_delim)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

/// Write the pruned 1-best (or n-best) alignments as a flat text corpus,
/// one joint-symbol line per surviving path.
pub fn write_alignments(
    aligner: &M2MFstAligner,
    ofile: &Path,
    threshold: TropicalWeight,
    nbest: usize,
    fb: bool,
    penalize: bool,
) -> Result<()> {
    let pruner = LatticePruner::new(aligner.penalties().clone(), threshold, nbest, fb, penalize);
    let finder = FstPathFinder::new(aligner.skip_seqs().clone());
    let mut out = BufWriter::new(File::create(ofile)?);

    let mut written = 0usize;
    for (idx, lfst) in aligner.fsas().iter().enumerate() {
        let mut tfst = log_to_tropical(lfst)?;
        pruner.prune(&mut tfst)?;
        if nbest <= 1 && tfst.num_states() > 0 {
            // The pruner only restricts for N > 1; extract the single best
            // path here rather than enumerating the whole lattice.
            tfst = shortest_path(&tfst)?;
        }
        rm_epsilon(&mut tfst)?;
        if tfst.num_states() == 0 {
            // The pair needed a skip the flags forbade, or pruning removed
            // every path.
            warn!("no alignment for pair {}; skipping", idx + 1);
            continue;
        }
        let paths = finder.find_all_strings(&tfst, aligner.isyms())?;
        for p in paths.iter().take(nbest.max(1)) {
            writeln!(out, "{}", p.path.join(" "))?;
            written += 1;
        }
    }
    info!("wrote {} aligned entries to {}", written, ofile.display());
    Ok(())
}

/// Compile the pruned lattices into a keyed archive directory.
///
/// Each lattice is posterior-normalized by pushing weights to the final
/// states in the log semiring and resetting the final weights to `One`, so
/// arc weights carry the whole path score. Keys are 1-based, zero-padded
/// input indexes.
pub fn compile_nbest_archive(
    aligner: &M2MFstAligner,
    dir: &Path,
    threshold: TropicalWeight,
    nbest: usize,
    fb: bool,
    penalize: bool,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let pruner = LatticePruner::new(aligner.penalties().clone(), threshold, nbest, fb, penalize);
    let symt = Arc::new(aligner.isyms().clone());

    for (idx, lfst) in aligner.fsas().iter().enumerate() {
        let mut tfst = log_to_tropical(lfst)?;
        pruner.prune(&mut tfst)?;
        rm_epsilon(&mut tfst)?;

        let mut ffst = if tfst.num_states() == 0 {
            warn!("pair {} pruned to an empty lattice", idx + 1);
            tfst
        } else {
            let mut pfst = tropical_to_log(&tfst)?;
            push_weights_with_config(
                &mut pfst,
                ReweightType::ReweightToFinal,
                PushWeightsConfig::default(),
            )?;
            let states: Vec<StateId> = pfst.states_iter().collect();
            for q in states {
                if pfst.final_weight(q)?.is_some() {
                    pfst.set_final(q, LogWeight::one())?;
                }
            }
            log_to_tropical(&pfst)?
        };
        ffst.set_input_symbols(Arc::clone(&symt));
        ffst.set_output_symbols(Arc::clone(&symt));

        let key = format!("{:0width$}", idx + 1, width = ARCHIVE_KEY_WIDTH);
        ffst.write(dir.join(format!("{key}.fst")))?;
    }
    info!(
        "archived {} alignment lattices under {}",
        aligner.fsas().len(),
        dir.display()
    );
    Ok(())
}

/// Serialize the trained joint model as a single-state WFST with one
/// self-arc per joint symbol, weighted by its final log probability.
pub fn write_model(aligner: &M2MFstAligner, path: &Path) -> Result<()> {
    let mut model = VectorFst::<LogWeight>::new();
    let s = model.add_state();
    model.set_start(s)?;
    model.set_final(s, LogWeight::one())?;
    let mut labels: Vec<Label> = aligner.model().keys().copied().collect();
    labels.sort_unstable();
    for label in labels {
        let w = aligner.model()[&label];
        model.add_tr(s, Tr::new(label, label, w, s))?;
    }
    let symt = Arc::new(aligner.isyms().clone());
    model.set_input_symbols(Arc::clone(&symt));
    model.set_output_symbols(symt);
    model.write(path)?;
    info!("wrote alignment model to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_load_dictionary_splits_fields() {
        let dir = tempfile::tempdir().expect("Test assertion failed");
        let path = dir.path().join("dict");
        let mut f = File::create(&path).expect("Test assertion failed");
        writeln!(f, "abc\tx y z").expect("Test assertion failed");
        writeln!(f, "at\ta").expect("Test assertion failed");
        drop(f);

        let data = load_dictionary(&path, b'\t', "", " ").expect("Test assertion failed");
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].0, vec!["a", "b", "c"]);
        assert_eq!(data[0].1, vec!["x", "y", "z"]);
        assert_eq!(data[1].0, vec!["a", "t"]);
        assert_eq!(data[1].1, vec!["a"]);
    }

    #[test]
    fn test_load_dictionary_skips_malformed_lines() {
        let dir = tempfile::tempdir().expect("Test assertion failed");
        let path = dir.path().join("dict");
        let mut f = File::create(&path).expect("Test assertion failed");
        writeln!(f, "abc\tx y z").expect("Test assertion failed");
        writeln!(f, "no-pronunciation-field").expect("Test assertion failed");
        writeln!(f, "at\ta").expect("Test assertion failed");
        drop(f);

        let data = load_dictionary(&path, b'\t', "", " ").expect("Test assertion failed");
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_archive_uses_padded_keys() {
        use crate::aligner::{AlignerConfig, M2MFstAligner};

        let mut aligner = M2MFstAligner::new(AlignerConfig::default());
        for (s1, s2) in [
            (vec!["a".to_string()], vec!["x".to_string()]),
            (vec!["b".to_string()], vec!["y".to_string()]),
        ] {
            aligner.entry_to_alignfst(&s1, &s2).expect("Test assertion failed");
        }
        aligner.maximization(false).expect("Test assertion failed");
        aligner.expectation().expect("Test assertion failed");
        aligner.maximization(true).expect("Test assertion failed");

        let dir = tempfile::tempdir().expect("Test assertion failed");
        let archive = dir.path().join("lattices");
        compile_nbest_archive(&aligner, &archive, TropicalWeight::zero(), 1, false, true)
            .expect("Test assertion failed");
        assert!(archive.join("0000001.fst").is_file());
        assert!(archive.join("0000002.fst").is_file());
    }

    #[test]
    fn test_grapheme_splitting_handles_combining_marks() {
        // A combining acute accent stays attached to its base character.
        let tokens = split_field("cafe\u{0301}", "");
        assert_eq!(tokens, vec!["c", "a", "f", "e\u{0301}"]);
    }
}
