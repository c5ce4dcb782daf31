//! Decoding of written forms against a trained joint n-gram model WFST.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustfst::algorithms::compose::compose;
use rustfst::algorithms::rm_epsilon::rm_epsilon;
use rustfst::algorithms::{
    project, shortest_path, shortest_path_with_config, tr_sort, ProjectType, ShortestPathConfig,
};
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{ExpandedFst, MutableFst, SerializableFst};
use rustfst::prelude::*;

use alignfst::error::G2pError;
use alignfst::pathfinder::{FstPathFinder, PathData};
use alignfst::symbols::SymbolConfig;

/// How far past the requested N the shortest-path call over-generates, so
/// that duplicate label sequences left by projection still yield enough
/// unique hypotheses.
const NBEST_OVERGEN_FACTOR: usize = 50;
const NBEST_OVERGEN_MIN: usize = 100;

/// Decodes token sequences into ranked pronunciation hypotheses.
///
/// Holds the joint model (arc-sorted on input labels), its symbol tables,
/// and the cluster map recovered from multi-token input symbols. All state
/// is read-only after construction.
pub struct Phoneticizer {
    model: VectorFst<TropicalWeight>,
    isyms: Arc<SymbolTable>,
    osyms: Arc<SymbolTable>,
    clusters: HashMap<Vec<String>, Label>,
    skip_seqs: HashSet<String>,
    symbols: SymbolConfig,
}

impl Phoneticizer {
    /// Load a serialized model WFST. The model must carry both symbol
    /// tables.
    pub fn from_file(path: &Path) -> Result<Self> {
        let model = VectorFst::<TropicalWeight>::read(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        Self::from_fst(model, SymbolConfig::default())
    }

    pub fn from_fst(mut model: VectorFst<TropicalWeight>, symbols: SymbolConfig) -> Result<Self> {
        let isyms = model
            .input_symbols()
            .cloned()
            .ok_or_else(|| anyhow!("model carries no input symbol table"))?;
        let osyms = model
            .output_symbols()
            .cloned()
            .ok_or_else(|| anyhow!("model carries no output symbol table"))?;
        tr_sort(&mut model, ILabelCompare {});

        let skip_seqs = symbols.skip_set();
        let mut clusters = HashMap::new();
        for (label, sym) in isyms.iter() {
            if skip_seqs.contains(sym) || !sym.contains(symbols.tie.as_str()) {
                continue;
            }
            let tokens: Vec<String> = sym
                .split(symbols.tie.as_str())
                .map(|t| t.to_string())
                .collect();
            clusters.insert(tokens, label);
        }

        Ok(Self {
            model,
            isyms,
            osyms,
            clusters,
            skip_seqs,
            symbols,
        })
    }

    pub fn clusters(&self) -> &HashMap<Vec<String>, Label> {
        &self.clusters
    }

    pub fn isyms(&self) -> &SymbolTable {
        &self.isyms
    }

    /// Build the linear acceptor for an entry, with one extra arc per
    /// occurrence of each cluster bridging the states its tokens span.
    /// Overlapping occurrences each get their own arc.
    pub fn entry_to_fsa(&self, tokens: &[String]) -> Result<VectorFst<TropicalWeight>> {
        let mut fst = VectorFst::<TropicalWeight>::new();
        fst.add_states(tokens.len() + 3);
        fst.set_start(0)?;

        let sb = self.lookup(&self.symbols.sent_begin)?;
        fst.add_tr(0, Tr::new(sb, sb, 0.0, 1))?;

        // The basic token chain.
        for (i, token) in tokens.iter().enumerate() {
            let label = self.lookup(token)?;
            fst.add_tr(
                (i + 1) as StateId,
                Tr::new(label, label, 0.0, (i + 2) as StateId),
            )?;
        }

        // Cluster arcs bypass the per-token arcs they cover.
        for (cluster, &label) in &self.clusters {
            if cluster.len() > tokens.len() {
                continue;
            }
            for p in 0..=tokens.len() - cluster.len() {
                if &tokens[p..p + cluster.len()] == cluster.as_slice() {
                    fst.add_tr(
                        (p + 1) as StateId,
                        Tr::new(label, label, 0.0, (p + 1 + cluster.len()) as StateId),
                    )?;
                }
            }
        }

        let se = self.lookup(&self.symbols.sent_end)?;
        let last = (tokens.len() + 1) as StateId;
        fst.add_tr(last, Tr::new(se, se, 0.0, last + 1))?;
        fst.set_final(last + 1, 0.0)?;
        Ok(fst)
    }

    /// Compose an entry with the model and enumerate pronunciation
    /// hypotheses in ascending cost order. An entry the model cannot accept
    /// yields an empty list.
    pub fn phoneticize(&self, tokens: &[String], nbest: usize) -> Result<Vec<PathData>> {
        let mut fsa = self.entry_to_fsa(tokens)?;
        tr_sort(&mut fsa, OLabelCompare {});
        let mut lattice: VectorFst<TropicalWeight> =
            compose::<TropicalWeight, VectorFst<_>, VectorFst<_>, VectorFst<_>, _, _>(
                &fsa,
                &self.model,
            )?;
        if lattice.num_states() == 0 {
            return Ok(Vec::new());
        }
        project(&mut lattice, ProjectType::ProjectOutput);

        let mut shortest: VectorFst<TropicalWeight> = if nbest > 1 {
            shortest_path_with_config(
                &lattice,
                ShortestPathConfig {
                    nshortest: (nbest * NBEST_OVERGEN_FACTOR).max(NBEST_OVERGEN_MIN),
                    ..Default::default()
                },
            )?
        } else {
            shortest_path(&lattice)?
        };
        rm_epsilon(&mut shortest)?;

        let finder = FstPathFinder::new(self.skip_seqs.clone());
        finder.find_all_strings(&shortest, &self.osyms)
    }

    fn lookup(&self, token: &str) -> Result<Label> {
        self.isyms
            .get_label(token)
            .ok_or_else(|| G2pError::UnknownInputSymbol(token.to_string()).into())
    }
}

/// Render the first `nbest` unique hypotheses as output lines. Tie
/// characters inside a token become spaces, tokens are joined by single
/// spaces, and an optional reference is appended.
pub fn render_paths(
    paths: &[PathData],
    nbest: usize,
    symbols: &SymbolConfig,
    reference: Option<&str>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for p in paths {
        if lines.len() >= nbest {
            break;
        }
        let rendered = p
            .path
            .iter()
            .map(|tok| tok.replace(symbols.tie.as_str(), " "))
            .collect::<Vec<String>>()
            .join(" ");
        if !seen.insert(rendered.clone()) {
            continue;
        }
        match reference {
            Some(r) => lines.push(format!("{}\t{}\t{}", p.cost, rendered, r)),
            None => lines.push(format!("{}\t{}", p.cost, rendered)),
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// A toy joint model accepting `<s> (t h | t|h | a) </s>` and emitting
    /// upper-case phones. The direct `t|h` arc is cheaper than the
    /// two-token route, and `a` has three competing outputs.
    fn toy_model() -> Phoneticizer {
        let mut isyms = SymbolTable::new();
        let sb = isyms.add_symbol("<s>");
        let se = isyms.add_symbol("</s>");
        let t = isyms.add_symbol("t");
        let h = isyms.add_symbol("h");
        let th = isyms.add_symbol("t|h");
        let a = isyms.add_symbol("a");

        let mut osyms = SymbolTable::new();
        let osb = osyms.add_symbol("<s>");
        let ose = osyms.add_symbol("</s>");
        let cap_t = osyms.add_symbol("T");
        let cap_h = osyms.add_symbol("H");
        let cap_th = osyms.add_symbol("TH");
        let cap_a = osyms.add_symbol("A");
        let cap_b = osyms.add_symbol("B");
        let cap_e = osyms.add_symbol("E");

        let mut model = VectorFst::<TropicalWeight>::new();
        let s0 = model.add_state();
        let s1 = model.add_state();
        let s2 = model.add_state();
        model.set_start(s0).expect("Test assertion failed");
        model
            .add_tr(s0, Tr::new(sb, osb, 0.0, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(t, cap_t, 1.0, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(h, cap_h, 1.0, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(th, cap_th, 0.5, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(a, cap_a, 0.1, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(a, cap_b, 0.2, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(a, cap_e, 5.0, s1))
            .expect("Test assertion failed");
        model
            .add_tr(s1, Tr::new(se, ose, 0.0, s2))
            .expect("Test assertion failed");
        model.set_final(s2, 0.0).expect("Test assertion failed");
        model.set_input_symbols(Arc::new(isyms));
        model.set_output_symbols(Arc::new(osyms));

        Phoneticizer::from_fst(model, SymbolConfig::default()).expect("Test assertion failed")
    }

    #[test]
    fn test_cluster_map_is_recovered_from_symbols() {
        let decoder = toy_model();
        assert_eq!(decoder.clusters().len(), 1);
        let th = decoder
            .isyms()
            .get_label("t|h")
            .expect("Test assertion failed");
        assert_eq!(decoder.clusters()[&strs(&["t", "h"])], th);
    }

    #[test]
    fn test_entry_fsa_has_cluster_arc() {
        let decoder = toy_model();
        let tokens = strs(&["t", "h", "a"]);
        let fsa = decoder.entry_to_fsa(&tokens).expect("Test assertion failed");
        assert_eq!(fsa.num_states(), 6);

        let th = decoder
            .isyms()
            .get_label("t|h")
            .expect("Test assertion failed");
        let mut cluster_arcs = Vec::new();
        for q in 0..fsa.num_states() as StateId {
            for tr in fsa.get_trs(q).expect("Test assertion failed").iter() {
                if tr.ilabel == th {
                    cluster_arcs.push((q, tr.nextstate));
                }
            }
        }
        // Exactly one occurrence of the cluster, bridging states 1 and 3.
        assert_eq!(cluster_arcs, vec![(1, 3)]);
    }

    #[test]
    fn test_phoneticize_prefers_cluster_path() {
        let decoder = toy_model();
        let paths = decoder
            .phoneticize(&strs(&["t", "h"]), 1)
            .expect("Test assertion failed");
        assert!(!paths.is_empty());
        assert_eq!(paths[0].path, strs(&["TH"]));
        assert!((paths[0].cost - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nbest_orders_by_cost() {
        let decoder = toy_model();
        let paths = decoder
            .phoneticize(&strs(&["a"]), 2)
            .expect("Test assertion failed");
        let lines = render_paths(&paths, 2, &SymbolConfig::default(), None);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("\tA"), "got {:?}", lines[0]);
        assert!(lines[1].ends_with("\tB"), "got {:?}", lines[1]);

        let single = render_paths(&paths, 1, &SymbolConfig::default(), None);
        assert_eq!(single.len(), 1);
        assert!(single[0].ends_with("\tA"));
    }

    #[test]
    fn test_no_skip_symbols_in_output() {
        let decoder = toy_model();
        let paths = decoder
            .phoneticize(&strs(&["t", "h", "a"]), 5)
            .expect("Test assertion failed");
        for p in &paths {
            for tok in &p.path {
                assert!(!["<s>", "</s>", "<eps>", "_"].contains(&tok.as_str()));
            }
        }
    }

    #[test]
    fn test_unknown_token_is_an_error() {
        let decoder = toy_model();
        let err = decoder
            .phoneticize(&strs(&["z"]), 1)
            .expect_err("unknown token must fail");
        match err.downcast_ref::<G2pError>() {
            Some(G2pError::UnknownInputSymbol(tok)) => assert_eq!(tok, "z"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_render_replaces_tie_and_appends_reference() {
        let paths = vec![PathData {
            cost: 0.25,
            path: strs(&["A|B", "C"]),
        }];
        let lines = render_paths(&paths, 1, &SymbolConfig::default(), Some("A B C"));
        assert_eq!(lines, vec!["0.25\tA B C\tA B C".to_string()]);
    }

    #[test]
    fn test_duplicate_renderings_are_collapsed() {
        let paths = vec![
            PathData {
                cost: 0.1,
                path: strs(&["A"]),
            },
            PathData {
                cost: 0.2,
                path: strs(&["A"]),
            },
            PathData {
                cost: 0.3,
                path: strs(&["B"]),
            },
        ];
        let lines = render_paths(&paths, 2, &SymbolConfig::default(), None);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0.1\t"));
        assert!(lines[1].starts_with("0.3\t"));
    }
}
