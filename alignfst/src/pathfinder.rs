//! Exhaustive path enumeration over acyclic result lattices.

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use log::warn;
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{CoreFst, ExpandedFst};
use rustfst::prelude::*;

use crate::error::G2pError;

/// One accepting path: total tropical cost plus the output token sequence
/// with skip symbols removed.
#[derive(Debug, Clone, PartialEq)]
pub struct PathData {
    pub cost: f32,
    pub path: Vec<String>,
}

/// Enumerates every distinct label sequence of an acyclic lattice.
///
/// The caller is expected to have applied epsilon removal and whatever
/// pruning it wants beforehand; a cycle in the input is reported as
/// [`G2pError::CyclicLattice`] rather than looping forever.
pub struct FstPathFinder {
    skip_seqs: HashSet<String>,
}

impl FstPathFinder {
    pub fn new(skip_seqs: HashSet<String>) -> Self {
        Self { skip_seqs }
    }

    /// Walk all paths from the start state to any final state, accumulating
    /// output labels and costs. Paths are returned in ascending cost order.
    pub fn find_all_strings(
        &self,
        fst: &VectorFst<TropicalWeight>,
        syms: &SymbolTable,
    ) -> Result<Vec<PathData>> {
        let mut paths = Vec::new();
        let Some(start) = fst.start() else {
            return Ok(paths);
        };
        let mut on_path = vec![false; fst.num_states()];
        let mut prefix: Vec<String> = Vec::new();
        self.visit(fst, syms, start, 0.0, &mut prefix, &mut on_path, &mut paths)?;
        paths.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(Ordering::Equal));
        Ok(paths)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        fst: &VectorFst<TropicalWeight>,
        syms: &SymbolTable,
        state: StateId,
        cost: f32,
        prefix: &mut Vec<String>,
        on_path: &mut [bool],
        paths: &mut Vec<PathData>,
    ) -> Result<()> {
        if on_path[state as usize] {
            return Err(G2pError::CyclicLattice.into());
        }
        on_path[state as usize] = true;

        if let Some(w) = fst.final_weight(state)? {
            paths.push(PathData {
                cost: cost + *w.value(),
                path: prefix.clone(),
            });
        }

        for tr in fst.get_trs(state)?.iter() {
            let pushed = match syms.get_symbol(tr.olabel) {
                Some(sym) if !self.skip_seqs.contains(sym) => {
                    prefix.push(sym.to_string());
                    true
                }
                Some(_) => false,
                None => {
                    warn!("output label {} missing from symbol table", tr.olabel);
                    false
                }
            };
            self.visit(
                fst,
                syms,
                tr.nextstate,
                cost + *tr.weight.value(),
                prefix,
                on_path,
                paths,
            )?;
            if pushed {
                prefix.pop();
            }
        }

        on_path[state as usize] = false;
        Ok(())
    }
}
