//! N-best and posterior pruning of tropical-semiring alignment lattices.

use std::collections::HashMap;

use anyhow::Result;
use rustfst::algorithms::{connect, shortest_distance, shortest_path_with_config, ShortestPathConfig};
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{CoreFst, MutableFst};
use rustfst::prelude::*;

/// Prunes a lattice in place so only good arcs remain.
///
/// The steps apply in a fixed order: penalty re-weighting, n-shortest
/// restriction, forward-backward posterior pruning, posterior threshold
/// pruning. A threshold equal to `Zero` (infinite cost) disables the
/// threshold filter.
pub struct LatticePruner {
    penalties: HashMap<Label, f32>,
    threshold: TropicalWeight,
    nbest: usize,
    fb: bool,
    penalize: bool,
}

impl LatticePruner {
    pub fn new(
        penalties: HashMap<Label, f32>,
        threshold: TropicalWeight,
        nbest: usize,
        fb: bool,
        penalize: bool,
    ) -> Self {
        Self {
            penalties,
            threshold,
            nbest,
            fb,
            penalize,
        }
    }

    pub fn prune(&self, fst: &mut VectorFst<TropicalWeight>) -> Result<()> {
        if fst.start().is_none() {
            return Ok(());
        }
        if self.penalize {
            self.penalize_arcs(fst)?;
        }
        if self.nbest > 1 {
            self.nbest_prune(fst)?;
        }
        if self.fb {
            self.posterior_prune(fst)?;
        }
        if self.threshold != TropicalWeight::zero() {
            self.posterior_prune(fst)?;
        }
        Ok(())
    }

    /// Add the per-label penalty onto every arc weight.
    fn penalize_arcs(&self, fst: &mut VectorFst<TropicalWeight>) -> Result<()> {
        let states: Vec<StateId> = fst.states_iter().collect();
        for q in states {
            let mut trs = fst.tr_iter_mut(q)?;
            for i in 0..trs.len() {
                let (label, weight) = match trs.get(i) {
                    Some(tr) => (tr.ilabel, *tr.weight.value()),
                    None => continue,
                };
                let penalty = self.penalties.get(&label).copied().unwrap_or(0.0);
                trs.set_weight(i, TropicalWeight::new(weight + penalty))?;
            }
        }
        Ok(())
    }

    /// Restrict the lattice to its n shortest paths.
    fn nbest_prune(&self, fst: &mut VectorFst<TropicalWeight>) -> Result<()> {
        let shortest: VectorFst<TropicalWeight> = shortest_path_with_config(
            fst,
            ShortestPathConfig {
                nshortest: self.nbest,
                ..Default::default()
            },
        )?;
        *fst = shortest;
        Ok(())
    }

    /// Drop every arc whose posterior cost exceeds the threshold.
    ///
    /// The posterior of an arc `s -> t` with weight `w` is
    /// `alpha(s) + w + beta(t) - beta(start)`: zero on a best path, positive
    /// elsewhere. A lattice whose best path has infinite cost empties out.
    fn posterior_prune(&self, fst: &mut VectorFst<TropicalWeight>) -> Result<()> {
        let Some(start) = fst.start() else {
            return Ok(());
        };
        let alpha: Vec<TropicalWeight> = shortest_distance(fst, false)?;
        let beta: Vec<TropicalWeight> = shortest_distance(fst, true)?;
        let best = beta
            .get(start as usize)
            .copied()
            .unwrap_or_else(TropicalWeight::zero);
        if best == TropicalWeight::zero() {
            *fst = VectorFst::new();
            return Ok(());
        }
        let bound = if self.threshold == TropicalWeight::zero() {
            f32::INFINITY
        } else {
            *self.threshold.value()
        };

        let states: Vec<StateId> = fst.states_iter().collect();
        for q in states {
            let a = alpha
                .get(q as usize)
                .copied()
                .unwrap_or_else(TropicalWeight::zero);
            let kept: Vec<Tr<TropicalWeight>> = fst
                .get_trs(q)?
                .iter()
                .filter(|tr| {
                    let b = beta
                        .get(tr.nextstate as usize)
                        .copied()
                        .unwrap_or_else(TropicalWeight::zero);
                    let posterior =
                        *a.value() + *tr.weight.value() + *b.value() - *best.value();
                    posterior <= bound
                })
                .cloned()
                .collect();
            fst.delete_trs(q)?;
            for tr in kept {
                fst.add_tr(q, tr)?;
            }
        }
        connect(fst)?;
        Ok(())
    }
}
