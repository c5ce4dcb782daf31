//! Many-to-many EM alignment of dictionary pairs over log-semiring FSTs.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use log::warn;
use rustfst::algorithms::{connect, shortest_distance};
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{CoreFst, ExpandedFst, MutableFst};
use rustfst::prelude::*;

use crate::symbols::SymbolConfig;

/// Construction-time knobs for the aligner.
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    /// Allow arcs that consume nothing from the written side.
    pub seq1_del: bool,
    /// Allow arcs that consume nothing from the spoken side.
    pub seq2_del: bool,
    /// Longest written-side subsequence an arc may consume.
    pub seq1_max: usize,
    /// Longest spoken-side subsequence an arc may consume.
    pub seq2_max: usize,
    pub symbols: SymbolConfig,
    /// Derive per-label penalties after the final M-step.
    pub penalize: bool,
    /// Apply the penalties to arc weights during the E-step as well.
    pub penalize_em: bool,
    /// Forbid arcs that consume more than one token on both sides.
    pub restrict: bool,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            seq1_del: true,
            seq2_del: true,
            seq1_max: 2,
            seq2_max: 2,
            symbols: SymbolConfig::default(),
            penalize: true,
            penalize_em: false,
            restrict: true,
        }
    }
}

/// Learns joint subsequence probabilities with EM over per-pair alignment
/// lattices.
///
/// Each training pair becomes a grid-shaped acceptor whose arcs carry joint
/// symbols (`X}Y`). Arc topology is fixed at construction; EM only rewrites
/// arc weights. `expectation` accumulates posterior counts into a shared
/// table, `maximization` normalizes the table into the next model iterate.
pub struct M2MFstAligner {
    cfg: AlignerConfig,
    isyms: SymbolTable,
    fsas: Vec<VectorFst<LogWeight>>,
    /// Expected counts accumulated during the E-step, keyed by joint label.
    alignment_model: HashMap<Label, LogWeight>,
    /// Normalized model from the last M-step.
    prev_alignment_model: HashMap<Label, LogWeight>,
    /// Log-semiring normalizer for the M-step.
    total: LogWeight,
    penalties: HashMap<Label, f32>,
    skip_seqs: HashSet<String>,
    total_log_likelihood: f32,
}

impl M2MFstAligner {
    pub fn new(cfg: AlignerConfig) -> Self {
        let skip_seqs = cfg.symbols.skip_set();
        Self {
            cfg,
            isyms: SymbolTable::new(),
            fsas: Vec::new(),
            alignment_model: HashMap::new(),
            prev_alignment_model: HashMap::new(),
            total: LogWeight::zero(),
            penalties: HashMap::new(),
            skip_seqs,
            total_log_likelihood: 0.0,
        }
    }

    pub fn isyms(&self) -> &SymbolTable {
        &self.isyms
    }

    pub fn fsas(&self) -> &[VectorFst<LogWeight>] {
        &self.fsas
    }

    pub fn model(&self) -> &HashMap<Label, LogWeight> {
        &self.prev_alignment_model
    }

    pub fn penalties(&self) -> &HashMap<Label, f32> {
        &self.penalties
    }

    pub fn skip_seqs(&self) -> &HashSet<String> {
        &self.skip_seqs
    }

    /// Total log-likelihood of the corpus under the model used by the most
    /// recent E-step. Non-decreasing across EM iterations.
    pub fn total_log_likelihood(&self) -> f32 {
        self.total_log_likelihood
    }

    /// Build the alignment lattice for one training pair and append it.
    ///
    /// States form the grid `(i, j)` with `0 <= i <= |seq1|`,
    /// `0 <= j <= |seq2|`, encoded as `i * (|seq2| + 1) + j`. Every arc
    /// carries a joint symbol as both input and output label. A pair the
    /// configured operations cannot cover ends up as an empty lattice, which
    /// later stages skip.
    pub fn entry_to_alignfst(&mut self, seq1: &[String], seq2: &[String]) -> Result<()> {
        let cols = seq2.len() + 1;
        let mut fst = VectorFst::<LogWeight>::new();
        fst.add_states((seq1.len() + 1) * cols);

        for i in 0..=seq1.len() {
            for j in 0..=seq2.len() {
                let istate = (i * cols + j) as StateId;

                // Skip arcs on the written side: consume spoken tokens only.
                if self.cfg.seq1_del {
                    for n in 1..=self.cfg.seq2_max {
                        if j + n > seq2.len() {
                            break;
                        }
                        let label = self.intern_joint(&[], &seq2[j..j + n]);
                        let ostate = (i * cols + j + n) as StateId;
                        fst.add_tr(istate, Tr::new(label, label, LogWeight::one(), ostate))?;
                    }
                }

                // Skip arcs on the spoken side: consume written tokens only.
                if self.cfg.seq2_del {
                    for m in 1..=self.cfg.seq1_max {
                        if i + m > seq1.len() {
                            break;
                        }
                        let label = self.intern_joint(&seq1[i..i + m], &[]);
                        let ostate = ((i + m) * cols + j) as StateId;
                        fst.add_tr(istate, Tr::new(label, label, LogWeight::one(), ostate))?;
                    }
                }

                // Substantive arcs consuming both sides.
                for m in 1..=self.cfg.seq1_max {
                    for n in 1..=self.cfg.seq2_max {
                        if self.cfg.restrict && m > 1 && n > 1 {
                            continue;
                        }
                        if i + m > seq1.len() || j + n > seq2.len() {
                            continue;
                        }
                        let label = self.intern_joint(&seq1[i..i + m], &seq2[j..j + n]);
                        let ostate = ((i + m) * cols + j + n) as StateId;
                        fst.add_tr(istate, Tr::new(label, label, LogWeight::one(), ostate))?;
                    }
                }
            }
        }

        fst.set_start(0)?;
        fst.set_final(((seq1.len() + 1) * cols - 1) as StateId, LogWeight::one())?;
        connect(&mut fst)?;

        if fst.num_states() == 0 {
            warn!(
                "pair {} admits no alignment path under the current deletion settings",
                self.fsas.len() + 1
            );
            self.fsas.push(fst);
            return Ok(());
        }

        // Give each state a uniform distribution over its surviving arcs and
        // seed the expected-count table with those weights, so the first
        // M-step normalizes the uniform initialization.
        let states: Vec<StateId> = fst.states_iter().collect();
        for q in states {
            let degree = fst.num_trs(q)?;
            if degree == 0 {
                continue;
            }
            let w = LogWeight::new((degree as f32).ln());
            let mut trs = fst.tr_iter_mut(q)?;
            for i in 0..trs.len() {
                trs.set_weight(i, w)?;
            }
        }
        for q in 0..fst.num_states() as StateId {
            for tr in fst.get_trs(q)?.iter() {
                let count = self
                    .alignment_model
                    .entry(tr.ilabel)
                    .or_insert_with(LogWeight::zero);
                count.plus_assign(tr.weight)?;
                self.total.plus_assign(tr.weight)?;
            }
        }

        self.fsas.push(fst);
        Ok(())
    }

    /// E-step: rewrite every arc weight from the current model, then
    /// accumulate arc posteriors into the expected-count table.
    pub fn expectation(&mut self) -> Result<()> {
        self.total_log_likelihood = 0.0;
        for idx in 0..self.fsas.len() {
            let fst = &mut self.fsas[idx];
            let Some(start) = fst.start() else {
                continue;
            };

            let states: Vec<StateId> = fst.states_iter().collect();
            for &q in &states {
                let mut trs = fst.tr_iter_mut(q)?;
                for i in 0..trs.len() {
                    let label = match trs.get(i) {
                        Some(tr) => tr.ilabel,
                        None => continue,
                    };
                    let mut w = self
                        .prev_alignment_model
                        .get(&label)
                        .copied()
                        .unwrap_or_else(LogWeight::zero);
                    if self.cfg.penalize_em {
                        if let Some(p) = self.penalties.get(&label) {
                            w = LogWeight::new(*w.value() + p);
                        }
                    }
                    trs.set_weight(i, w)?;
                }
            }

            let alpha: Vec<LogWeight> = shortest_distance(fst, false)?;
            let beta: Vec<LogWeight> = shortest_distance(fst, true)?;
            let b0 = beta
                .get(start as usize)
                .copied()
                .unwrap_or_else(LogWeight::zero);
            if b0 == LogWeight::zero() {
                warn!("pair {} carried no probability mass; skipping", idx + 1);
                continue;
            }
            self.total_log_likelihood += -*b0.value();

            for &q in &states {
                let a = alpha
                    .get(q as usize)
                    .copied()
                    .unwrap_or_else(LogWeight::zero);
                for tr in fst.get_trs(q)?.iter() {
                    let b = beta
                        .get(tr.nextstate as usize)
                        .copied()
                        .unwrap_or_else(LogWeight::zero);
                    let gamma = a
                        .times(tr.weight)?
                        .times(b)?
                        .divide(&b0, DivideType::DivideAny)?;
                    if gamma.value().is_nan() {
                        continue;
                    }
                    let count = self
                        .alignment_model
                        .entry(tr.ilabel)
                        .or_insert_with(LogWeight::zero);
                    count.plus_assign(gamma)?;
                    self.total.plus_assign(gamma)?;
                }
            }
        }
        Ok(())
    }

    /// M-step: normalize the expected counts into the next model iterate and
    /// return the summed absolute change against the previous one.
    ///
    /// On the last iteration, with penalization enabled, derives per-label
    /// penalty weights from the final probabilities.
    pub fn maximization(&mut self, last: bool) -> Result<f32> {
        let mut delta = 0.0f32;
        let labels: Vec<Label> = self.alignment_model.keys().copied().collect();
        for label in labels {
            let count = self.alignment_model[&label];
            let next = count.divide(&self.total, DivideType::DivideAny)?;
            let prev = self
                .prev_alignment_model
                .get(&label)
                .copied()
                .unwrap_or_else(LogWeight::zero);
            let change = (*next.value() - *prev.value()).abs();
            if change.is_finite() {
                delta += change;
            } else {
                delta = f32::INFINITY;
            }
            self.prev_alignment_model.insert(label, next);
            self.alignment_model.insert(label, LogWeight::zero());
        }
        self.total = LogWeight::zero();

        if last && self.cfg.penalize {
            self.compute_penalties();
        }
        Ok(delta)
    }

    /// Penalty weights bias pruning toward short, probable alignments: an
    /// arc spanning `k` tokens on its longer side pays `k - 1` extra copies
    /// of its own cost, and pure deletions pay one extra copy.
    fn compute_penalties(&mut self) {
        self.penalties.clear();
        for (&label, w) in &self.prev_alignment_model {
            let Some(sym) = self.isyms.get_symbol(label) else {
                continue;
            };
            let (m, n) = self.cfg.symbols.joint_arity(sym);
            let cost = *w.value();
            let penalty = if m == 0 || n == 0 {
                cost
            } else {
                cost * (m.max(n) as f32 - 1.0)
            };
            if penalty != 0.0 {
                self.penalties.insert(label, penalty);
            }
        }
    }

    fn intern_joint(&mut self, s1: &[String], s2: &[String]) -> Label {
        let sym = self.cfg.symbols.joint_symbol(s1, s2);
        self.isyms.add_symbol(sym)
    }
}
