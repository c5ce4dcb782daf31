use std::collections::HashSet;

/// Distinguished symbols threaded through the aligner and decoder.
///
/// Joint subsequence symbols have the form `X}Y`, where `X` is a run of
/// input-side tokens joined by `seq1_sep` (or the skip marker when the run is
/// empty) and `Y` is the analogous output-side run. `<s>` and `</s>` are the
/// sentence markers a downstream joint n-gram model wraps entries with, and
/// `tie` joins the tokens of a multi-token cluster symbol such as `a|b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolConfig {
    pub eps: String,
    pub skip: String,
    pub seq1_sep: String,
    pub seq2_sep: String,
    pub s1s2_sep: String,
    pub sent_begin: String,
    pub sent_end: String,
    pub tie: String,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            eps: "<eps>".to_string(),
            skip: "_".to_string(),
            seq1_sep: "|".to_string(),
            seq2_sep: "|".to_string(),
            s1s2_sep: "}".to_string(),
            sent_begin: "<s>".to_string(),
            sent_end: "</s>".to_string(),
            tie: "|".to_string(),
        }
    }
}

impl SymbolConfig {
    /// The symbols filtered from all user-visible output.
    pub fn skip_set(&self) -> HashSet<String> {
        let mut set = HashSet::new();
        set.insert(self.eps.clone());
        set.insert(self.skip.clone());
        set.insert(self.sent_begin.clone());
        set.insert(self.sent_end.clone());
        set.insert("-".to_string());
        set
    }

    /// Build the joint symbol for a pair of subsequences. An empty slice on
    /// either side is rendered as the skip marker; at most one side may be
    /// empty.
    pub fn joint_symbol(&self, s1: &[String], s2: &[String]) -> String {
        let lhs = if s1.is_empty() {
            self.skip.clone()
        } else {
            s1.join(&self.seq1_sep)
        };
        let rhs = if s2.is_empty() {
            self.skip.clone()
        } else {
            s2.join(&self.seq2_sep)
        };
        format!("{}{}{}", lhs, self.s1s2_sep, rhs)
    }

    /// Split a joint symbol back into its two sides.
    pub fn split_joint<'a>(&self, sym: &'a str) -> Option<(&'a str, &'a str)> {
        sym.split_once(&self.s1s2_sep)
    }

    /// Number of tokens consumed on each side by a joint symbol. The skip
    /// marker counts as zero.
    pub fn joint_arity(&self, sym: &str) -> (usize, usize) {
        match self.split_joint(sym) {
            Some((lhs, rhs)) => (
                self.side_arity(lhs, &self.seq1_sep),
                self.side_arity(rhs, &self.seq2_sep),
            ),
            None => (0, 0),
        }
    }

    fn side_arity(&self, side: &str, sep: &str) -> usize {
        if side == self.skip {
            0
        } else if sep.is_empty() {
            1
        } else {
            side.split(sep).count()
        }
    }
}
