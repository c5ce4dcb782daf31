//! Lattice maps between the log and tropical semirings.
//!
//! Both semirings store negated natural logs, so the map is value-preserving
//! on every arc and final weight; only the `plus` operation differs.

use anyhow::Result;
use rustfst::fst_impls::VectorFst;
use rustfst::fst_traits::{CoreFst, ExpandedFst, MutableFst};
use rustfst::prelude::*;

pub fn log_to_tropical(fst: &VectorFst<LogWeight>) -> Result<VectorFst<TropicalWeight>> {
    let mut ofst = VectorFst::<TropicalWeight>::new();
    ofst.add_states(fst.num_states());
    if let Some(start) = fst.start() {
        ofst.set_start(start)?;
    }
    for q in 0..fst.num_states() as StateId {
        for tr in fst.get_trs(q)?.iter() {
            ofst.add_tr(
                q,
                Tr::new(
                    tr.ilabel,
                    tr.olabel,
                    TropicalWeight::new(*tr.weight.value()),
                    tr.nextstate,
                ),
            )?;
        }
        if let Some(w) = fst.final_weight(q)? {
            ofst.set_final(q, TropicalWeight::new(*w.value()))?;
        }
    }
    Ok(ofst)
}

pub fn tropical_to_log(fst: &VectorFst<TropicalWeight>) -> Result<VectorFst<LogWeight>> {
    let mut ofst = VectorFst::<LogWeight>::new();
    ofst.add_states(fst.num_states());
    if let Some(start) = fst.start() {
        ofst.set_start(start)?;
    }
    for q in 0..fst.num_states() as StateId {
        for tr in fst.get_trs(q)?.iter() {
            ofst.add_tr(
                q,
                Tr::new(
                    tr.ilabel,
                    tr.olabel,
                    LogWeight::new(*tr.weight.value()),
                    tr.nextstate,
                ),
            )?;
        }
        if let Some(w) = fst.final_weight(q)? {
            ofst.set_final(q, LogWeight::new(*w.value()))?;
        }
    }
    Ok(ofst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_values() {
        let mut fst = VectorFst::<LogWeight>::new();
        let s0 = fst.add_state();
        let s1 = fst.add_state();
        fst.set_start(s0).expect("Test assertion failed");
        fst.add_tr(s0, Tr::new(1, 1, 0.5, s1))
            .expect("Test assertion failed");
        fst.set_final(s1, 0.25).expect("Test assertion failed");

        let tfst = log_to_tropical(&fst).expect("Test assertion failed");
        assert_eq!(tfst.num_states(), 2);
        let tr = tfst.get_trs(s0).expect("Test assertion failed");
        assert!((tr.iter().next().expect("Test assertion failed").weight.value() - 0.5).abs() < 1e-6);

        let back = tropical_to_log(&tfst).expect("Test assertion failed");
        let w = back
            .final_weight(s1)
            .expect("Test assertion failed")
            .expect("Test assertion failed");
        assert!((w.value() - 0.25).abs() < 1e-6);
    }
}
