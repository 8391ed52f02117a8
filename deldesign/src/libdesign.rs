//! Library designs: coalescence of completed designs by topology fingerprint
//! and validation of the best building-block selection per library.

use crate::bbt::BbtCatalog;
use crate::design::Design;
use crate::error::{Error, Result};
use crate::params::Params;
use ndarray::{ArrayD, Dimension, IxDyn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Canonical topology fingerprint of a design: the ordered tuple
/// `(total_cycles, enum deprotections, enum reactions, dtopology, btopology,
/// headpiece BBT)` flattened to integers. Two designs share a `LibId` iff
/// they run the same enumeration operations with the same attachment
/// topology from the same headpiece.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LibId(pub Vec<u32>);

/// A coalesced equivalence class of designs plus its validation results.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LibDesign {
    /// Topology fingerprint shared by every member design.
    pub lib_id: LibId,
    /// Number of BBT-addition cycles.
    pub n_cycles: usize,
    /// Headpiece BBT index.
    pub headpiece: usize,
    /// Per-cycle BBT indices contributed by member designs, insertion order.
    pub bbts: Vec<Vec<usize>>,
    /// Enumeration-group index per cycle boundary deprotection slot.
    pub enum_deprotections: Vec<usize>,
    /// Enumeration-group index per cycle reaction.
    pub enum_reactions: Vec<usize>,
    /// Detailed deprotection indices that insert a scaffold.
    pub scaffold_deprotections: Vec<usize>,
    /// Per-cycle effective-atom cap chosen by validation.
    pub best_all_index: Option<Vec<usize>>,
    /// Expected product count at the chosen caps.
    pub n_all: Option<u64>,
    /// Per-cycle total building blocks under the chosen caps.
    pub all_limits: Option<Vec<u64>>,
    /// Per-cycle, per-BBT building blocks under the chosen caps.
    pub all_bbt_limits: Option<Vec<Vec<u64>>>,
    /// Final contiguous library id, assigned after validation.
    pub id: Option<usize>,
}

impl LibDesign {
    fn from_design(design: &Design, params: &Params) -> Self {
        Self {
            lib_id: design.lib_id.clone().expect("coalesced design has a lib_id"),
            n_cycles: design.n_cycles,
            headpiece: design.bbts[0],
            bbts: design.bbts[1..].iter().map(|&bbt| vec![bbt]).collect(),
            enum_deprotections: design
                .deprotections
                .iter()
                .map(|&d| params.deprotections[d].enum_index)
                .collect(),
            enum_reactions: design
                .reactions
                .iter()
                .map(|&r| params.reactions[r].enum_index)
                .collect(),
            scaffold_deprotections: design
                .deprotections
                .iter()
                .copied()
                .filter(|&d| params.deprotections[d].atom_dif > 0)
                .collect(),
            best_all_index: None,
            n_all: None,
            all_limits: None,
            all_bbt_limits: None,
            id: None,
        }
    }

    fn absorb(&mut self, design: &Design) {
        for (cycle, &bbt) in design.bbts[1..].iter().enumerate() {
            if !self.bbts[cycle].contains(&bbt) {
                self.bbts[cycle].push(bbt);
            }
        }
    }
}

/// Groups completed designs by their `lib_id`.
#[derive(Default)]
pub struct Coalescer {
    index: FxHashMap<LibId, usize>,
    libs: Vec<LibDesign>,
}

impl Coalescer {
    /// An empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one completed design into its library bucket. Feeding the same
    /// design twice leaves the bucket unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::Catalogue`] when the design was never stamped with a lib_id.
    pub fn insert(&mut self, design: &Design, params: &Params) -> Result<()> {
        let lib_id = design
            .lib_id
            .as_ref()
            .ok_or_else(|| Error::Catalogue("design reached the coalescer without a lib_id".into()))?;
        match self.index.get(lib_id) {
            Some(&slot) => self.libs[slot].absorb(design),
            None => {
                self.index.insert(lib_id.clone(), self.libs.len());
                self.libs.push(LibDesign::from_design(design, params));
            }
        }
        Ok(())
    }

    /// Number of distinct libraries seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.libs.len()
    }

    /// `true` when no design has been folded in yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libs.is_empty()
    }

    /// The buckets, in first-insertion order.
    #[must_use]
    pub fn into_libs(self) -> Vec<LibDesign> {
        self.libs
    }
}

/// Why validation discarded a library.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Discard {
    Cycles,
    ScaffoldAtoms,
    Percentile,
    Count,
}

/// Counts of validation outcomes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidateStats {
    /// Libraries that passed validation.
    pub kept: u64,
    /// Discarded for an unsupported cycle count.
    pub discarded_cycles: u64,
    /// Discarded for inserting too many scaffold atoms.
    pub discarded_scaffold_atoms: u64,
    /// Discarded because no size fits under the percentile bound.
    pub discarded_percentile: u64,
    /// Discarded for holding too few products.
    pub discarded_count: u64,
}

impl ValidateStats {
    fn record(&mut self, reason: Discard) {
        match reason {
            Discard::Cycles => self.discarded_cycles += 1,
            Discard::ScaffoldAtoms => self.discarded_scaffold_atoms += 1,
            Discard::Percentile => self.discarded_percentile += 1,
            Discard::Count => self.discarded_count += 1,
        }
    }

    /// Total number of discarded libraries.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded_cycles
            + self.discarded_scaffold_atoms
            + self.discarded_percentile
            + self.discarded_count
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Validates one library in place; `Err(reason)` marks it for elimination.
fn validate(
    lib: &mut LibDesign,
    catalog: &BbtCatalog,
    params: &Params,
) -> std::result::Result<(), Discard> {
    if !(2..=3).contains(&lib.n_cycles) {
        return Err(Discard::Cycles);
    }
    let scaffold_atoms: i32 = lib
        .scaffold_deprotections
        .iter()
        .map(|&d| params.deprotections[d].atom_dif)
        .sum();
    if scaffold_atoms > params.globals.max_scaffolds_na {
        return Err(Discard::ScaffoldAtoms);
    }

    // per-cycle cumulative compound counts by effective atom cap
    let len = catalog.max_bb_na as usize + 1;
    let cumulative: Vec<Vec<u64>> = lib
        .bbts
        .iter()
        .map(|cycle_bbts| {
            let mut histogram = vec![0u64; len];
            for &bbt in cycle_bbts {
                for (atoms, &count) in catalog.bbts[bbt].n_compounds.iter().enumerate() {
                    histogram[atoms] += u64::from(count);
                }
            }
            for atoms in 1..len {
                histogram[atoms] += histogram[atoms - 1];
            }
            histogram
        })
        .collect();

    // joint product count and product size over the cycle tuple
    let shape = vec![len; lib.n_cycles];
    let base_atoms = i64::from(scaffold_atoms + params.globals.headpiece_na);
    let mut product = ArrayD::<u64>::zeros(IxDyn(&shape));
    let mut atoms = ArrayD::<i64>::zeros(IxDyn(&shape));
    for ((idx, p), (_, na)) in product.indexed_iter_mut().zip(atoms.indexed_iter_mut()) {
        let mut count = 1u64;
        let mut size = base_atoms;
        for (cycle, &atom_cap) in idx.slice().iter().enumerate() {
            count *= cumulative[cycle][atom_cap];
            size += atom_cap as i64;
        }
        *p = count;
        *na = size;
    }

    let percentile_na = i64::from(params.globals.max_na_percentile);
    let perc = product
        .iter()
        .zip(atoms.iter())
        .filter(|&(_, &na)| na <= percentile_na)
        .map(|(&p, _)| p)
        .max()
        .ok_or(Discard::Percentile)?;
    let cap = (perc as f64 / params.globals.percentile).floor() as u64;
    if cap < params.globals.min_count {
        return Err(Discard::Count);
    }

    let mut n_all = 0u64;
    let mut best: Option<Vec<usize>> = None;
    let mut best_std = f64::INFINITY;
    for (idx, &p) in product.indexed_iter() {
        if p > cap || p < n_all || p == 0 {
            continue;
        }
        let spread = std_dev(
            &idx.slice()
                .iter()
                .enumerate()
                .map(|(cycle, &atom_cap)| cumulative[cycle][atom_cap] as f64)
                .collect::<Vec<f64>>(),
        );
        if p > n_all || spread < best_std {
            n_all = p;
            best_std = spread;
            best = Some(idx.slice().to_vec());
        }
    }
    let best = best.ok_or(Discard::Count)?;

    lib.all_limits = Some(
        best.iter()
            .enumerate()
            .map(|(cycle, &atom_cap)| cumulative[cycle][atom_cap])
            .collect(),
    );
    lib.all_bbt_limits = Some(
        lib.bbts
            .iter()
            .zip(&best)
            .map(|(cycle_bbts, &atom_cap)| {
                cycle_bbts
                    .iter()
                    .map(|&bbt| catalog.bbts[bbt].compounds_up_to(atom_cap))
                    .collect()
            })
            .collect(),
    );
    lib.n_all = Some(n_all);
    lib.best_all_index = Some(best);
    Ok(())
}

/// Validates every library, drops the failures, and numbers the survivors
/// contiguously in insertion order.
#[must_use]
pub fn validate_all(
    libs: Vec<LibDesign>,
    catalog: &BbtCatalog,
    params: &Params,
) -> (Vec<LibDesign>, ValidateStats) {
    let mut stats = ValidateStats::default();
    let mut kept = Vec::new();
    for mut lib in libs {
        match validate(&mut lib, catalog, params) {
            Ok(()) => {
                lib.id = Some(kept.len());
                kept.push(lib);
            }
            Err(reason) => stats.record(reason),
        }
    }
    stats.kept = kept.len() as u64;
    info!(
        kept = stats.kept,
        discarded = stats.discarded(),
        "library validation finished"
    );
    (kept, stats)
}
