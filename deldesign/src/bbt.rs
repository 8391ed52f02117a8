//! Building-block types (BBTs) and the catalogue that owns them.
//!
//! A BBT is an equivalence class of building blocks sharing the same multiset
//! of up to three functional groups. The catalogue is generated once from the
//! FG table and is immutable during growth; the classifier fills in the
//! per-atom-count histograms.

use crate::error::{Error, Result};
use crate::params::{FgId, Params};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const CATALOG_MAGIC: &[u8; 8] = b"DELBBT01";

/// One building-block type.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Bbt {
    /// Sorted FG triple, padded with the null FG.
    pub triple: [FgId; 3],
    /// Count of each FG in the triple, indexed by FG id. Used for matching.
    pub long: Vec<u8>,
    /// Number of non-null FGs in the triple.
    pub multi: u8,
    /// Stable index in generation order.
    pub index: usize,
    /// Headpiece id when the triple equals a declared headpiece BBT.
    pub headpiece: Option<usize>,
    /// `n_compounds[a]` is the number of classified building blocks with
    /// effective atom count `a`.
    pub n_compounds: Vec<u32>,
    /// Smallest effective atom count with a compound, 0 when empty.
    pub min_atoms: i32,
    /// Largest effective atom count with a compound, 0 when empty.
    pub max_atoms: i32,
    /// A representative molecule.
    pub smiles_example: Option<String>,
    /// Display rank: by multiplicity, then compound count descending.
    pub order: usize,
}

impl Bbt {
    /// Total number of classified compounds across all atom counts.
    #[must_use]
    pub fn total_compounds(&self) -> u64 {
        self.n_compounds.iter().map(|&n| u64::from(n)).sum()
    }

    /// Number of compounds with effective atom count `<= cap`.
    #[must_use]
    pub fn compounds_up_to(&self, cap: usize) -> u64 {
        self.n_compounds
            .iter()
            .take(cap + 1)
            .map(|&n| u64::from(n))
            .sum()
    }

    /// Non-null FGs of the triple.
    pub fn exposed_fgs(&self) -> impl Iterator<Item = FgId> + '_ {
        self.triple.iter().copied().filter(|&fg| fg != 0)
    }
}

/// One row of the tabular catalogue report.
#[derive(Debug, Serialize)]
pub struct BbtReportRow {
    /// Stable catalogue index of the BBT.
    pub index: usize,
    /// `;`-joined names of the non-null FGs.
    pub fgs: String,
    /// Total classified compounds.
    pub n_compounds: u64,
    /// Smallest effective atom count with a compound.
    pub min_atoms: i32,
    /// Largest effective atom count with a compound.
    pub max_atoms: i32,
    /// Number of non-null FGs in the triple.
    pub multi: u8,
    /// Display rank.
    pub order: usize,
    /// A representative molecule.
    pub smiles: String,
}

/// The closed set of building-block types for a run.
#[derive(Debug, Deserialize, Serialize)]
pub struct BbtCatalog {
    /// Every BBT, indexed by its stable catalogue index.
    pub bbts: Vec<Bbt>,
    /// Histogram length minus one; the maximum effective atom count.
    pub max_bb_na: i32,
    #[serde(skip)]
    long_index: FxHashMap<Vec<u8>, usize>,
}

impl BbtCatalog {
    /// Enumerates every sorted FG triple that is pairwise self-compatible and
    /// links headpieces to their BBTs.
    ///
    /// # Errors
    ///
    /// [`Error::Catalogue`] when a declared headpiece has no matching BBT.
    pub fn generate(params: &Params) -> Result<Self> {
        let n_fgs = params.fgs.len();
        let mut bbts = Vec::new();
        for combo in (0..n_fgs as FgId).combinations_with_replacement(3) {
            let triple = [combo[0], combo[1], combo[2]];
            if !Self::compatible(&triple, params) {
                continue;
            }
            let mut long = vec![0u8; n_fgs];
            for &fg in &triple {
                long[fg as usize] += 1;
            }
            let headpiece = params.headpieces.iter().position(|hp| hp.bbt == triple);
            let index = bbts.len();
            bbts.push(Bbt {
                triple,
                long,
                multi: triple.iter().filter(|&&fg| fg != 0).count() as u8,
                index,
                headpiece,
                n_compounds: vec![0; params.limits.max_bb_na as usize + 1],
                min_atoms: 0,
                max_atoms: 0,
                smiles_example: None,
                order: index,
            });
        }
        for (hp_index, hp) in params.headpieces.iter().enumerate() {
            if !bbts.iter().any(|bbt| bbt.headpiece == Some(hp_index)) {
                return Err(Error::Catalogue(format!(
                    "headpiece '{}' has no compatible BBT {:?}",
                    hp.smiles, hp.bbt
                )));
            }
        }
        let mut catalog = Self {
            bbts,
            max_bb_na: params.limits.max_bb_na,
            long_index: FxHashMap::default(),
        };
        catalog.rebuild_index();
        Ok(catalog)
    }

    fn compatible(triple: &[FgId; 3], params: &Params) -> bool {
        for (i, &a) in triple.iter().enumerate() {
            for &b in &triple[i + 1..] {
                if a == 0 || b == 0 {
                    continue;
                }
                if params.incompatibility(a).contains(&b) || params.incompatibility(b).contains(&a)
                {
                    return false;
                }
            }
        }
        true
    }

    fn rebuild_index(&mut self) {
        self.long_index = self
            .bbts
            .iter()
            .map(|bbt| (bbt.long.clone(), bbt.index))
            .collect();
    }

    /// Looks up the BBT whose long vector equals `long`.
    #[must_use]
    pub fn find(&self, long: &[u8]) -> Option<usize> {
        self.long_index.get(long).copied()
    }

    /// Indices of BBTs linked to a headpiece, in catalogue order.
    #[must_use]
    pub fn headpiece_bbts(&self) -> Vec<usize> {
        self.bbts
            .iter()
            .filter(|bbt| bbt.headpiece.is_some())
            .map(|bbt| bbt.index)
            .collect()
    }

    /// Indices of BBTs with at least one classified compound.
    #[must_use]
    pub fn couplable_bbts(&self) -> Vec<usize> {
        self.bbts
            .iter()
            .filter(|bbt| bbt.total_compounds() > 0)
            .map(|bbt| bbt.index)
            .collect()
    }

    /// Recomputes the display order: by multiplicity, then total compound
    /// count descending, stable by index.
    pub fn assign_order(&mut self) {
        let mut ranked: Vec<usize> = (0..self.bbts.len()).collect();
        ranked.sort_by_key(|&i| {
            (
                self.bbts[i].multi,
                std::cmp::Reverse(self.bbts[i].total_compounds()),
                self.bbts[i].index,
            )
        });
        for (rank, index) in ranked.into_iter().enumerate() {
            self.bbts[index].order = rank;
        }
    }

    /// Report rows for every non-empty BBT, in display order.
    #[must_use]
    pub fn report_rows(&self, params: &Params) -> Vec<BbtReportRow> {
        let mut rows: Vec<&Bbt> = self
            .bbts
            .iter()
            .filter(|bbt| bbt.total_compounds() > 0)
            .collect();
        rows.sort_by_key(|bbt| bbt.order);
        rows.into_iter()
            .map(|bbt| BbtReportRow {
                index: bbt.index,
                fgs: bbt
                    .exposed_fgs()
                    .map(|fg| params.fgs[fg as usize].name.as_str())
                    .join(";"),
                n_compounds: bbt.total_compounds(),
                min_atoms: bbt.min_atoms,
                max_atoms: bbt.max_atoms,
                multi: bbt.multi,
                order: bbt.order,
                smiles: bbt.smiles_example.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Serialises the catalogue.
    ///
    /// # Errors
    ///
    /// IO and encoding failures.
    pub fn write(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(CATALOG_MAGIC)?;
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Deserialises a catalogue written by [`BbtCatalog::write`].
    ///
    /// # Errors
    ///
    /// [`Error::Stream`] when the magic bytes do not match, plus IO and
    /// decoding failures.
    pub fn read(mut reader: impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != CATALOG_MAGIC {
            return Err(Error::Stream("not a BBT catalogue file".into()));
        }
        let mut catalog: Self = bincode::deserialize_from(reader)?;
        catalog.rebuild_index();
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tests_support::small_params;

    #[test]
    fn triples_are_pairwise_compatible() {
        let params = small_params();
        let catalog = BbtCatalog::generate(&params).unwrap();
        assert!(!catalog.bbts.is_empty());
        for bbt in &catalog.bbts {
            let mut sorted = bbt.triple;
            sorted.sort_unstable();
            assert_eq!(sorted, bbt.triple);
            for (i, &a) in bbt.triple.iter().enumerate() {
                for &b in &bbt.triple[i + 1..] {
                    if a != 0 && b != 0 {
                        assert!(!params.incompatibility(a).contains(&b));
                        assert!(!params.incompatibility(b).contains(&a));
                    }
                }
            }
        }
    }

    #[test]
    fn headpiece_links_and_lookup() {
        let params = small_params();
        let catalog = BbtCatalog::generate(&params).unwrap();
        let heads = catalog.headpiece_bbts();
        assert_eq!(heads.len(), 1);
        assert_eq!(catalog.bbts[heads[0]].triple, params.headpieces[0].bbt);

        let n_fgs = params.fgs.len();
        let mut long = vec![0u8; n_fgs];
        long[0] = 2;
        long[2] = 1;
        let found = catalog.find(&long).unwrap();
        assert_eq!(catalog.bbts[found].triple, [0, 0, 2]);
        long[2] = 0;
        long[1] = 4; // impossible count
        assert!(catalog.find(&long).is_none());
    }

    #[test]
    fn order_prefers_smaller_multiplicity_then_count() {
        let params = small_params();
        let mut catalog = BbtCatalog::generate(&params).unwrap();
        let a = catalog.find(&long_of(&catalog, [0, 0, 1])).unwrap();
        let b = catalog.find(&long_of(&catalog, [0, 1, 2])).unwrap();
        catalog.bbts[a].n_compounds[4] = 1;
        catalog.bbts[b].n_compounds[4] = 100;
        catalog.assign_order();
        assert!(catalog.bbts[a].order < catalog.bbts[b].order);
    }

    #[test]
    fn round_trips_through_bytes() {
        let params = small_params();
        let mut catalog = BbtCatalog::generate(&params).unwrap();
        let couplable = catalog.find(&long_of(&catalog, [0, 0, 2])).unwrap();
        catalog.bbts[couplable].n_compounds[5] = 3;
        let mut bytes = Vec::new();
        catalog.write(&mut bytes).unwrap();
        let back = BbtCatalog::read(bytes.as_slice()).unwrap();
        assert_eq!(back.bbts.len(), catalog.bbts.len());
        assert_eq!(back.couplable_bbts(), vec![couplable]);
        assert_eq!(back.find(&catalog.bbts[couplable].long), Some(couplable));

        let err = BbtCatalog::read(&b"NOTBBT00rubbish"[..]).unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    fn long_of(catalog: &BbtCatalog, triple: [FgId; 3]) -> Vec<u8> {
        let mut long = vec![0u8; catalog.bbts[0].long.len()];
        for fg in triple {
            long[fg as usize] += 1;
        }
        long
    }
}
