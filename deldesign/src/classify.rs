//! The building-block classifier: turns raw compound files into per-BBT
//! listings and catalogue histograms.
//!
//! Everything chemical goes through the [`Toolkit`] seam; the classifier only
//! orchestrates the filter pipeline and the bookkeeping. Individual molecules
//! that fail a step are dropped and counted, never fatal.

use crate::bbt::BbtCatalog;
use crate::chem::{SmilesRecord, Toolkit};
use crate::error::Result;
use crate::params::{FunctionalGroup, Params};
use rustc_hash::FxHashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A molecule that survived every filter and was assigned to a BBT.
#[derive(Clone, Debug)]
pub struct ClassifiedCompound {
    /// Canonical SMILES.
    pub smiles: String,
    /// Source-prefixed id of the first occurrence.
    pub id: String,
    /// Ids of duplicates collapsed onto this record.
    pub aliases: Vec<String>,
    /// Index of the assigned BBT.
    pub bbt: usize,
    /// Effective heavy-atom count.
    pub eff_na: i32,
    /// Effective rotatable-bond count.
    pub eff_rb: i32,
}

/// Drop counters surfaced after a classification run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClassifyStats {
    /// Molecules read from the source files.
    pub read: u64,
    /// Canonical duplicates collapsed onto an earlier record.
    pub duplicates: u64,
    /// Dropped because the toolkit could not process them.
    pub dropped_parse: u64,
    /// Dropped by the coarse raw size filters.
    pub dropped_raw_size: u64,
    /// Dropped for exposing an antiFG.
    pub dropped_antifg: u64,
    /// Dropped for too few, too many or repeated FGs.
    pub dropped_fg_count: u64,
    /// Dropped because no BBT matches the FG counts.
    pub dropped_unmatched: u64,
    /// Dropped by the effective atom or rotatable-bond ranges.
    pub dropped_extent: u64,
    /// Molecules classified and binned.
    pub kept: u64,
}

impl ClassifyStats {
    /// Total number of molecules dropped across every filter.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped_parse
            + self.dropped_raw_size
            + self.dropped_antifg
            + self.dropped_fg_count
            + self.dropped_unmatched
            + self.dropped_extent
    }
}

struct Working {
    smiles: String,
    id: String,
    aliases: Vec<String>,
    raw_na: i32,
    raw_rb: i32,
}

/// Classifies source compound files against a parameter model.
pub struct Classifier<'a, T: Toolkit> {
    params: &'a Params,
    toolkit: &'a T,
}

impl<'a, T: Toolkit> Classifier<'a, T> {
    /// Binds the pipeline to a parameter model and a toolkit.
    pub fn new(params: &'a Params, toolkit: &'a T) -> Self {
        Self { params, toolkit }
    }

    /// Runs the whole pipeline over `sources`, updating the catalogue
    /// histograms in place.
    ///
    /// # Errors
    ///
    /// Toolkit and IO failures; per-molecule problems only count.
    pub fn run(
        &self,
        sources: &[PathBuf],
        catalog: &mut BbtCatalog,
    ) -> Result<(Vec<ClassifiedCompound>, ClassifyStats)> {
        let mut stats = ClassifyStats::default();
        let mut working = self.ingest(sources, &mut stats)?;
        self.annotate_properties(&mut working, &mut stats)?;
        self.filter_antifgs(&mut working, &mut stats)?;
        let compounds = self.assign_bbts(working, catalog, &mut stats)?;
        update_catalog(catalog, &compounds);
        stats.kept = compounds.len() as u64;
        info!(
            read = stats.read,
            kept = stats.kept,
            duplicates = stats.duplicates,
            "classification finished"
        );
        Ok((compounds, stats))
    }

    /// Canonicalises every source and collapses duplicates globally, first
    /// occurrence wins.
    fn ingest(&self, sources: &[PathBuf], stats: &mut ClassifyStats) -> Result<Vec<Working>> {
        let mut by_smiles: FxHashMap<String, usize> = FxHashMap::default();
        let mut working: Vec<Working> = Vec::new();
        for source in sources {
            let tag = source
                .file_stem()
                .map_or_else(|| "src".to_owned(), |stem| stem.to_string_lossy().into_owned());
            let mut records = Vec::new();
            for (line_no, line) in fs::read_to_string(source)?.lines().enumerate() {
                let mut fields = line.split_whitespace();
                let Some(smiles) = fields.next() else {
                    continue;
                };
                let id = fields
                    .next()
                    .map_or_else(|| (line_no + 1).to_string(), str::to_owned);
                records.push(SmilesRecord {
                    smiles: smiles.to_owned(),
                    id: format!("{tag}:{id}"),
                });
            }
            stats.read += records.len() as u64;
            info!(source = %source.display(), molecules = records.len(), "ingesting");

            for (record, canonical) in records.iter().zip(self.toolkit.canonicalize(&records)?) {
                let Some(canonical) = canonical else {
                    stats.dropped_parse += 1;
                    warn!(id = %record.id, "dropped: cannot canonicalise");
                    continue;
                };
                match by_smiles.get(&canonical) {
                    Some(&slot) => {
                        stats.duplicates += 1;
                        working[slot].aliases.push(record.id.clone());
                    }
                    None => {
                        by_smiles.insert(canonical.clone(), working.len());
                        working.push(Working {
                            smiles: canonical,
                            id: record.id.clone(),
                            aliases: Vec::new(),
                            raw_na: 0,
                            raw_rb: 0,
                        });
                    }
                }
            }
        }
        Ok(working)
    }

    /// Fills raw properties and applies the coarse size filters.
    fn annotate_properties(
        &self,
        working: &mut Vec<Working>,
        stats: &mut ClassifyStats,
    ) -> Result<()> {
        let smiles: Vec<String> = working.iter().map(|w| w.smiles.clone()).collect();
        let props = self.toolkit.properties(&smiles)?;
        let limits = &self.params.limits;
        let mut index = 0;
        working.retain_mut(|molecule| {
            let prop = props[index];
            index += 1;
            let Some(prop) = prop else {
                stats.dropped_parse += 1;
                warn!(id = %molecule.id, "dropped: no properties");
                return false;
            };
            molecule.raw_na = prop.heavy_atoms;
            molecule.raw_rb = prop.rotatable_bonds;
            let oversized = limits.raw_na_filter.is_some_and(|max| prop.heavy_atoms >= max)
                || limits.raw_rb_filter.is_some_and(|max| prop.rotatable_bonds >= max);
            if oversized {
                stats.dropped_raw_size += 1;
            }
            !oversized
        });
        Ok(())
    }

    /// Drops every molecule exposing any antiFG.
    fn filter_antifgs(&self, working: &mut Vec<Working>, stats: &mut ClassifyStats) -> Result<()> {
        if self.params.anti_fgs.is_empty() {
            return Ok(());
        }
        let counts = self.count_domain(working, &self.params.anti_fgs)?;
        let mut index = 0;
        working.retain(|molecule| {
            let clean = counts[index].iter().all(|&count| count == 0);
            index += 1;
            if !clean {
                stats.dropped_antifg += 1;
                warn!(id = %molecule.id, "dropped: antiFG hit");
            }
            clean
        });
        Ok(())
    }

    /// Counts every FG of `domain` for every molecule, including calculated
    /// FGs derived from the base counts.
    fn count_domain(&self, working: &[Working], domain: &[FunctionalGroup]) -> Result<Vec<Vec<i64>>> {
        let mut queries = Vec::new();
        let mut spans = Vec::with_capacity(domain.len());
        for fg in domain {
            spans.push((queries.len(), fg.base_queries.len()));
            queries.extend(fg.base_queries.iter().cloned());
        }
        let smiles: Vec<String> = working.iter().map(|w| w.smiles.clone()).collect();
        let matches = self.toolkit.fg_counts(&smiles, &queries)?;

        let names: Vec<&str> = domain.iter().map(|fg| fg.name.as_str()).collect();
        let mut rows = Vec::with_capacity(working.len());
        for row in matches {
            let mut counts: Vec<i64> = spans
                .iter()
                .map(|&(start, len)| row[start..start + len].iter().map(|&c| i64::from(c)).sum())
                .collect();
            self.apply_calc_rules(&names, &mut counts);
            rows.push(counts);
        }
        Ok(rows)
    }

    /// A calculated FG's count is the signed sum of its cited columns. A rule
    /// fires only when every cited column exists in the domain.
    fn apply_calc_rules(&self, names: &[&str], counts: &mut [i64]) {
        for rule in &self.params.calc_fgs {
            let Some(target) = names.iter().position(|&name| name == rule.name) else {
                continue;
            };
            let resolve = |cited: &[String]| -> Option<Vec<usize>> {
                cited
                    .iter()
                    .map(|name| names.iter().position(|&n| n == name))
                    .collect()
            };
            let (Some(adds), Some(subs)) = (resolve(&rule.rule_add), resolve(&rule.rule_subtract))
            else {
                warn!(rule = %rule.name, "calculated FG cites unknown columns");
                continue;
            };
            counts[target] = adds.iter().map(|&i| counts[i]).sum::<i64>()
                - subs.iter().map(|&i| counts[i]).sum::<i64>();
        }
    }

    /// FG counting, the [1,3]-distinct filter, BBT matching and the effective
    /// size filters.
    fn assign_bbts(
        &self,
        working: Vec<Working>,
        catalog: &BbtCatalog,
        stats: &mut ClassifyStats,
    ) -> Result<Vec<ClassifiedCompound>> {
        // FG 0 is the null FG and is never counted
        let counted = &self.params.fgs[1..];
        let counts = self.count_domain(&working, counted)?;
        let limits = &self.params.limits;
        let mut compounds = Vec::new();
        for (molecule, fg_counts) in working.into_iter().zip(counts) {
            let total: i64 = fg_counts.iter().sum();
            let distinct = fg_counts.iter().all(|&count| (0..2).contains(&count));
            if !(1..=3).contains(&total) || !distinct {
                stats.dropped_fg_count += 1;
                continue;
            }
            let mut long = vec![0u8; self.params.fgs.len()];
            long[0] = (3 - total) as u8;
            for (fg, &count) in fg_counts.iter().enumerate() {
                long[fg + 1] = count as u8;
            }
            let Some(bbt) = catalog.find(&long) else {
                stats.dropped_unmatched += 1;
                warn!(id = %molecule.id, "dropped: no BBT matches");
                continue;
            };
            let mut eff_na = molecule.raw_na;
            let mut excess_rb = 0;
            for (fg, &count) in fg_counts.iter().enumerate() {
                if count > 0 {
                    eff_na += self.params.fgs[fg + 1].atom_dif;
                    excess_rb += self.params.fgs[fg + 1].excess_rb;
                }
            }
            let eff_rb = (molecule.raw_rb - excess_rb).max(0);
            if eff_rb > limits.rb_filter || eff_na < limits.min_bb_na || eff_na > limits.max_bb_na {
                stats.dropped_extent += 1;
                continue;
            }
            compounds.push(ClassifiedCompound {
                smiles: molecule.smiles,
                id: molecule.id,
                aliases: molecule.aliases,
                bbt,
                eff_na,
                eff_rb,
            });
        }
        compounds.sort_by_key(|compound| compound.eff_na);
        Ok(compounds)
    }
}

/// Folds classified compounds into the catalogue histograms, extents,
/// representative molecules and display order.
pub fn update_catalog(catalog: &mut BbtCatalog, compounds: &[ClassifiedCompound]) {
    for compound in compounds {
        let bbt = &mut catalog.bbts[compound.bbt];
        bbt.n_compounds[compound.eff_na as usize] += 1;
        if bbt.smiles_example.is_none() {
            bbt.smiles_example = Some(compound.smiles.clone());
        }
        if bbt.total_compounds() == 1 || compound.eff_na < bbt.min_atoms {
            bbt.min_atoms = compound.eff_na;
        }
        bbt.max_atoms = bbt.max_atoms.max(compound.eff_na);
    }
    catalog.assign_order();
}

/// Writes one `<index>.smi` file per non-empty BBT into `dir`, each line
/// `smiles eff_na:id`, sorted by effective atom count ascending.
///
/// # Errors
///
/// IO failures.
pub fn write_compound_files(compounds: &[ClassifiedCompound], dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir)?;
    let mut files: FxHashMap<usize, BufWriter<fs::File>> = FxHashMap::default();
    for compound in compounds {
        let writer = match files.entry(compound.bbt) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = fs::File::create(dir.join(format!("{}.smi", compound.bbt)))?;
                entry.insert(BufWriter::new(file))
            }
        };
        writeln!(writer, "{} {}:{}", compound.smiles, compound.eff_na, compound.id)?;
    }
    let count = files.len();
    for (_, mut writer) in files {
        writer.flush()?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chem::MolProps;
    use crate::params::tests_support::small_params;
    use crate::params::CalcFg;
    use std::io::Write as _;

    /// A toolkit whose chemistry is a lookup table keyed by SMILES.
    #[derive(Default)]
    struct MockToolkit {
        props: FxHashMap<String, (i32, i32)>,
        hits: FxHashMap<String, Vec<String>>,
    }

    impl MockToolkit {
        fn molecule(mut self, smiles: &str, na: i32, rb: i32, queries: &[&str]) -> Self {
            self.props.insert(smiles.to_owned(), (na, rb));
            self.hits
                .insert(smiles.to_owned(), queries.iter().map(|&q| q.to_owned()).collect());
            self
        }
    }

    impl Toolkit for MockToolkit {
        fn canonicalize(&self, records: &[SmilesRecord]) -> Result<Vec<Option<String>>> {
            Ok(records
                .iter()
                .map(|record| {
                    self.props
                        .contains_key(&record.smiles)
                        .then(|| record.smiles.clone())
                })
                .collect())
        }

        fn properties(&self, smiles: &[String]) -> Result<Vec<Option<MolProps>>> {
            Ok(smiles
                .iter()
                .map(|s| {
                    self.props.get(s).map(|&(heavy_atoms, rotatable_bonds)| MolProps {
                        heavy_atoms,
                        rotatable_bonds,
                    })
                })
                .collect())
        }

        fn fg_counts(&self, smiles: &[String], queries: &[String]) -> Result<Vec<Vec<u32>>> {
            Ok(smiles
                .iter()
                .map(|s| {
                    let hits = self.hits.get(s).map(Vec::as_slice).unwrap_or_default();
                    queries
                        .iter()
                        .map(|query| hits.iter().filter(|&hit| hit == query).count() as u32)
                        .collect()
                })
                .collect())
        }
    }

    fn write_source(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    fn triple_of(catalog: &BbtCatalog, bbt: usize) -> [crate::params::FgId; 3] {
        catalog.bbts[bbt].triple
    }

    #[test]
    fn pipeline_filters_and_bins() {
        let mut params = small_params();
        params.limits.raw_na_filter = Some(10);
        let mut catalog = BbtCatalog::generate(&params).unwrap();
        let toolkit = MockToolkit::default()
            .molecule("NC", 4, 0, &["A.qry"])
            .molecule("OC", 5, 1, &["B.qry"])
            .molecule("NCO", 6, 0, &["A.qry", "B.qry"])
            .molecule("NN", 4, 0, &["A.qry", "A.qry"])
            .molecule("ClC", 3, 0, &["anti_x.qry"])
            .molecule("BIG", 12, 0, &["A.qry"])
            .molecule("CC", 3, 0, &[]);
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(
            dir.path(),
            "vendor.smi",
            &[
                "NC m1", "NC m2", // canonical duplicates
                "OC m3", "NCO m4", "NN m5", "XX m6", "ClC m7", "BIG m8", "CC m9",
            ],
        );

        let classifier = Classifier::new(&params, &toolkit);
        let (compounds, stats) = classifier.run(&[source], &mut catalog).unwrap();

        assert_eq!(stats.read, 9);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.dropped_parse, 1); // XX
        assert_eq!(stats.dropped_raw_size, 1); // BIG
        assert_eq!(stats.dropped_antifg, 1); // ClC
        assert_eq!(stats.dropped_fg_count, 2); // NN, CC
        assert_eq!(stats.kept, 3);

        // sorted by effective atom count
        let ids: Vec<&str> = compounds.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["vendor:m1", "vendor:m3", "vendor:m4"]);
        assert_eq!(compounds[0].aliases, vec!["vendor:m2"]);
        assert_eq!(triple_of(&catalog, compounds[0].bbt), [0, 0, 1]);
        assert_eq!(triple_of(&catalog, compounds[1].bbt), [0, 0, 2]);
        assert_eq!(triple_of(&catalog, compounds[2].bbt), [0, 1, 2]);

        let a_bbt = &catalog.bbts[compounds[0].bbt];
        assert_eq!(a_bbt.n_compounds[4], 1);
        assert_eq!((a_bbt.min_atoms, a_bbt.max_atoms), (4, 4));
        assert_eq!(a_bbt.smiles_example.as_deref(), Some("NC"));

        let written = write_compound_files(&compounds, &dir.path().join("comps")).unwrap();
        assert_eq!(written, 3);
        let listing =
            fs::read_to_string(dir.path().join("comps").join(format!("{}.smi", compounds[0].bbt)))
                .unwrap();
        assert_eq!(listing, "NC 4:vendor:m1\n");
    }

    #[test]
    fn calculated_fgs_fire_when_columns_exist() {
        let mut params = small_params();
        params.fgs.push(crate::params::FunctionalGroup {
            name: "calc_d".to_owned(),
            self_incompatibility: Vec::new(),
            atom_dif: 0,
            excess_rb: 0,
            allowed_end_exposed: true,
            base_queries: Vec::new(),
        });
        params.calc_fgs.push(CalcFg {
            name: "calc_d".to_owned(),
            rule_add: vec!["A".to_owned()],
            rule_subtract: vec!["B".to_owned()],
        });
        let mut catalog = BbtCatalog::generate(&params).unwrap();
        let toolkit = MockToolkit::default().molecule("NCC", 5, 0, &["A.qry"]);
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "s.smi", &["NCC m1"]);

        let classifier = Classifier::new(&params, &toolkit);
        let (compounds, _) = classifier.run(&[source], &mut catalog).unwrap();
        assert_eq!(compounds.len(), 1);
        // A plus the derived calc_d make a two-FG building block
        assert_eq!(triple_of(&catalog, compounds[0].bbt), [0, 1, 4]);
    }

    #[test]
    fn effective_counts_shift_and_filter() {
        let mut params = small_params();
        params.fgs[1].atom_dif = -2;
        params.fgs[1].excess_rb = 1;
        params.limits.rb_filter = 0;
        let mut catalog = BbtCatalog::generate(&params).unwrap();
        let toolkit = MockToolkit::default()
            .molecule("NC", 6, 1, &["A.qry"]) // eff_na 4, eff_rb 0
            .molecule("NX", 6, 3, &["A.qry"]); // eff_rb 2, over the cap
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "s.smi", &["NC m1", "NX m2"]);

        let (compounds, stats) = Classifier::new(&params, &toolkit)
            .run(&[source], &mut catalog)
            .unwrap();
        assert_eq!(compounds.len(), 1);
        assert_eq!(compounds[0].eff_na, 4);
        assert_eq!(compounds[0].eff_rb, 0);
        assert_eq!(stats.dropped_extent, 1);
    }

    #[test]
    fn classification_is_idempotent_over_canonical_input() {
        let params = small_params();
        let toolkit = MockToolkit::default()
            .molecule("NC", 4, 0, &["A.qry"])
            .molecule("OC", 5, 0, &["B.qry"]);
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "s.smi", &["NC m1", "OC m2"]);

        let mut first = BbtCatalog::generate(&params).unwrap();
        let mut second = BbtCatalog::generate(&params).unwrap();
        let classifier = Classifier::new(&params, &toolkit);
        let (_, stats_first) = classifier.run(&[source.clone()], &mut first).unwrap();
        let (_, stats_second) = classifier.run(&[source], &mut second).unwrap();
        assert_eq!(stats_first, stats_second);
        for (a, b) in first.bbts.iter().zip(&second.bbts) {
            assert_eq!(a.n_compounds, b.n_compounds);
            assert_eq!(a.order, b.order);
        }
    }
}
