//! The design growth engine.
//!
//! A [`Design`] is a partial synthetic route: a headpiece plus a sequence of
//! (optional deprotection, BBT coupling) steps. The [`Engine`] expands whole
//! batches of designs cycle by cycle, applying every pruning rule inline, and
//! stamps completed designs with their canonical library id.

use crate::bbt::BbtCatalog;
use crate::error::{Error, Result};
use crate::libdesign::LibId;
use crate::params::{FgId, IncludeDesigns, Params};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Tag naming the event that exposed a functional group.
///
/// The headpiece exposes with tag 0. For a 1-based cycle `c`, the building
/// block's leftover FGs carry `3c`, the reaction outputs `3c + 2`, and a
/// deprotection performed after `c` completed cycles carries `3c + 1`.
pub type SourceTag = u16;

const fn coupling_tag(cycle: usize) -> SourceTag {
    3 * cycle as SourceTag
}

const fn reaction_tag(cycle: usize) -> SourceTag {
    3 * cycle as SourceTag + 2
}

const fn deprotection_tag(completed_cycles: usize) -> SourceTag {
    3 * completed_cycles as SourceTag + 1
}

const fn from_deprotection(tag: SourceTag) -> bool {
    tag % 3 == 1
}

/// A partial or complete synthetic route.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Design {
    /// Number of BBT additions every finished design of this run makes.
    pub total_cycles: usize,
    /// BBT additions made so far.
    pub n_cycles: usize,
    /// Headpiece BBT followed by one BBT per completed cycle.
    pub bbts: Vec<usize>,
    /// Reaction index used at each cycle.
    pub reactions: Vec<usize>,
    /// Deprotection index per cycle boundary; 0 is "none".
    pub deprotections: Vec<usize>,
    /// Total deprotections applied.
    pub n_deprotections: usize,
    /// Deprotections whose output FG has not yet been consumed.
    pub n_unpr_deprotections: usize,
    /// Source tag consumed by each coupling.
    pub btopology: Vec<SourceTag>,
    /// Source tag consumed by each deprotection slot (0 for "none").
    pub dtopology: Vec<SourceTag>,
    /// Currently exposed FGs (a multiset).
    pub fgs: Vec<FgId>,
    /// Source tag of each entry of `fgs`.
    pub fg_sources: Vec<SourceTag>,
    /// Lower bound on the effective atom count of any product.
    pub min_natoms: i32,
    /// Canonical topology fingerprint; stamped after the last cycle.
    pub lib_id: Option<LibId>,
}

impl Design {
    fn root(hp_bbt: usize, catalog: &BbtCatalog, params: &Params) -> Self {
        let bbt = &catalog.bbts[hp_bbt];
        let fgs: Vec<FgId> = bbt.exposed_fgs().collect();
        let fg_sources = vec![0; fgs.len()];
        Self {
            total_cycles: params.globals.total_cycles(),
            n_cycles: 0,
            bbts: vec![hp_bbt],
            reactions: Vec::new(),
            deprotections: Vec::new(),
            n_deprotections: 0,
            n_unpr_deprotections: 0,
            btopology: Vec::new(),
            dtopology: Vec::new(),
            fgs,
            fg_sources,
            min_natoms: params.globals.headpiece_na,
            lib_id: None,
        }
    }

    /// `true` once every cycle has been added.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.n_cycles == self.total_cycles
    }

    /// Exposed FG occurrences worth consuming: one entry per distinct
    /// `(fg, source)` pair, keeping the first position. Equal occurrences
    /// would yield identical children; occurrences of the same FG with
    /// different sources yield distinct topologies.
    fn occurrences(&self) -> Vec<(usize, FgId, SourceTag)> {
        let mut seen: Vec<(FgId, SourceTag)> = Vec::new();
        let mut out = Vec::new();
        for (pos, (&fg, &source)) in self.fgs.iter().zip(&self.fg_sources).enumerate() {
            if seen.contains(&(fg, source)) {
                continue;
            }
            seen.push((fg, source));
            out.push((pos, fg, source));
        }
        out
    }

    fn unproductive_budget_exceeded(&self) -> bool {
        self.total_cycles < self.n_cycles + self.n_unpr_deprotections
    }
}

/// Expands designs against a fixed parameter model and BBT catalogue.
pub struct Engine<'a> {
    params: &'a Params,
    catalog: &'a BbtCatalog,
    /// Allowed reaction indices per `(on, off)` input pair.
    reaction_lookup: FxHashMap<(FgId, FgId), Vec<usize>>,
    /// Allowed deprotection indices per on-FG.
    deprotection_lookup: FxHashMap<FgId, Vec<usize>>,
    /// BBTs with at least one classified compound, in catalogue order.
    couplable: Vec<usize>,
}

impl<'a> Engine<'a> {
    /// Builds the expansion index tables.
    ///
    /// # Errors
    ///
    /// [`Error::Catalogue`] when the catalogue was generated against a
    /// different FG table.
    pub fn new(params: &'a Params, catalog: &'a BbtCatalog) -> Result<Self> {
        if catalog
            .bbts
            .first()
            .is_some_and(|bbt| bbt.long.len() != params.fgs.len())
        {
            return Err(Error::Catalogue(
                "BBT catalogue does not match the FG table".into(),
            ));
        }
        let allowed = |production: bool| {
            params.globals.include_designs == IncludeDesigns::Both || production
        };
        let mut reaction_lookup: FxHashMap<(FgId, FgId), Vec<usize>> = FxHashMap::default();
        for (index, rule) in params.reactions.iter().enumerate().skip(1) {
            if allowed(rule.production) {
                reaction_lookup.entry(rule.input).or_default().push(index);
            }
        }
        let mut deprotection_lookup: FxHashMap<FgId, Vec<usize>> = FxHashMap::default();
        for (index, rule) in params.deprotections.iter().enumerate().skip(1) {
            if allowed(rule.production) {
                deprotection_lookup.entry(rule.input.0).or_default().push(index);
            }
        }
        Ok(Self {
            params,
            catalog,
            reaction_lookup,
            deprotection_lookup,
            couplable: catalog.couplable_bbts(),
        })
    }

    /// One initial design per headpiece-linked BBT.
    #[must_use]
    pub fn roots(&self) -> Vec<Design> {
        self.catalog
            .headpiece_bbts()
            .into_iter()
            .map(|hp_bbt| Design::root(hp_bbt, self.catalog, self.params))
            .collect()
    }

    /// Step A of a cycle transition: the no-op child plus one child per
    /// applicable deprotection.
    #[must_use]
    pub fn deprotect_step(&self, design: &Design) -> Vec<Design> {
        let mut out = Vec::new();
        let mut no_op = design.clone();
        no_op.deprotections.push(0);
        no_op.dtopology.push(0);
        out.push(no_op);
        for (pos, fg_on, _) in design.occurrences() {
            let Some(indices) = self.deprotection_lookup.get(&fg_on) else {
                continue;
            };
            for &d in indices {
                if let Some(child) = self.apply_deprotection(design, d, pos) {
                    out.push(child);
                }
            }
        }
        out
    }

    fn apply_deprotection(&self, design: &Design, d: usize, pos: usize) -> Option<Design> {
        let rule = &self.params.deprotections[d];
        let mut child = design.clone();
        child.n_deprotections += 1;
        child.n_unpr_deprotections += 1;
        // every deprotection must be redeemed by a later coupling
        if child.unproductive_budget_exceeded() {
            return None;
        }
        child.fgs.remove(pos);
        let source = child.fg_sources.remove(pos);
        child.dtopology.push(source);
        if rule.excluded_on.iter().any(|ex| child.fgs.contains(ex)) {
            return None;
        }
        for out_fg in [rule.output.0, rule.output.1] {
            if out_fg != 0
                && child
                    .fgs
                    .iter()
                    .any(|&old| self.params.incompatibility(old).contains(&out_fg))
            {
                return None;
            }
        }
        child.deprotections.push(d);
        let tag = deprotection_tag(child.n_cycles);
        for out_fg in [rule.output.0, rule.output.1] {
            if out_fg != 0 {
                child.fgs.push(out_fg);
                child.fg_sources.push(tag);
            }
        }
        if rule.atom_dif > 0 {
            // scaffold insertion; checked against the upcoming cycle's cap
            child.min_natoms += rule.atom_dif;
            if child.min_natoms > self.params.globals.max_cycle_na[child.n_cycles] {
                return None;
            }
        }
        Some(child)
    }

    /// Step B of a cycle transition: every (BBT, exposed FG, reaction) match
    /// that survives pruning.
    #[must_use]
    pub fn couple_step(&self, design: &Design) -> Vec<Design> {
        let mut out = Vec::new();
        if design.fgs.is_empty() {
            return out;
        }
        let occurrences = design.occurrences();
        for &bbt_index in &self.couplable {
            let bbt = &self.catalog.bbts[bbt_index];
            let mut seen_off: Vec<FgId> = Vec::new();
            for fg_off in bbt.exposed_fgs() {
                if seen_off.contains(&fg_off) {
                    continue;
                }
                seen_off.push(fg_off);
                for &(pos, fg_on, _) in &occurrences {
                    let Some(indices) = self.reaction_lookup.get(&(fg_on, fg_off)) else {
                        continue;
                    };
                    for &r in indices {
                        if let Some(child) = self.apply_coupling(design, bbt_index, r, pos, fg_off)
                        {
                            out.push(child);
                        }
                    }
                }
            }
        }
        out
    }

    fn apply_coupling(
        &self,
        design: &Design,
        bbt_index: usize,
        r: usize,
        pos: usize,
        fg_off: FgId,
    ) -> Option<Design> {
        let rule = &self.params.reactions[r];
        let bbt = &self.catalog.bbts[bbt_index];
        let mut child = design.clone();
        child.n_cycles += 1;
        let source = child.fg_sources[pos];
        if from_deprotection(source) {
            child.n_unpr_deprotections -= 1;
        }
        // no remaining cycle could consume every pending deprotection output
        if child.unproductive_budget_exceeded() {
            return None;
        }
        child.btopology.push(source);
        child.fgs.remove(pos);
        child.fg_sources.remove(pos);
        let mut remaining: Vec<FgId> = Vec::with_capacity(2);
        let mut consumed = false;
        for &fg in &bbt.triple {
            if !consumed && fg == fg_off {
                consumed = true;
            } else if fg != 0 {
                remaining.push(fg);
            }
        }
        // the rule is forbidden next to these groups on the strand
        if rule.excluded_on.iter().any(|ex| child.fgs.contains(ex)) {
            return None;
        }
        // or next to these groups on the incoming building block
        if rule.excluded_off.iter().any(|ex| remaining.contains(ex)) {
            return None;
        }
        // everything newly exposed must tolerate everything still exposed
        for &new_fg in [rule.output.0, rule.output.1].iter().chain(&remaining) {
            if new_fg != 0
                && child
                    .fgs
                    .iter()
                    .any(|&old| self.params.incompatibility(old).contains(&new_fg))
            {
                return None;
            }
        }
        child.bbts.push(bbt_index);
        child.reactions.push(r);
        let ctag = coupling_tag(child.n_cycles);
        for fg in remaining {
            child.fgs.push(fg);
            child.fg_sources.push(ctag);
        }
        let rtag = reaction_tag(child.n_cycles);
        for out_fg in [rule.output.0, rule.output.1] {
            if out_fg != 0 {
                child.fgs.push(out_fg);
                child.fg_sources.push(rtag);
            }
        }
        // a closed molecule before the last cycle can never grow again
        if child.fgs.is_empty() && child.n_cycles < child.total_cycles {
            return None;
        }
        // the smallest possible product already busts this cycle's atom cap
        child.min_natoms += bbt.min_atoms;
        if child.min_natoms > self.params.globals.max_cycle_na[child.n_cycles - 1] {
            return None;
        }
        // whatever stays exposed at the end must be allowed to stay exposed
        if child.is_complete()
            && child
                .fgs
                .iter()
                .any(|&fg| !self.params.fgs[fg as usize].allowed_end_exposed)
        {
            return None;
        }
        Some(child)
    }

    /// One full cycle transition for one design.
    #[must_use]
    pub fn expand(&self, design: &Design) -> Vec<Design> {
        self.deprotect_step(design)
            .iter()
            .flat_map(|deprotected| self.couple_step(deprotected))
            .collect()
    }

    /// Expands a batch in parallel, preserving the input order of the
    /// children.
    #[must_use]
    pub fn expand_batch(&self, batch: &[Design]) -> Vec<Design> {
        batch
            .par_iter()
            .flat_map_iter(|design| self.expand(design))
            .collect()
    }

    /// Terminal checks and lib_id stamping for a complete design. Returns
    /// `None` when the design fails the absolute size gate.
    #[must_use]
    pub fn finalize(&self, mut design: Design) -> Option<Design> {
        debug_assert!(design.is_complete());
        if design.min_natoms > self.params.globals.max_na_absolute {
            return None;
        }
        let mut id = Vec::with_capacity(2 + 4 * design.total_cycles);
        id.push(design.total_cycles as u32);
        for &d in &design.deprotections {
            id.push(self.params.deprotections[d].enum_index as u32);
        }
        for &r in &design.reactions {
            id.push(self.params.reactions[r].enum_index as u32);
        }
        id.extend(design.dtopology.iter().map(|&tag| u32::from(tag)));
        id.extend(design.btopology.iter().map(|&tag| u32::from(tag)));
        id.push(design.bbts[0] as u32);
        design.lib_id = Some(LibId(id));
        Some(design)
    }
}
