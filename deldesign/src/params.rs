//! The parameter model: tabular text files read at start of a run and the
//! typed tables built from them.
//!
//! A parameter file is a tab-separated grid. One axis enumerates attributes,
//! the other records. Every attribute row (after normalising the orientation)
//! reads `name, type, list-separator, description, value...`. Empty, `None`
//! and `Null` cells are absent values.

use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Index of a functional group. `0` is the null FG.
pub type FgId = u16;

/// Which axis of the file enumerates attributes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Orientation {
    /// One attribute per row; records are value columns.
    Rows,
    /// One attribute per column; records are value rows.
    Columns,
}

/// A parsed cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Empty, `None` or `Null` cell.
    None,
    /// A string cell.
    Str(String),
    /// An integer cell.
    Int(i64),
    /// A floating-point cell.
    Float(f64),
    /// A boolean cell (`y`/`true`).
    Bool(bool),
    /// Colon-separated `key:value` pairs.
    Dict(Vec<(String, f64)>),
    /// A separated list; elements are scalars or nested lists.
    List(Vec<Value>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Str(_) => "str",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Dict(_) => "dict",
            Self::List(_) => "list",
        }
    }

    /// Returns `true` for an absent cell.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The integer value, if this is an integer cell.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The float value; integer cells widen.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The string value, if this is a string cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean cell.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The list elements, if this is a list cell.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }
}

fn parse_scalar(raw: &str, ty: &str, path: &Path, name: &str) -> Result<Value> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() || upper == "NONE" || upper == "NULL" {
        return Ok(Value::None);
    }
    let raw = raw.trim();
    match ty {
        "str" => Ok(Value::Str(raw.to_owned())),
        "int" => raw.parse().map(Value::Int).map_err(|_| {
            Error::parameter(path, format!("attribute '{name}': '{raw}' is not an integer"))
        }),
        "float" => raw.parse().map(Value::Float).map_err(|_| {
            Error::parameter(path, format!("attribute '{name}': '{raw}' is not a float"))
        }),
        "bool" => Ok(Value::Bool(upper == "Y" || upper == "TRUE")),
        other => Err(Error::parameter(
            path,
            format!("attribute '{name}': unknown type '{other}'"),
        )),
    }
}

fn parse_dict(pieces: &[&str], path: &Path, name: &str) -> Result<Value> {
    let mut dict = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let (key, value) = piece.split_once(':').ok_or_else(|| {
            Error::parameter(path, format!("attribute '{name}': '{piece}' is not key:value"))
        })?;
        let value = value.trim().parse().map_err(|_| {
            Error::parameter(path, format!("attribute '{name}': '{piece}' has no float value"))
        })?;
        dict.push((key.trim().to_owned(), value));
    }
    Ok(Value::Dict(dict))
}

fn parse_cell(raw: &str, ty: &str, separator: &str, path: &Path, name: &str) -> Result<Value> {
    let upper = raw.trim().to_ascii_uppercase();
    let absent = upper.is_empty() || upper == "NONE" || upper == "NULL";
    if separator.is_empty() {
        if ty == "dict" {
            if absent {
                return Ok(Value::None);
            }
            return parse_dict(&[raw.trim()], path, name);
        }
        return parse_scalar(raw, ty, path, name);
    }
    if absent {
        return Ok(Value::None);
    }
    if let Some((outer, inner)) = separator.split_once(';') {
        // list of lists
        let mut rows = Vec::new();
        for chunk in raw.split(outer) {
            let pieces: Vec<&str> = chunk.split(inner).collect();
            if ty == "dict" {
                rows.push(parse_dict(&pieces, path, name)?);
            } else {
                let mut row = Vec::with_capacity(pieces.len());
                for piece in pieces {
                    row.push(parse_scalar(piece, ty, path, name)?);
                }
                rows.push(Value::List(row));
            }
        }
        return Ok(Value::List(rows));
    }
    let pieces: Vec<&str> = raw.split(separator).collect();
    if ty == "dict" {
        return parse_dict(&pieces, path, name);
    }
    let mut list = Vec::with_capacity(pieces.len());
    for piece in pieces {
        list.push(parse_scalar(piece, ty, path, name)?);
    }
    Ok(Value::List(list))
}

/// A fully parsed parameter file, orientation-normalised.
#[derive(Debug)]
pub struct ParamTable {
    path: PathBuf,
    names: Vec<String>,
    index: FxHashMap<String, usize>,
    /// `data[attribute][record]`.
    data: Vec<Vec<Value>>,
    n_records: usize,
}

impl ParamTable {
    /// Reads and parses a parameter file.
    ///
    /// # Errors
    ///
    /// Any schema violation (missing columns, unknown type, unparsable cell,
    /// ragged record counts) is a fatal [`Error::Parameter`].
    pub fn load(path: &Path, orientation: Orientation) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| Error::parameter(path, format!("cannot read: {err}")))?;
        let mut grid: Vec<Vec<String>> = text
            .lines()
            .map(|line| line.trim_end_matches('\r').split('\t').map(str::to_owned).collect())
            .collect();
        if orientation == Orientation::Columns {
            let width = grid.iter().map(Vec::len).max().unwrap_or(0);
            let mut transposed = vec![Vec::with_capacity(grid.len()); width];
            for row in &grid {
                for (j, column) in transposed.iter_mut().enumerate() {
                    column.push(row.get(j).cloned().unwrap_or_default());
                }
            }
            grid = transposed;
        }
        if grid.len() < 2 {
            return Err(Error::parameter(path, "no attribute lines"));
        }

        let mut names = Vec::new();
        let mut index = FxHashMap::default();
        let mut data = Vec::new();
        let mut n_records = None;
        // the first line of the attribute axis is a caption and is ignored
        for line in &grid[1..] {
            if line.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            if line.len() < 4 {
                return Err(Error::parameter(
                    path,
                    format!("attribute line '{}' has fewer than 4 columns", line.join("\t")),
                ));
            }
            let name = line[0].trim().to_owned();
            let ty = line[1].trim().to_ascii_lowercase();
            let separator = line[2].trim().to_owned();
            // line[3] is the description
            let cells = &line[4..];
            let records = n_records.get_or_insert(cells.len());
            if cells.len() != *records {
                return Err(Error::parameter(
                    path,
                    format!(
                        "attribute '{name}' has {} values, expected {records}",
                        cells.len()
                    ),
                ));
            }
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                values.push(parse_cell(cell, &ty, &separator, path, &name)?);
            }
            index.insert(name.clone(), names.len());
            names.push(name);
            data.push(values);
        }
        let n_records = n_records.unwrap_or(0);
        Ok(Self {
            path: path.to_owned(),
            names,
            index,
            data,
            n_records,
        })
    }

    /// Number of records (value columns/rows) in the file.
    #[must_use]
    pub const fn n_records(&self) -> usize {
        self.n_records
    }

    /// Attribute names in file order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Looks up the cell for `name` in `record`.
    ///
    /// # Errors
    ///
    /// Fails when the attribute does not exist in the file.
    pub fn get(&self, record: usize, name: &str) -> Result<&Value> {
        let attr = *self
            .index
            .get(name)
            .ok_or_else(|| Error::parameter(&self.path, format!("missing attribute '{name}'")))?;
        if record >= self.n_records {
            return Err(Error::parameter(
                &self.path,
                format!("attribute '{name}': record {record} out of range"),
            ));
        }
        Ok(&self.data[attr][record])
    }

    fn bad(&self, record: usize, name: &str, want: &str, got: &Value) -> Error {
        Error::parameter(
            &self.path,
            format!(
                "attribute '{name}' record {record}: expected {want}, found {}",
                got.kind()
            ),
        )
    }

    /// Required integer cell.
    pub fn int(&self, record: usize, name: &str) -> Result<i64> {
        let value = self.get(record, name)?;
        value.as_int().ok_or_else(|| self.bad(record, name, "int", value))
    }

    /// Optional integer cell.
    pub fn opt_int(&self, record: usize, name: &str) -> Result<Option<i64>> {
        let value = self.get(record, name)?;
        if value.is_none() {
            return Ok(None);
        }
        value
            .as_int()
            .map(Some)
            .ok_or_else(|| self.bad(record, name, "int", value))
    }

    /// Required float cell.
    pub fn float(&self, record: usize, name: &str) -> Result<f64> {
        let value = self.get(record, name)?;
        value.as_float().ok_or_else(|| self.bad(record, name, "float", value))
    }

    /// Required string cell.
    pub fn str(&self, record: usize, name: &str) -> Result<&str> {
        let value = self.get(record, name)?;
        value.as_str().ok_or_else(|| self.bad(record, name, "str", value))
    }

    /// Boolean cell; absent reads as `false`.
    pub fn bool(&self, record: usize, name: &str) -> Result<bool> {
        let value = self.get(record, name)?;
        if value.is_none() {
            return Ok(false);
        }
        value.as_bool().ok_or_else(|| self.bad(record, name, "bool", value))
    }

    /// Integer list cell; absent reads as empty. A bare scalar reads as a
    /// one-element list.
    pub fn int_list(&self, record: usize, name: &str) -> Result<Vec<i64>> {
        let value = self.get(record, name)?;
        match value {
            Value::None => Ok(Vec::new()),
            Value::Int(v) => Ok(vec![*v]),
            Value::List(items) => items
                .iter()
                .filter(|item| !item.is_none())
                .map(|item| item.as_int().ok_or_else(|| self.bad(record, name, "int list", value)))
                .collect(),
            _ => Err(self.bad(record, name, "int list", value)),
        }
    }

    /// String list cell; absent reads as empty.
    pub fn str_list(&self, record: usize, name: &str) -> Result<Vec<String>> {
        let value = self.get(record, name)?;
        match value {
            Value::None => Ok(Vec::new()),
            Value::Str(v) => Ok(vec![v.clone()]),
            Value::List(items) => items
                .iter()
                .filter(|item| !item.is_none())
                .map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| self.bad(record, name, "str list", value))
                })
                .collect(),
            _ => Err(self.bad(record, name, "str list", value)),
        }
    }

    fn fg(&self, record: usize, name: &str, n_fgs: usize) -> Result<FgId> {
        let raw = self.int(record, name)?;
        fg_in_range(raw, n_fgs)
            .ok_or_else(|| self.bad(record, name, "FG index", &Value::Int(raw)))
    }

    fn fg_list(&self, record: usize, name: &str, n_fgs: usize) -> Result<Vec<FgId>> {
        self.int_list(record, name)?
            .into_iter()
            .map(|raw| {
                fg_in_range(raw, n_fgs)
                    .ok_or_else(|| self.bad(record, name, "FG index list", &Value::Int(raw)))
            })
            .collect()
    }
}

fn fg_in_range(raw: i64, n_fgs: usize) -> Option<FgId> {
    (0..n_fgs as i64).contains(&raw).then_some(raw as FgId)
}

/// A functional group. Index 0 is the null FG.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FunctionalGroup {
    /// Human-readable name, unique within its table.
    pub name: String,
    /// FG indices that cannot co-exist with this one on the same molecule.
    pub self_incompatibility: Vec<FgId>,
    /// Heavy atoms lost/gained when this FG takes part in a reaction.
    pub atom_dif: i32,
    /// Rotatable bonds discounted for this FG.
    pub excess_rb: i32,
    /// May this FG remain unreacted in a final product?
    pub allowed_end_exposed: bool,
    /// Substructure query handles, opaque to the engine.
    pub base_queries: Vec<String>,
}

/// A pairwise coupling rule (`input.1 != 0`) or a deprotection
/// (`input.1 == 0`). Row 0 of each table is the null rule.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Reaction {
    /// Human-readable name of the detailed rule.
    pub name: String,
    /// `(on, off)` FG pair consumed by the rule.
    pub input: (FgId, FgId),
    /// FGs newly exposed; either may be the null FG.
    pub output: (FgId, FgId),
    /// FGs that forbid the rule when exposed on the on-strand molecule.
    pub excluded_on: Vec<FgId>,
    /// FGs that forbid the rule when present on the incoming building block.
    pub excluded_off: Vec<FgId>,
    /// Heavy atoms inserted by a scaffold deprotection; 0 otherwise.
    pub atom_dif: i32,
    /// Index into the enumeration-group table.
    pub enum_index: usize,
    /// Whether the rule is cleared for production runs.
    pub production: bool,
}

/// A wet-lab-level enumeration operation grouping detailed rules.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnumOp {
    /// Name of the operation as it appears in enumeration instructions.
    pub name: String,
}

/// A DNA anchor: the BBT triple synthesis starts from, plus its molecule.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Headpiece {
    /// Sorted FG triple this headpiece exposes.
    pub bbt: [FgId; 3],
    /// The anchor molecule.
    pub smiles: String,
}

/// A calculated FG: its count is derived from other FG counts.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CalcFg {
    /// Name of the FG this rule computes.
    pub name: String,
    /// FG names whose counts are added.
    pub rule_add: Vec<String>,
    /// FG names whose counts are subtracted.
    pub rule_subtract: Vec<String>,
}

/// Building-block admission limits.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BbLimits {
    /// Coarse raw heavy-atom cap (exclusive); `None` is unbounded.
    pub raw_na_filter: Option<i32>,
    /// Coarse raw rotatable-bond cap (exclusive); `None` is unbounded.
    pub raw_rb_filter: Option<i32>,
    /// Maximum effective rotatable bonds (inclusive).
    pub rb_filter: i32,
    /// Minimum effective heavy atoms (inclusive).
    pub min_bb_na: i32,
    /// Maximum effective heavy atoms (inclusive); sizes the histograms.
    pub max_bb_na: i32,
}

/// Which detailed rules the growth engine may use.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IncludeDesigns {
    /// Every rule in the tables.
    Both,
    /// Only rules flagged for production.
    Production,
}

impl FromStr for IncludeDesigns {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "production" => Ok(Self::Production),
            other => Err(format!("'{other}' is not 'both' or 'production'")),
        }
    }
}

/// Global run parameters.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GlobalParams {
    /// Heavy atoms contributed by any headpiece.
    pub headpiece_na: i32,
    /// Per-cycle running atom caps; the length is the number of cycles.
    pub max_cycle_na: Vec<i32>,
    /// Hard cap on the minimum product size of a finished design.
    pub max_na_absolute: i32,
    /// Product-size bound used to pick the percentile reference.
    pub max_na_percentile: i32,
    /// Fraction of the library that must fit under `max_na_percentile`.
    pub percentile: f64,
    /// Minimum expected product count for a library to survive.
    pub min_count: u64,
    /// Cap on atoms inserted by scaffold deprotections.
    pub max_scaffolds_na: i32,
    /// Designs held in memory per expansion batch.
    pub designs_in_memory: usize,
    /// Which detailed rules the growth engine may use.
    pub include_designs: IncludeDesigns,
}

impl GlobalParams {
    /// Number of BBT-addition cycles in every design of the run.
    #[must_use]
    pub fn total_cycles(&self) -> usize {
        self.max_cycle_na.len()
    }
}

/// The complete immutable parameter model of a run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Params {
    /// Functional groups; index 0 is the null FG.
    pub fgs: Vec<FunctionalGroup>,
    /// Groups whose presence disqualifies a building block.
    pub anti_fgs: Vec<FunctionalGroup>,
    /// Rules deriving FG counts from other FG counts.
    pub calc_fgs: Vec<CalcFg>,
    /// Coupling rules; row 0 is the null rule.
    pub reactions: Vec<Reaction>,
    /// Deprotection rules; row 0 is the null rule.
    pub deprotections: Vec<Reaction>,
    /// Enumeration groups for reactions.
    pub enum_reactions: Vec<EnumOp>,
    /// Enumeration groups for deprotections.
    pub enum_deprotections: Vec<EnumOp>,
    /// Declared DNA anchors.
    pub headpieces: Vec<Headpiece>,
    /// Building-block admission limits.
    pub limits: BbLimits,
    /// Global run parameters.
    pub globals: GlobalParams,
}

fn load_fgs(path: &Path, with_ledger: bool) -> Result<Vec<FunctionalGroup>> {
    let table = ParamTable::load(path, Orientation::Columns)?;
    let n_fgs = table.n_records();
    let mut fgs = Vec::with_capacity(n_fgs);
    for record in 0..n_fgs {
        let (self_incompatibility, atom_dif, excess_rb, allowed_end_exposed) = if with_ledger {
            (
                table.fg_list(record, "self_incompatibility", n_fgs)?,
                table.int(record, "atom_dif")? as i32,
                table.int(record, "excess_rb")? as i32,
                table.bool(record, "allowed_end_exposed")?,
            )
        } else {
            (Vec::new(), 0, 0, true)
        };
        fgs.push(FunctionalGroup {
            name: table.str(record, "name")?.to_owned(),
            self_incompatibility,
            atom_dif,
            excess_rb,
            allowed_end_exposed,
            base_queries: table.str_list(record, "base_queries")?,
        });
    }
    Ok(fgs)
}

fn load_rules(path: &Path, n_fgs: usize, n_enum: usize, deprotection: bool) -> Result<Vec<Reaction>> {
    let table = ParamTable::load(path, Orientation::Columns)?;
    let mut rules = Vec::with_capacity(table.n_records());
    for record in 0..table.n_records() {
        let input = (
            table.fg(record, "fg_input_on", n_fgs)?,
            table.fg(record, "fg_input_off", n_fgs)?,
        );
        let atom_dif = if deprotection {
            table.int(record, "atom_dif")? as i32
        } else {
            0
        };
        let enum_index = table.int(record, "enum_index")? as usize;
        if enum_index >= n_enum {
            return Err(Error::parameter(
                path,
                format!("record {record}: enum_index {enum_index} out of range"),
            ));
        }
        if deprotection && input.1 != 0 {
            return Err(Error::parameter(
                path,
                format!("record {record}: a deprotection must have a null off-FG"),
            ));
        }
        if atom_dif < 0 {
            return Err(Error::parameter(
                path,
                format!("record {record}: negative atom_dif"),
            ));
        }
        rules.push(Reaction {
            name: table.str(record, "name")?.to_owned(),
            input,
            output: (
                table.fg(record, "fg_output_1", n_fgs)?,
                table.fg(record, "fg_output_2", n_fgs)?,
            ),
            excluded_on: table.fg_list(record, "excluded_on", n_fgs)?,
            excluded_off: table.fg_list(record, "excluded_off", n_fgs)?,
            atom_dif,
            enum_index,
            production: table.bool(record, "production")?,
        });
    }
    match rules.first() {
        Some(null) if null.input == (0, 0) && null.output == (0, 0) => Ok(rules),
        _ => Err(Error::parameter(path, "row 0 must be the null rule")),
    }
}

fn load_enum_ops(path: &Path) -> Result<Vec<EnumOp>> {
    let table = ParamTable::load(path, Orientation::Columns)?;
    (0..table.n_records())
        .map(|record| {
            Ok(EnumOp {
                name: table.str(record, "enum_name")?.to_owned(),
            })
        })
        .collect()
}

fn load_headpieces(path: &Path, n_fgs: usize) -> Result<Vec<Headpiece>> {
    let table = ParamTable::load(path, Orientation::Columns)?;
    let mut headpieces = Vec::with_capacity(table.n_records());
    for record in 0..table.n_records() {
        let triple = table.fg_list(record, "bbt", n_fgs)?;
        let bbt: [FgId; 3] = triple.as_slice().try_into().map_err(|_| {
            Error::parameter(path, format!("record {record}: bbt must have three FGs"))
        })?;
        headpieces.push(Headpiece {
            bbt,
            smiles: table.str(record, "smiles")?.to_owned(),
        });
    }
    Ok(headpieces)
}

fn load_calc_fgs(path: &Path) -> Result<Vec<CalcFg>> {
    let table = ParamTable::load(path, Orientation::Columns)?;
    (0..table.n_records())
        .map(|record| {
            Ok(CalcFg {
                name: table.str(record, "name")?.to_owned(),
                rule_add: table.str_list(record, "rule_add")?,
                rule_subtract: table.str_list(record, "rule_subtract")?,
            })
        })
        .collect()
}

fn load_limits(path: &Path) -> Result<BbLimits> {
    let table = ParamTable::load(path, Orientation::Rows)?;
    Ok(BbLimits {
        raw_na_filter: table.opt_int(0, "raw_na_filter")?.map(|v| v as i32),
        raw_rb_filter: table.opt_int(0, "raw_rb_filter")?.map(|v| v as i32),
        rb_filter: table.int(0, "rb_filter")? as i32,
        min_bb_na: table.int(0, "min_bb_na")? as i32,
        max_bb_na: table.int(0, "max_bb_na")? as i32,
    })
}

fn load_globals(path: &Path) -> Result<GlobalParams> {
    let table = ParamTable::load(path, Orientation::Rows)?;
    let include_designs = table
        .str(0, "include_designs")?
        .parse()
        .map_err(|reason: String| Error::parameter(path, reason))?;
    let globals = GlobalParams {
        headpiece_na: table.int(0, "headpiece_na")? as i32,
        max_cycle_na: table
            .int_list(0, "max_cycle_na")?
            .into_iter()
            .map(|v| v as i32)
            .collect(),
        max_na_absolute: table.int(0, "max_na_absolute")? as i32,
        max_na_percentile: table.int(0, "max_na_percentile")? as i32,
        percentile: table.float(0, "percentile")?,
        min_count: table.int(0, "min_count")? as u64,
        max_scaffolds_na: table.int(0, "max_scaffolds_na")? as i32,
        designs_in_memory: table.int(0, "designs_in_memory")? as usize,
        include_designs,
    };
    if globals.max_cycle_na.is_empty() {
        return Err(Error::parameter(path, "max_cycle_na must name at least one cycle"));
    }
    if !(globals.percentile > 0.0 && globals.percentile <= 1.0) {
        return Err(Error::parameter(path, "percentile must be in (0, 1]"));
    }
    if globals.designs_in_memory == 0 {
        return Err(Error::parameter(path, "designs_in_memory must be positive"));
    }
    Ok(globals)
}

impl Params {
    /// Loads the whole parameter set from its conventional file names in
    /// `dir` and cross-validates the tables.
    ///
    /// # Errors
    ///
    /// [`Error::Parameter`] for any unreadable or malformed file,
    /// [`Error::Catalogue`] for mutually inconsistent tables.
    pub fn load(dir: &Path) -> Result<Self> {
        let fgs = load_fgs(&dir.join("fg.par"), true)?;
        let n_fgs = fgs.len();
        let anti_fgs = load_fgs(&dir.join("antifg.par"), false)?;
        let calc_fgs = load_calc_fgs(&dir.join("calcfg.par"))?;
        let enum_reactions = load_enum_ops(&dir.join("enum_reaction.par"))?;
        let enum_deprotections = load_enum_ops(&dir.join("enum_deprotection.par"))?;
        let reactions = load_rules(&dir.join("reaction.par"), n_fgs, enum_reactions.len(), false)?;
        let deprotections = load_rules(
            &dir.join("deprotection.par"),
            n_fgs,
            enum_deprotections.len(),
            true,
        )?;
        let headpieces = load_headpieces(&dir.join("headpieces.par"), n_fgs)?;
        let limits = load_limits(&dir.join("bblimits.par"))?;
        let globals = load_globals(&dir.join("par.par"))?;

        let params = Self {
            fgs,
            anti_fgs,
            calc_fgs,
            reactions,
            deprotections,
            enum_reactions,
            enum_deprotections,
            headpieces,
            limits,
            globals,
        };
        params.check_consistency()?;
        Ok(params)
    }

    fn check_consistency(&self) -> Result<()> {
        if self.fgs.is_empty() {
            return Err(Error::Catalogue("no functional groups".into()));
        }
        let null = &self.fgs[0];
        if null.atom_dif != 0 || null.excess_rb != 0 || !null.self_incompatibility.is_empty() {
            return Err(Error::Catalogue(
                "FG 0 must be the null FG (no differentials, no incompatibilities)".into(),
            ));
        }
        for fg in &self.fgs {
            if fg.self_incompatibility.iter().any(|&other| other == 0) {
                return Err(Error::Catalogue(format!(
                    "FG '{}' declares the null FG incompatible",
                    fg.name
                )));
            }
        }
        for hp in &self.headpieces {
            let mut sorted = hp.bbt;
            sorted.sort_unstable();
            if sorted != hp.bbt {
                return Err(Error::Catalogue(format!(
                    "headpiece '{}' BBT triple is not sorted",
                    hp.smiles
                )));
            }
        }
        if self.limits.max_bb_na <= 0 || self.limits.min_bb_na < 0 {
            return Err(Error::Catalogue("building-block atom extent is empty".into()));
        }
        Ok(())
    }

    /// The self-incompatibility set of `fg`.
    #[must_use]
    pub fn incompatibility(&self, fg: FgId) -> &[FgId] {
        &self.fgs[fg as usize].self_incompatibility
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! A small synthetic parameter set shared by module tests.

    use super::*;

    fn fg(name: &str, allowed_end_exposed: bool) -> FunctionalGroup {
        FunctionalGroup {
            name: name.to_owned(),
            self_incompatibility: Vec::new(),
            atom_dif: 0,
            excess_rb: 0,
            allowed_end_exposed,
            base_queries: vec![format!("{name}.qry")],
        }
    }

    fn rule(
        input: (FgId, FgId),
        output: (FgId, FgId),
        enum_index: usize,
        atom_dif: i32,
    ) -> Reaction {
        Reaction {
            name: format!("rule_{}_{}", input.0, input.1),
            input,
            output,
            excluded_on: Vec::new(),
            excluded_off: Vec::new(),
            atom_dif,
            enum_index,
            production: true,
        }
    }

    /// FGs `0=no_fg, 1=A, 2=B, 3=C`, all compatible; one headpiece on
    /// `(0,0,A)`; reactions `r1: (A,B)->(0,0)` and `r2: (C,B)->(0,0)`;
    /// deprotection `d1: (A,0)->(C,0)`; one cycle.
    pub(crate) fn small_params() -> Params {
        Params {
            fgs: vec![
                FunctionalGroup {
                    name: "no_fg".to_owned(),
                    self_incompatibility: Vec::new(),
                    atom_dif: 0,
                    excess_rb: 0,
                    allowed_end_exposed: true,
                    base_queries: Vec::new(),
                },
                fg("A", true),
                fg("B", true),
                fg("C", true),
            ],
            anti_fgs: vec![fg("anti_x", true)],
            calc_fgs: Vec::new(),
            reactions: vec![
                rule((0, 0), (0, 0), 0, 0),
                rule((1, 2), (0, 0), 1, 0),
                rule((3, 2), (0, 0), 2, 0),
            ],
            deprotections: vec![rule((0, 0), (0, 0), 0, 0), rule((1, 0), (3, 0), 1, 0)],
            enum_reactions: vec![
                EnumOp { name: "none".to_owned() },
                EnumOp { name: "eg_ab".to_owned() },
                EnumOp { name: "eg_cb".to_owned() },
            ],
            enum_deprotections: vec![
                EnumOp { name: "none".to_owned() },
                EnumOp { name: "ed_ac".to_owned() },
            ],
            headpieces: vec![Headpiece {
                bbt: [0, 0, 1],
                smiles: "NCC".to_owned(),
            }],
            limits: BbLimits {
                raw_na_filter: None,
                raw_rb_filter: None,
                rb_filter: 10,
                min_bb_na: 1,
                max_bb_na: 20,
            },
            globals: GlobalParams {
                headpiece_na: 1,
                max_cycle_na: vec![10],
                max_na_absolute: 20,
                max_na_percentile: 18,
                percentile: 0.5,
                min_count: 1,
                max_scaffolds_na: 5,
                designs_in_memory: 1000,
                include_designs: IncludeDesigns::Both,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(lines: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.par");
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        (dir, path)
    }

    #[test]
    fn rows_orientation_scalars() {
        let (_dir, path) = write_table(&[
            "parameter\ttype\tsep\tdescription\tvalue",
            "alpha\tint\t\tan int\t3",
            "beta\tfloat\t\ta float\t0.5",
            "gamma\tbool\t\ta flag\tY",
            "delta\tstr\t\ta name\thello",
            "epsilon\tint\t\tabsent\tNone",
        ]);
        let table = ParamTable::load(&path, Orientation::Rows).unwrap();
        assert_eq!(table.n_records(), 1);
        assert_eq!(table.int(0, "alpha").unwrap(), 3);
        assert_eq!(table.float(0, "beta").unwrap(), 0.5);
        assert!(table.bool(0, "gamma").unwrap());
        assert_eq!(table.str(0, "delta").unwrap(), "hello");
        assert!(table.get(0, "epsilon").unwrap().is_none());
    }

    #[test]
    fn columns_orientation_lists() {
        // attribute per column; the first column is the caption axis
        let (_dir, path) = write_table(&[
            "caption\tname\tcodes\tgrid",
            "type\tstr\tint\tint",
            "sep\t\t,\t|;,",
            "desc\tx\ty\tz",
            "r0\tfirst\t1,2\t1,2|3,4",
            "r1\tsecond\tNone\t5,6|7,8",
        ]);
        let table = ParamTable::load(&path, Orientation::Columns).unwrap();
        assert_eq!(table.n_records(), 2);
        assert_eq!(table.str(0, "name").unwrap(), "first");
        assert_eq!(table.int_list(0, "codes").unwrap(), vec![1, 2]);
        assert_eq!(table.int_list(1, "codes").unwrap(), Vec::<i64>::new());
        let grid = table.get(1, "grid").unwrap().as_list().unwrap();
        assert_eq!(grid[1], Value::List(vec![Value::Int(7), Value::Int(8)]));
    }

    #[test]
    fn dict_cells() {
        let (_dir, path) = write_table(&[
            "parameter\ttype\tsep\tdescription\tvalue",
            "weights\tdict\t,\tper-key weights\ta:1.5,b:2",
        ]);
        let table = ParamTable::load(&path, Orientation::Rows).unwrap();
        let Value::Dict(dict) = table.get(0, "weights").unwrap() else {
            panic!("expected a dict");
        };
        assert_eq!(dict, &[("a".to_owned(), 1.5), ("b".to_owned(), 2.0)]);
    }

    #[test]
    fn malformed_int_is_fatal() {
        let (_dir, path) = write_table(&[
            "parameter\ttype\tsep\tdescription\tvalue",
            "alpha\tint\t\tan int\tnot-a-number",
        ]);
        let err = ParamTable::load(&path, Orientation::Rows).unwrap_err();
        assert!(matches!(err, Error::Parameter { .. }));
    }

    fn write_tsv(dir: &Path, name: &str, rows: &[&[&str]]) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        for row in rows {
            writeln!(file, "{}", row.join("\t")).unwrap();
        }
    }

    #[test]
    fn loads_a_full_parameter_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();
        write_tsv(dir, "fg.par", &[
            &["par", "name", "self_incompatibility", "atom_dif", "excess_rb", "allowed_end_exposed", "base_queries"],
            &["type", "str", "int", "int", "int", "bool", "str"],
            &["sep", "", ",", "", "", "", ","],
            &["desc", "fg", "incompatible", "atom delta", "rb discount", "end exposed", "queries"],
            &["fg0", "no_fg", "None", "0", "0", "y", "None"],
            &["fg1", "amine", "2", "-1", "0", "n", "amine.qry"],
            &["fg2", "acid", "1", "-1", "1", "y", "acid.qry"],
        ]);
        write_tsv(dir, "antifg.par", &[
            &["par", "name", "base_queries"],
            &["type", "str", "str"],
            &["sep", "", ","],
            &["desc", "fg", "queries"],
            &["a0", "alkyl_halide", "halide.qry"],
        ]);
        write_tsv(dir, "calcfg.par", &[
            &["par", "name", "rule_add", "rule_substract"],
            &["type", "str", "str", "str"],
            &["sep", "", ",", ","],
            &["desc", "fg", "add", "subtract"],
        ]);
        write_tsv(dir, "enum_reaction.par", &[
            &["par", "enum_name"],
            &["type", "str"],
            &["sep", ""],
            &["desc", "operation"],
            &["e0", "none"],
            &["e1", "amide_coupling"],
        ]);
        write_tsv(dir, "enum_deprotection.par", &[
            &["par", "enum_name"],
            &["type", "str"],
            &["sep", ""],
            &["desc", "operation"],
            &["e0", "none"],
            &["e1", "boc_removal"],
        ]);
        write_tsv(dir, "reaction.par", &[
            &["par", "name", "fg_input_on", "fg_input_off", "fg_output_1", "fg_output_2", "excluded_on", "excluded_off", "enum_index", "production"],
            &["type", "str", "int", "int", "int", "int", "int", "int", "int", "bool"],
            &["sep", "", "", "", "", "", ",", ",", "", ""],
            &["desc", "r", "on", "off", "out1", "out2", "exc on", "exc off", "group", "prod"],
            &["r0", "null", "0", "0", "0", "0", "None", "None", "0", "n"],
            &["r1", "amide", "1", "2", "0", "0", "None", "None", "1", "y"],
        ]);
        write_tsv(dir, "deprotection.par", &[
            &["par", "name", "fg_input_on", "fg_input_off", "fg_output_1", "fg_output_2", "excluded_on", "excluded_off", "atom_dif", "enum_index", "production"],
            &["type", "str", "int", "int", "int", "int", "int", "int", "int", "int", "bool"],
            &["sep", "", "", "", "", "", ",", ",", "", "", ""],
            &["desc", "d", "on", "off", "out1", "out2", "exc on", "exc off", "atoms", "group", "prod"],
            &["d0", "null", "0", "0", "0", "0", "None", "None", "0", "0", "n"],
            &["d1", "boc", "1", "0", "2", "0", "None", "None", "0", "1", "y"],
        ]);
        write_tsv(dir, "headpieces.par", &[
            &["par", "bbt", "smiles"],
            &["type", "int", "str"],
            &["sep", ",", ""],
            &["desc", "triple", "molecule"],
            &["h0", "0,0,1", "NCCOP"],
        ]);
        write_tsv(dir, "bblimits.par", &[
            &["parameter", "type", "sep", "desc", "value"],
            &["raw_na_filter", "int", "", "coarse atom cap", "30"],
            &["raw_rb_filter", "int", "", "coarse rb cap", "None"],
            &["rb_filter", "int", "", "effective rb cap", "10"],
            &["min_bb_na", "int", "", "min effective atoms", "1"],
            &["max_bb_na", "int", "", "max effective atoms", "25"],
        ]);
        write_tsv(dir, "par.par", &[
            &["parameter", "type", "sep", "desc", "value"],
            &["headpiece_na", "int", "", "headpiece atoms", "12"],
            &["max_cycle_na", "int", ",", "per-cycle caps", "25,40"],
            &["max_na_absolute", "int", "", "hard size cap", "70"],
            &["max_na_percentile", "int", "", "percentile size cap", "60"],
            &["percentile", "float", "", "fraction under the cap", "0.9"],
            &["min_count", "int", "", "minimum products", "1000000"],
            &["max_scaffolds_na", "int", "", "scaffold atom cap", "6"],
            &["designs_in_memory", "int", "", "batch size", "50000"],
            &["include_designs", "str", "", "rule scope", "both"],
        ]);

        let params = Params::load(dir).unwrap();
        assert_eq!(params.fgs.len(), 3);
        assert_eq!(params.fgs[1].name, "amine");
        assert_eq!(params.fgs[1].atom_dif, -1);
        assert!(!params.fgs[1].allowed_end_exposed);
        assert_eq!(params.incompatibility(1), &[2]);
        assert!(params.calc_fgs.is_empty());
        assert_eq!(params.anti_fgs[0].base_queries, vec!["halide.qry"]);
        assert_eq!(params.reactions.len(), 2);
        assert_eq!(params.reactions[1].input, (1, 2));
        assert_eq!(params.reactions[1].enum_index, 1);
        assert!(params.reactions[1].production);
        assert_eq!(params.deprotections[1].input, (1, 0));
        assert_eq!(params.deprotections[1].output, (2, 0));
        assert_eq!(params.headpieces[0].bbt, [0, 0, 1]);
        assert_eq!(params.headpieces[0].smiles, "NCCOP");
        assert_eq!(params.limits.raw_na_filter, Some(30));
        assert_eq!(params.limits.raw_rb_filter, None);
        assert_eq!(params.globals.total_cycles(), 2);
        assert_eq!(params.globals.max_cycle_na, vec![25, 40]);
        assert_eq!(params.globals.include_designs, IncludeDesigns::Both);
    }

    #[test]
    fn include_designs_parses() {
        assert_eq!("BOTH".parse::<IncludeDesigns>().unwrap(), IncludeDesigns::Both);
        assert_eq!(
            "production".parse::<IncludeDesigns>().unwrap(),
            IncludeDesigns::Production
        );
        assert!("sometimes".parse::<IncludeDesigns>().is_err());
    }
}
