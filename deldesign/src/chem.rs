//! Interface to the external cheminformatics toolkit.
//!
//! The engine never inspects molecular structure itself; everything chemical
//! is delegated through [`Toolkit`], a batch-oriented seam the classifier
//! drives with whole files of molecules at a time.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// A molecule as read from a source file.
#[derive(Clone, Debug)]
pub struct SmilesRecord {
    /// SMILES string as found in the source.
    pub smiles: String,
    /// Source-prefixed identifier.
    pub id: String,
}

/// Raw molecular properties reported by the toolkit.
#[derive(Clone, Copy, Debug)]
pub struct MolProps {
    /// Raw heavy-atom count.
    pub heavy_atoms: i32,
    /// Raw rotatable-bond count.
    pub rotatable_bonds: i32,
}

/// Batch operations the classifier needs from a cheminformatics toolkit.
pub trait Toolkit {
    /// Desalts and canonicalises each record; `None` marks an unparsable
    /// molecule.
    fn canonicalize(&self, records: &[SmilesRecord]) -> Result<Vec<Option<String>>>;

    /// Heavy-atom and rotatable-bond counts; `None` marks a molecule the
    /// toolkit could not process.
    fn properties(&self, smiles: &[String]) -> Result<Vec<Option<MolProps>>>;

    /// For every molecule, the number of matches of each substructure query,
    /// in query order.
    fn fg_counts(&self, smiles: &[String], queries: &[String]) -> Result<Vec<Vec<u32>>>;
}

/// A [`Toolkit`] backed by three executables in a tool directory.
///
/// Protocol: each tool is invoked as `tool <input> <output>` (plus a query
/// list file for `fgcount`) and must write exactly one line per input line.
/// `desalt` reads `smiles id` lines and writes the canonical SMILES or `*`;
/// `moldescr` reads bare SMILES and writes `heavy_atoms rotatable_bonds` or
/// `*`; `fgcount` reads bare SMILES and writes one count per query.
pub struct ExternalToolkit {
    desalt: PathBuf,
    moldescr: PathBuf,
    fgcount: PathBuf,
}

impl ExternalToolkit {
    /// Locates the tool executables under `dir`.
    ///
    /// # Errors
    ///
    /// [`Error::ExternalTool`] when the directory or any executable is
    /// missing.
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::ExternalTool(format!(
                "toolkit directory '{}' does not exist",
                dir.display()
            )));
        }
        let locate = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::ExternalTool(format!("missing tool '{}'", path.display())))
            }
        };
        Ok(Self {
            desalt: locate("desalt")?,
            moldescr: locate("moldescr")?,
            fgcount: locate("fgcount")?,
        })
    }

    fn run(&self, tool: &Path, input_lines: &[String], extra: Option<&Path>) -> Result<Vec<String>> {
        let work = tempfile::tempdir()?;
        let input = work.path().join("input.smi");
        let output = work.path().join("output.txt");
        let mut file = fs::File::create(&input)?;
        for line in input_lines {
            writeln!(file, "{line}")?;
        }
        drop(file);

        let mut command = Command::new(tool);
        command.arg(&input).arg(&output);
        if let Some(extra) = extra {
            command.arg(extra);
        }
        debug!(tool = %tool.display(), molecules = input_lines.len(), "invoking toolkit");
        let status = command
            .status()
            .map_err(|err| Error::ExternalTool(format!("cannot run '{}': {err}", tool.display())))?;
        if !status.success() {
            return Err(Error::ExternalTool(format!(
                "'{}' exited with {status}",
                tool.display()
            )));
        }
        let lines: Vec<String> = fs::read_to_string(&output)?
            .lines()
            .map(str::to_owned)
            .collect();
        if lines.len() != input_lines.len() {
            return Err(Error::ExternalTool(format!(
                "'{}' wrote {} lines for {} molecules",
                tool.display(),
                lines.len(),
                input_lines.len()
            )));
        }
        Ok(lines)
    }
}

impl Toolkit for ExternalToolkit {
    fn canonicalize(&self, records: &[SmilesRecord]) -> Result<Vec<Option<String>>> {
        let input: Vec<String> = records
            .iter()
            .map(|record| format!("{} {}", record.smiles, record.id))
            .collect();
        let lines = self.run(&self.desalt, &input, None)?;
        Ok(lines
            .into_iter()
            .map(|line| {
                let smiles = line.split_whitespace().next().unwrap_or("*");
                (smiles != "*").then(|| smiles.to_owned())
            })
            .collect())
    }

    fn properties(&self, smiles: &[String]) -> Result<Vec<Option<MolProps>>> {
        let lines = self.run(&self.moldescr, smiles, None)?;
        Ok(lines
            .into_iter()
            .map(|line| {
                let mut fields = line.split_whitespace();
                let heavy_atoms = fields.next()?.parse().ok()?;
                let rotatable_bonds = fields.next()?.parse().ok()?;
                Some(MolProps {
                    heavy_atoms,
                    rotatable_bonds,
                })
            })
            .collect())
    }

    fn fg_counts(&self, smiles: &[String], queries: &[String]) -> Result<Vec<Vec<u32>>> {
        let work = tempfile::tempdir()?;
        let query_file = work.path().join("queries.txt");
        let mut file = fs::File::create(&query_file)?;
        for query in queries {
            writeln!(file, "{query}")?;
        }
        drop(file);

        let lines = self.run(&self.fgcount, smiles, Some(&query_file))?;
        let mut counts = Vec::with_capacity(lines.len());
        for line in lines {
            let row: Vec<u32> = line
                .split_whitespace()
                .map(|field| field.parse().unwrap_or(0))
                .collect();
            if row.len() != queries.len() {
                return Err(Error::ExternalTool(format!(
                    "fgcount wrote {} counts for {} queries",
                    row.len(),
                    queries.len()
                )));
            }
            counts.push(row);
        }
        Ok(counts)
    }
}
