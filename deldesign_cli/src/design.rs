use super::helpers;
use super::{GlobalConfiguration, Subcommand};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueHint};
use deldesign::bbt::BbtCatalog;
use deldesign::design::{Design, Engine};
use deldesign::libdesign::{validate_all, Coalescer, LibDesign};
use deldesign::params::Params;
use deldesign::stream::{StreamReader, StreamWriter};
use prettytable::row;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

/// Enumerate library designs from a classified BBT catalogue.
#[derive(Parser)]
pub struct Opts {
    /// Directory with the parameter files.
    #[arg(long, value_hint = ValueHint::DirPath)]
    params: PathBuf,
    /// BBT catalogue written by `classify`.
    #[arg(long, value_hint = ValueHint::FilePath)]
    catalog: PathBuf,
    /// Output directory for checkpoints and the library stream.
    #[arg(long, value_hint = ValueHint::DirPath)]
    out: PathBuf,
    /// Continue from an existing cycle checkpoint instead of the headpieces.
    #[arg(long, value_name = "CYCLE")]
    resume_cycle: Option<usize>,
    /// Keep the per-cycle design checkpoint files.
    #[arg(long)]
    keep_checkpoints: bool,
}

impl Opts {
    fn checkpoint(&self, cycle: usize) -> PathBuf {
        self.out.join(format!("designs_cycle_{cycle}.bin"))
    }
}

impl Subcommand for Opts {
    fn run(&self, _: &GlobalConfiguration) -> Result<ExitCode> {
        let params = helpers::load_params(&self.params)?;
        let catalog = helpers::read_catalog(&self.catalog)?;
        let engine = Engine::new(&params, &catalog)?;
        fs::create_dir_all(&self.out)
            .with_context(|| format!("unable to create '{}'", self.out.display()))?;

        let total_cycles = params.globals.total_cycles();
        let start = match self.resume_cycle {
            Some(cycle) => {
                if cycle > total_cycles {
                    bail!("cannot resume from cycle {cycle}, the run has {total_cycles}");
                }
                if !self.checkpoint(cycle).is_file() {
                    bail!("no checkpoint for cycle {cycle} in '{}'", self.out.display());
                }
                cycle
            }
            None => {
                let roots = engine.roots();
                info!(headpieces = roots.len(), "creating root designs");
                write_designs(&self.checkpoint(0), &roots)?;
                0
            }
        };

        for cycle in start..total_cycles {
            let last = cycle + 1 == total_cycles;
            let input = self.checkpoint(cycle);
            let mut reader: StreamReader<File, Design> = StreamReader::new(
                File::open(&input).with_context(|| format!("unable to open '{}'", input.display()))?,
            );
            let mut writer = StreamWriter::new(File::create(self.checkpoint(cycle + 1))?);
            let mut produced = 0u64;
            loop {
                let batch = reader.read_batch(params.globals.designs_in_memory)?;
                if batch.is_empty() {
                    break;
                }
                let mut children = engine.expand_batch(&batch);
                if last {
                    children = children
                        .into_iter()
                        .filter_map(|design| engine.finalize(design))
                        .collect();
                }
                produced += children.len() as u64;
                for child in &children {
                    writer.write(child)?;
                }
            }
            writer.finish()?;
            info!(cycle = cycle + 1, designs = produced, "cycle expanded");
        }

        // single-threaded coalescence keeps the final numbering deterministic
        let mut coalescer = Coalescer::new();
        let mut n_designs = 0u64;
        let mut reader: StreamReader<File, Design> =
            StreamReader::new(File::open(self.checkpoint(total_cycles))?);
        while let Some(design) = reader.read()? {
            coalescer.insert(&design, &params)?;
            n_designs += 1;
        }
        info!(
            designs = n_designs,
            libraries = coalescer.len(),
            "coalescence finished"
        );

        let (libraries, stats) = validate_all(coalescer.into_libs(), &catalog, &params);

        let mut writer = StreamWriter::new(File::create(self.out.join("libdesigns.bin"))?);
        for library in &libraries {
            writer.write(library)?;
        }
        writer.finish()?;
        write_summaries(&self.out.join("libdesigns.txt"), &libraries, &params, &catalog)?;

        if !self.keep_checkpoints {
            for cycle in 0..=total_cycles {
                let _ = fs::remove_file(self.checkpoint(cycle));
            }
        }

        let mut table = helpers::create_table();
        table.set_titles(row![c => "designs", "libraries", "validated", "discarded"]);
        table.add_row(row![
            r->n_designs,
            r->(stats.kept + stats.discarded()),
            r->stats.kept,
            r->stats.discarded()
        ]);
        table.printstd();

        Ok(ExitCode::SUCCESS)
    }
}

fn write_designs(path: &Path, designs: &[Design]) -> Result<()> {
    let mut writer = StreamWriter::new(File::create(path)?);
    for design in designs {
        writer.write(design)?;
    }
    writer.finish()?;
    Ok(())
}

fn write_summaries(
    path: &Path,
    libraries: &[LibDesign],
    params: &Params,
    catalog: &BbtCatalog,
) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    for library in libraries {
        let fingerprint = library
            .lib_id
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("_");
        writeln!(file, "library {}", library.id.unwrap_or_default())?;
        writeln!(file, "  fingerprint: {fingerprint}")?;
        if let Some(headpiece) = catalog.bbts[library.headpiece]
            .headpiece
            .and_then(|index| params.headpieces.get(index))
        {
            writeln!(file, "  headpiece: {}", headpiece.smiles)?;
        }
        for cycle in 0..library.n_cycles {
            if library.enum_deprotections[cycle] != 0 {
                writeln!(
                    file,
                    "  deprotect before cycle {}: {}",
                    cycle + 1,
                    params.enum_deprotections[library.enum_deprotections[cycle]].name
                )?;
            }
            writeln!(
                file,
                "  add cycle {} via {}: {} BBTs, {} building blocks",
                cycle + 1,
                params.enum_reactions[library.enum_reactions[cycle]].name,
                library.bbts[cycle].len(),
                library.all_limits.as_ref().map_or(0, |limits| limits[cycle])
            )?;
        }
        writeln!(file, "  expected products: {}", library.n_all.unwrap_or_default())?;
        writeln!(file)?;
    }
    file.flush()?;
    Ok(())
}
