use super::helpers;
use super::{GlobalConfiguration, Subcommand};
use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use deldesign::bbt::BbtCatalog;
use deldesign::chem::ExternalToolkit;
use deldesign::classify::{write_compound_files, Classifier};
use prettytable::row;
use std::path::PathBuf;
use std::process::ExitCode;

/// Classify building blocks into building-block types.
#[derive(Parser)]
pub struct Opts {
    /// Directory with the parameter files.
    #[arg(long, value_hint = ValueHint::DirPath)]
    params: PathBuf,
    /// Output directory for the catalogue, report and per-BBT listings.
    #[arg(long, value_hint = ValueHint::DirPath)]
    out: PathBuf,
    /// Directory with the cheminformatics tool executables; defaults to the
    /// DELDESIGN_TOOLKIT environment variable.
    #[arg(long, value_hint = ValueHint::DirPath)]
    toolkit: Option<PathBuf>,
    /// Source compound files, one `smiles id` pair per line.
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    sources: Vec<PathBuf>,
}

impl Subcommand for Opts {
    fn run(&self, _: &GlobalConfiguration) -> Result<ExitCode> {
        let params = helpers::load_params(&self.params)?;
        let toolkit_dir = self
            .toolkit
            .clone()
            .or_else(|| std::env::var_os("DELDESIGN_TOOLKIT").map(PathBuf::from))
            .context("no toolkit directory; pass --toolkit or set DELDESIGN_TOOLKIT")?;
        let toolkit = ExternalToolkit::new(&toolkit_dir)?;
        let mut catalog = BbtCatalog::generate(&params)?;

        let (compounds, stats) =
            Classifier::new(&params, &toolkit).run(&self.sources, &mut catalog)?;

        std::fs::create_dir_all(&self.out)
            .with_context(|| format!("unable to create '{}'", self.out.display()))?;
        let bbt_files = write_compound_files(&compounds, &self.out.join("comps"))?;
        helpers::write_catalog(&self.out.join("bbts.bin"), &catalog)?;

        let report = self.out.join("bbt_report.csv");
        let mut writer = csv::Writer::from_path(&report)
            .with_context(|| format!("unable to write '{}'", report.display()))?;
        for record in catalog.report_rows(&params) {
            writer.serialize(record)?;
        }
        writer.flush()?;

        let mut table = helpers::create_table();
        table.set_titles(row![c => "read", "kept", "duplicates", "dropped", "BBT files"]);
        table.add_row(row![
            r->stats.read,
            r->stats.kept,
            r->stats.duplicates,
            r->stats.dropped(),
            r->bbt_files
        ]);
        table.printstd();

        Ok(ExitCode::SUCCESS)
    }
}
