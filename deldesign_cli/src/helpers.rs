use anyhow::{Context, Result};
use deldesign::bbt::BbtCatalog;
use deldesign::params::Params;
use prettytable::format::{FormatBuilder, LinePosition, LineSeparator};
use prettytable::Table;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub fn load_params(dir: &Path) -> Result<Params> {
    Params::load(dir).with_context(|| format!("unable to load parameters from '{}'", dir.display()))
}

pub fn read_catalog(path: &Path) -> Result<BbtCatalog> {
    BbtCatalog::read(BufReader::new(
        File::open(path).with_context(|| format!("unable to open '{}'", path.display()))?,
    ))
    .with_context(|| format!("unable to read '{}'", path.display()))
}

pub fn write_catalog(path: &Path, catalog: &BbtCatalog) -> Result<()> {
    catalog
        .write(BufWriter::new(File::create(path).with_context(|| {
            format!("unable to write '{}'", path.display())
        })?))
        .with_context(|| format!("unable to write '{}'", path.display()))
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table.set_format(
        FormatBuilder::new()
            .column_separator(' ')
            .separator(LinePosition::Title, LineSeparator::new('-', '+', ' ', ' '))
            .build(),
    );
    table
}
