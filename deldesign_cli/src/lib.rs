#![allow(missing_docs)]

mod classify;
mod design;
mod helpers;

use anyhow::Result;
use clap::Parser;
use enum_dispatch::enum_dispatch;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Number of worker threads; defaults to every core.
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Classify(classify::Opts),
    Design(design::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about,
    disable_help_subcommand = true,
    name = "deldesign",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}
