use log::info;

use clap::Parser;
use snafu::prelude::*;
use snafu::ErrorCompat;

use std::time::Duration;

mod args;
mod crosscheck;

use crate::args::{Args, Command};
use crate::crosscheck::exec::SystemRunner;
use crate::crosscheck::fullcount::FullCountAdapter;
use crate::crosscheck::repo::ElectionRepo;
use crate::crosscheck::stepcount::StepCountAdapter;
use crate::crosscheck::{
    ballot_to_json, compare_all, tally_to_json, BackendAdapter, CheckResult, JsonSnafu,
};

fn build_adapter(args: &Args, backend: &str) -> CheckResult<Box<dyn BackendAdapter>> {
    let timeout = Duration::from_secs(args.timeout_secs);
    match backend {
        "fullcount" => Ok(Box::new(FullCountAdapter::new(
            &args.fullcount_bin,
            Box::new(SystemRunner::new(timeout)),
        ))),
        "stepcount" => Ok(Box::new(StepCountAdapter::new(
            &args.stepcount_bin,
            Box::new(SystemRunner::new(timeout)),
        ))),
        x => {
            whatever!("unknown backend {:?} (expected fullcount or stepcount)", x)
        }
    }
}

fn build_all_adapters(args: &Args) -> CheckResult<Vec<Box<dyn BackendAdapter>>> {
    Ok(vec![
        build_adapter(args, "fullcount")?,
        build_adapter(args, "stepcount")?,
    ])
}

fn run(args: &Args) -> CheckResult<()> {
    let repo = ElectionRepo::new(&args.repo);
    match &args.command {
        Command::Compare { elections } => {
            let elections = if elections.is_empty() {
                repo.all_elections()?
            } else {
                elections.clone()
            };
            let adapters = build_all_adapters(args)?;
            let reports = compare_all(&elections, &repo, &adapters)?;
            info!("checked {} elections", reports.len());
            Ok(())
        }
        Command::Run { backend, election } => {
            let adapter = build_adapter(args, backend)?;
            let roster = repo.load_roster(election)?;
            let ballot = repo.load_master_ballot(election)?;
            let tally = adapter.run_election(election, &ballot, &roster)?;
            let js = serde_json::to_string(&tally_to_json(&tally)).context(JsonSnafu {})?;
            println!("{}", js);
            Ok(())
        }
        Command::Dump { election } => {
            let ballot = repo.load_master_ballot(election)?;
            let js = serde_json::to_string(&ballot_to_json(&ballot)).context(JsonSnafu {})?;
            println!("{}", js);
            Ok(())
        }
    }
}

fn main() {
    let args = Args::parse();
    if args.verbose {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    if let Err(e) = run(&args) {
        eprintln!("An error occured: {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
