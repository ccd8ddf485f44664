use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::Context;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use photon_toolbox::intensity_tools::max_counts::{max_counts, write_max_counts};
use photon_toolbox::intensity_tools::trace::IntensityTrace;
use photon_toolbox::parsers::table::{open_intensity_file, IntensityRows};
use photon_toolbox::Mode;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("photon")
        .about("Intensity trace analysis for photon counting data")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("summary")
                .about("Summarize a tabular intensity trace")
                .arg(Arg::with_name("FILE").required(true))
                .arg(
                    Arg::with_name("mode")
                        .long("mode")
                        .takes_value(true)
                        .possible_values(&["t2", "t3"])
                        .help("Acquisition mode; auto-detected when omitted"),
                ),
        )
        .subcommand(
            SubCommand::with_name("max-counts")
                .about("Find the time bin with the largest total count")
                .arg(Arg::with_name("FILE").required(true))
                .arg(
                    Arg::with_name("out")
                        .long("out")
                        .takes_value(true)
                        .help("Destination for the summary row; stdout when omitted"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("summary", Some(sub)) => summary(sub),
        ("max-counts", Some(sub)) => max_counts_summary(sub),
        _ => unreachable!(),
    }
}

fn summary(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = Path::new(matches.value_of("FILE").unwrap());
    let mode = matches
        .value_of("mode")
        .map(str::parse::<Mode>)
        .transpose()?;

    let trace = IntensityTrace::from_file(path, mode)
        .with_context(|| format!("could not read {}", path.display()))?;

    println!("mode:      {}", trace.mode());
    println!("channels:  {}", trace.channel_count());
    println!("bins:      {}", trace.n_bins());
    println!("max count: {}", trace.max());
    println!("time unit: {}", trace.time_unit());
    if let Ok(dt) = trace.dt() {
        println!("dt:        {}", dt);
    }
    Ok(())
}

fn max_counts_summary(matches: &ArgMatches) -> anyhow::Result<()> {
    let path = Path::new(matches.value_of("FILE").unwrap());
    let reader = open_intensity_file(path)?;
    let summary = max_counts(IntensityRows::new(reader))?;

    match matches.value_of("out") {
        Some(out) => {
            let file =
                File::create(out).with_context(|| format!("could not create {}", out))?;
            write_max_counts(&summary, file)?;
        }
        None => write_max_counts(&summary, io::stdout())?,
    }
    Ok(())
}
