use std::fs;
use std::io::{self, Read};

use anyhow::{bail, Context};
use clap::{App, Arg};
use tracing_subscriber::EnvFilter;

use kaleidoscope::diagnostics::LogSink;
use kaleidoscope::Session;

fn read_source(matches: &clap::ArgMatches) -> anyhow::Result<String> {
    if let Some(words) = matches.values_of("SOURCE") {
        return Ok(words.collect::<Vec<_>>().join(" "));
    }

    match matches.value_of("file") {
        Some(path) if path != "-" => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))
        }
        _ => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("failed to read stdin")?;
            Ok(source)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let matches = App::new("kaleidoscope")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("SOURCE")
                .help("source text; words are joined with spaces")
                .multiple(true)
                .conflicts_with("file"),
        )
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .value_name("FILE")
                .takes_value(true)
                .help("read source from FILE ('-' for stdin)"),
        )
        .arg(
            Arg::with_name("emit-ir")
                .long("emit-ir")
                .help("print the IR of every compiled unit"),
        )
        .arg(
            Arg::with_name("no-run")
                .long("no-run")
                .help("do not evaluate top-level expressions"),
        )
        .arg(
            Arg::with_name("entry")
                .long("entry")
                .value_name("NAME")
                .takes_value(true)
                .help("call the zero-argument function NAME after compiling"),
        )
        .get_matches();

    let source = read_source(&matches)?;
    let emit_ir = matches.is_present("emit-ir");

    let mut session = Session::with_sink(LogSink::default());
    session.run_expressions = !matches.is_present("no-run");

    for compiled in session.run(&source) {
        if emit_ir {
            print!("{}", compiled.ir);
        }
        if let Some(value) = compiled.value {
            println!("{}", value);
        }
    }

    if let Some(entry) = matches.value_of("entry") {
        let value = session
            .call(entry)
            .with_context(|| format!("failed to run {}", entry))?;
        println!("{}", value);
    }

    if session.sink.reported > 0 {
        bail!("{} error(s) reported", session.sink.reported);
    }

    Ok(())
}
