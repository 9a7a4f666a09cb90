use clap::Parser;

use tauscan::cli::{analyse, hunt, Command, Opts};
use tauscan::{cs_eredln, Decoders, Format, Writer};

fn main() {
    let opts = Opts::parse();

    let output = opts.output.as_ref().map(|path| {
        std::fs::File::create(path).unwrap_or_else(|e| {
            eprintln!("[!] failed to create output file '{}' - {e}", path.display());
            std::process::exit(1);
        })
    });
    let _ = tauscan::set_writer(Writer {
        format: Format::Std,
        output,
        path: opts.output.clone(),
        quiet: opts.quiet,
        verbose: opts.verbose,
    });

    // No concrete evtx/hve/mft/xml/esedb decoder crate is linked into this
    // binary; hunting/analysis fails at runtime with a clear error instead.
    let decoders = Decoders::default();

    let result = match opts.cmd {
        Command::Hunt(args) => hunt::run(args, decoders),
        Command::Analyse(analyse::Args::Shimcache(args)) => analyse::run_shimcache(args, None),
        Command::Analyse(analyse::Args::Srum(args)) => analyse::run_srum(args, None, None),
    };

    if let Err(e) = result {
        cs_eredln!("[!] {e}");
        std::process::exit(1);
    }
}
