#![allow(clippy::print_stderr)]

use clap::{Parser, ValueEnum};
use core::num::NonZeroUsize;
use std::ffi::{CString, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::process::ExitCode;

mod printer;

use duz::{util, walk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Single-threaded submit/complete loop over a kernel io_uring
    #[value(name = "io_uring")]
    IoUring,
    /// Work-stealing thread pool with synchronous syscalls
    #[value(name = "threaded")]
    Threaded,
}

#[derive(Parser)]
#[command(version, about = "Recursive directory sizes, concurrently")]
struct Args {
    #[arg(
        long = "backend",
        value_enum,
        default_value_t = Backend::Threaded,
        help = "Traversal engine to use"
    )]
    backend: Backend,

    #[arg(
        short = 'j',
        long = "threads",
        help = "Worker threads for the threaded backend (default: CPU count x 2.5, capped at 64)"
    )]
    threads: Option<NonZeroUsize>,

    #[arg(value_name = "PATH", help = "Directories to account (defaults to .)")]
    paths: Vec<OsString>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let code = match error.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = error.print();
            return ExitCode::from(code);
        }
    };

    util::raise_fd_limit();
    let threads = args.threads.unwrap_or_else(util::default_threads);

    let paths = if args.paths.is_empty() {
        vec![OsString::from(".")]
    } else {
        args.paths
    };

    for path in paths {
        let Ok(cpath) = CString::new(path.as_bytes()) else {
            eprintln!("duz: {}: path contains a nul byte", path.to_string_lossy());
            return ExitCode::from(1);
        };

        let walk = match args.backend {
            Backend::Threaded => walk::threaded::run(&cpath, threads),
            Backend::IoUring => match walk::uring::run(&cpath) {
                Ok(walk) => walk,
                Err(error) => {
                    eprintln!("duz: {}: {error}", path.to_string_lossy());
                    return ExitCode::from(2);
                }
            },
        };

        // Output is produced only once the traversal has fully settled.
        walk.progress().wait_finished();

        match printer::write_report(&walk) {
            Ok(()) => {}
            // A consumer that stopped reading ends this path's report,
            // not the program.
            Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {}
            Err(error) => {
                eprintln!("duz: write error: {error}");
                return ExitCode::from(2);
            }
        }
    }

    ExitCode::SUCCESS
}
