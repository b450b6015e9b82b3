mod logging;
mod shell;

use clap::{App, Arg};
use shell::{Command, Flow, Shell};
use std::io::{self, BufRead, Write};

fn main() {
    if let Err(e) = run() {
        eprintln!("flat_fs shell: {}", e);
        std::process::exit(1);
    }
}

fn run() -> io::Result<()> {
    let matches = App::new("flat_fs shell")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interactive shell over a flat_fs block device image")
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .help("Device image to open at start"),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .takes_value(true)
                .possible_values(&["off", "error", "warn", "info", "debug", "trace"])
                .help("Log level (defaults to $LOG, then warn)"),
        )
        .get_matches();
    logging::init(matches.value_of("log"));

    let mut shell = Shell::new(io::stdout());
    if let Some(image) = matches.value_of("image") {
        shell.execute_command(Command::Open(image.to_string()))?;
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", if shell.is_open() { "[open]> " } else { "> " });
        io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            // EOF
            None => break,
        };
        if shell.execute(&line)? == Flow::Exit {
            break;
        }
    }
    Ok(())
}
