mod plant;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use crossterm::style::Stylize;
use session::{Session, SessionConfig};

const USAGE: &str = "Usage: charger-emulator [--scenario <name>] [--profile <index>]";

fn main() -> io::Result<()> {
    let config = parse_args().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&config)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Smart charger emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    writeln!(writer, "Transcript: {}", config.log_path().display())?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            print_response(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn print_response<W: Write>(writer: &mut W, response: &str) -> io::Result<()> {
    if response.starts_with("OK") {
        writeln!(writer, "{}", response.green())
    } else if response.starts_with("ERR") {
        writeln!(writer, "{}", response.red())
    } else if response.contains("] charger ") {
        writeln!(writer, "{}", response.cyan())
    } else if response.contains("] failure ") {
        writeln!(writer, "{}", response.yellow())
    } else {
        writeln!(writer, "{response}")
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_args() -> Result<SessionConfig, String> {
    let mut config = SessionConfig {
        scenario: "interactive".to_string(),
        profile: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?,
        };

        match flag.as_str() {
            "--scenario" => config.scenario = value,
            "--profile" => {
                let index = value
                    .parse::<u8>()
                    .map_err(|_| format!("Invalid profile index `{value}`"))?;
                config.profile = Some(index);
            }
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    Ok(config)
}
