//! mikoterm - run a program on plain pipes and view it through a VT100 grid
//!
//! The child gets no pseudo terminal, so it sees its stdin and stdout as
//! pipes. Typed keys are echoed locally unless `--no-echo` is given.
//!
//! # Quick Start
//!
//! ```text
//! mikoterm                  # Start the configured shell
//! mikoterm -s "python3 -i"  # Run a custom command
//! ```
//!
//! Press Ctrl+Q to leave.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mikoterm::config::Config;
use mikoterm::core::session::Session;
use mikoterm::ui::{KeyMapper, Renderer};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Command line for the child
    shell: Option<String>,
    /// Alternate config file
    config_path: Option<PathBuf>,
    /// Disable local echo
    no_echo: bool,
}

enum Invocation {
    Run(Args),
    Help,
    Version,
}

fn print_help() {
    eprintln!("mikoterm {} - VT100 grid over a piped child process", VERSION);
    eprintln!();
    eprintln!("Usage: mikoterm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <CMD>     Command to run (default: config, $SHELL, /bin/sh)");
    eprintln!("  -c, --config <PATH>   Config file (default: ~/.mikoterm/config.toml)");
    eprintln!("      --no-echo         Do not echo typed keys into the grid");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Log file: ~/.mikoterm/mikoterm.log (level from config or RUST_LOG)");
}

fn parse_args<I>(args: I) -> Result<Invocation, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-v" | "--version" => return Ok(Invocation::Version),
            "-s" | "--shell" => {
                let shell = args.next().ok_or("Missing shell argument")?;
                parsed.shell = Some(shell);
            }
            "-c" | "--config" => {
                let path = args.next().ok_or("Missing config path")?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--no-echo" => parsed.no_echo = true,
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }

    Ok(Invocation::Run(parsed))
}

// Log to ~/.mikoterm/mikoterm.log; without a home directory, logging stays off
fn init_logging(config: &Config) {
    let Some(log_path) = Config::log_path() else {
        return;
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn is_quit_key(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'))
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args().skip(1)) {
        Ok(Invocation::Run(args)) => args,
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            eprintln!("mikoterm {}", VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Logging is configured from the config, so a broken default file is
    // only reported once the subscriber exists
    let (mut config, config_error) = match &args.config_path {
        Some(path) => (
            Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
            None,
        ),
        None => match Config::try_load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };
    if let Some(shell) = &args.shell {
        config.shell = Some(shell.clone());
    }
    if args.no_echo {
        config.local_echo = false;
    }

    init_logging(&config);
    info!("mikoterm {} starting", VERSION);
    if let Some(e) = config_error {
        warn!("Ignoring config file: {}", e);
    }

    if let Ok((cols, rows)) = Renderer::size() {
        config.cols = cols;
        config.rows = rows;
    }
    info!("Grid size: {}x{}", config.cols, config.rows);

    let command = config.shell_command();
    let mut session = Session::with_config(&config);
    if let Err(e) = session.start(&command) {
        error!("Failed to start '{}': {}", command, e);
        return Err(e).with_context(|| format!("starting '{}'", command));
    }

    let mut renderer = Renderer::new();
    renderer.init()?;
    let result = run_main_loop(&mut session, &mut renderer, &config);
    renderer.cleanup()?;

    session.shutdown();
    if let Some(code) = session.exit_code() {
        info!("Child exited with code {}", code);
        eprintln!("[{} exited with code {}]", command, code);
    }
    result
}

/// Main event loop
fn run_main_loop(
    session: &mut Session,
    renderer: &mut Renderer,
    config: &Config,
) -> anyhow::Result<()> {
    let mapper = KeyMapper::from_config(config);

    loop {
        session.update();

        // Sampled before draining, so nothing queued after the check is lost
        let output_closed = session.output_closed();
        let had_output = session.process_output();
        if had_output {
            // Whatever the child printed last is its prompt
            let grid = session.grid_mut();
            let (x, y) = grid.cursor_position();
            grid.set_prompt_end(x, y);
        }

        if session.grid().is_dirty() {
            renderer.render(session.grid())?;
            session.grid_mut().clear_dirty();
        }

        if !session.is_running() && output_closed {
            info!("Session ended");
            break;
        }

        if !event::poll(POLL_TIMEOUT)? {
            continue;
        }

        match event::read()? {
            Event::Key(key_event) => {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                if is_quit_key(&key_event) {
                    info!("Quit requested");
                    break;
                }

                let Some(bytes) = mapper.map(&key_event) else {
                    continue;
                };
                session.write(&bytes);
                if config.local_echo {
                    if let Some(echo) = mapper.local_echo(&bytes) {
                        session.grid_mut().append_output(&echo);
                    }
                }
            }
            Event::Resize(cols, rows) => {
                info!("Resize: {}x{}", cols, rows);
                session.resize(cols, rows);
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_defaults() {
        let Ok(Invocation::Run(args)) = parse(&[]) else {
            panic!("expected run");
        };
        assert_eq!(args, Args::default());
    }

    #[test]
    fn test_parse_options() {
        let Ok(Invocation::Run(args)) = parse(&["-s", "python3 -i", "--no-echo", "-c", "x.toml"])
        else {
            panic!("expected run");
        };
        assert_eq!(args.shell.as_deref(), Some("python3 -i"));
        assert!(args.no_echo);
        assert_eq!(args.config_path, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--shell"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(matches!(parse(&["-h"]), Ok(Invocation::Help)));
        assert!(matches!(parse(&["--version"]), Ok(Invocation::Version)));
    }

    #[test]
    fn test_quit_key() {
        assert!(is_quit_key(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL)));
        assert!(!is_quit_key(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
    }
}
