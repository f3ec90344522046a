// src/main.rs

mod options;

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use daemonize::{LockHandle, Options as DetachOptions, Outcome};
use gpio::{Chip, PinMap};
use logging::LogConfig;
use tracing::info;

use crate::options::CliOpts;

fn main() -> ExitCode {
    let opts = CliOpts::parse();

    // Detach before anything else: everything past this point runs in the
    // service process only, and failures below the caller have already been
    // collapsed into the handshake outcome it sees here.
    let lock = if opts.daemon {
        let detach = DetachOptions {
            label: opts.label.clone(),
            lock_file: opts.lock_file.clone(),
            user: opts.user.clone(),
        };
        match daemonize::daemonize(&detach) {
            Ok(Outcome::Caller) => return ExitCode::SUCCESS,
            Ok(Outcome::Service { lock }) => lock,
            Err(e) => {
                eprintln!("sysgpiod: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        match opts.lock_file.as_deref().map(daemonize::lock::acquire) {
            None => None,
            Some(Ok(handle)) => Some(handle),
            Some(Err(e)) => {
                eprintln!("sysgpiod: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    if let Err(e) = logging::init(&LogConfig {
        verbose: opts.verbose,
        quiet: opts.quiet,
        log_file: opts.log_file.clone(),
        syslog: opts.syslog,
    }) {
        eprintln!("sysgpiod: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(&opts, lock) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // In a detached service stderr points at the null device; the
            // subscriber's syslog/file sinks still see this.
            tracing::error!("{e}");
            eprintln!("sysgpiod: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(opts: &CliOpts, lock: Option<LockHandle>) -> Result<(), Box<dyn Error>> {
    // Must outlive the serve loop: dropping the handle is the only release.
    let _lock = lock;

    let pin_map = PinMap::load(&opts.config)?;
    let chip = Chip::default();
    chip.enable_pins(&pin_map)?;
    info!(
        inputs = pin_map.num_inputs(),
        outputs = pin_map.num_outputs(),
        "pins enabled"
    );

    let listener = control::bind(&opts.socket)?;
    info!(socket = %opts.socket.display(), "control socket ready");

    let handler = PinIo {
        map: pin_map,
        chip,
    };
    control::serve(&listener, &handler)?;
    Ok(())
}

const BINARY_INPUT: &str = "binary-input";
const BINARY_OUTPUT: &str = "binary-output";

/// The control object: get/set/count/counts over the configured pins.
struct PinIo {
    map: PinMap,
    chip: Chip,
}

impl control::IoHandler for PinIo {
    fn counts(&self) -> Vec<(String, usize)> {
        vec![
            (BINARY_INPUT.to_string(), self.map.num_inputs()),
            (BINARY_OUTPUT.to_string(), self.map.num_outputs()),
        ]
    }

    fn get(&self, io: &str, instance: usize) -> Result<bool, String> {
        if io != BINARY_INPUT {
            return Err(format!("cannot read io type {io}"));
        }
        let line = self
            .map
            .input_gpio(instance)
            .ok_or_else(|| format!("no input instance {instance}"))?;
        self.chip.read(line).map_err(|e| e.to_string())
    }

    fn set(&self, io: &str, instance: usize, state: bool) -> Result<(), String> {
        if io != BINARY_OUTPUT {
            return Err(format!("cannot write io type {io}"));
        }
        let line = self
            .map
            .output_gpio(instance)
            .ok_or_else(|| format!("no output instance {instance}"))?;
        self.chip.write(line, state).map_err(|e| e.to_string())
    }
}
