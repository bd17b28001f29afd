//! # Fabric Sorter Executable
//!
//! Main sorter executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logger and parameters
//!     - Open the arm hardware, falling back to simulation, and initialise the arm
//!     - Main loop:
//!         - Telecommand acquisition, from a script or from the operator
//!         - Telecommand processing:
//!             - Classifications are throttled into arm sequences by the sorter
//!             - Operator commands are sent to the arm controller
//!         - Collection of finished sequences
//!         - Periodic status saving
//!     - Park the arm and close the session
//!
//! Emergency stops typed by the operator are executed directly by the input thread, so that a
//! stop is never held up behind a motion running in the main loop.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod tc_processor;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, info, warn};
use std::{
    io::BufRead,
    path::PathBuf,
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
    time::Instant,
};
use structopt::StructOpt;

// Internal
use comms_if::tc::{arm_ctrl::ArmCmd, Tc};
use sorter_lib::{
    arm_ctrl::{ArmBackend, ArmCtrl, ArmCtrlParams, ArmEvent},
    hardware,
    params::SorterExecParams,
    sorter::Sorter,
};
use util::{
    host,
    logger::{logger_init, parse_level},
    script_interpreter::{PendingTcs, ScriptInterpreter},
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Command line arguments.
#[derive(Debug, StructOpt)]
#[structopt(name = "sorter_exec", about = "Fabric sorter arm controller")]
struct Args {
    /// Script of timed telecommands to run instead of reading operator commands from stdin.
    #[structopt(parse(from_os_str))]
    script: Option<PathBuf>,

    /// Simulate the arm even if the hardware is available.
    #[structopt(long)]
    simulation: bool,

    /// Minimum level of the log messages (trace, debug or info).
    #[structopt(long, default_value = "trace")]
    log_level: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Various sources for the telecommands incoming to the exec.
enum TcSource {
    Script(ScriptInterpreter),
    Operator(Receiver<OperatorInput>),
}

/// Input from the operator thread.
enum OperatorInput {
    Tc(Tc),
    Quit,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::from_args();
    let log_level = parse_level(&args.log_level)
        .ok_or_else(|| eyre!("Unknown log level \"{}\"", args.log_level))?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("sorter_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Fabric Sorter Executable\n");
    info!("Running on: {:#?}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: SorterExecParams =
        util::params::load("sorter_exec.toml").wrap_err("Could not load exec params")?;
    let arm_params: ArmCtrlParams =
        util::params::load("arm_ctrl.toml").wrap_err("Could not load arm params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE ARM ----

    let backend = if args.simulation || exec_params.force_simulation {
        info!("Simulation requested, the arm hardware will not be used");
        ArmBackend::Simulation
    } else {
        match hardware::open_backend(&arm_params) {
            Ok(backend) => backend,
            Err(e) => {
                warn!("Arm hardware unavailable ({}), using simulation", e);
                ArmBackend::Simulation
            }
        }
    };

    let arm = ArmCtrl::new(arm_params, backend).wrap_err("Failed to create the arm controller")?;
    arm.set_event_listener(record_event);

    let mode = arm.initialize().wrap_err("Failed to initialise the arm")?;
    info!(
        "Arm initialised in {:?} mode (simulation: {})\n",
        mode,
        arm.is_simulation()
    );

    // ---- INITIALISE TC SOURCE ----

    let mut tc_source = match args.script {
        Some(path) => {
            let si = ScriptInterpreter::new(&path).wrap_err("Failed to load script")?;

            info!(
                "Loaded script {:?}, lasts {:.02} s and contains {} TCs\n",
                si.script_path().unwrap_or(&path),
                si.get_duration(),
                si.get_num_tcs()
            );

            TcSource::Script(si)
        }
        None => {
            info!("No script provided, reading operator commands from stdin (\"quit\" to exit)\n");
            TcSource::Operator(spawn_operator_input(arm.clone())?)
        }
    };

    let mut sorter = Sorter::new(
        arm.clone(),
        exec_params.detection_cooldown(),
        exec_params.confidence_threshold,
    );
    let cycle_period = exec_params.cycle_period();
    let status_save_period = exec_params.status_save_period();
    let mut last_status_save = Instant::now();

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    'main: loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- TELECOMMAND PROCESSING ----

        let tcs = match tc_source {
            TcSource::Script(ref mut si) => match si.get_pending_tcs(session::get_elapsed_seconds()) {
                PendingTcs::None => vec![],
                PendingTcs::Some(tc_vec) => tc_vec,
                // Exit once the end of the script is reached and the arm is idle
                PendingTcs::EndOfScript => {
                    if !sorter.is_sorting() {
                        info!("End of TC script reached, stopping");
                        break 'main;
                    }
                    vec![]
                }
            },
            TcSource::Operator(ref rx) => {
                let mut tc_vec = vec![];
                loop {
                    match rx.try_recv() {
                        Ok(OperatorInput::Tc(tc)) => tc_vec.push(tc),
                        Ok(OperatorInput::Quit) | Err(TryRecvError::Disconnected) => {
                            info!("Operator requested exit");
                            break 'main;
                        }
                        Err(TryRecvError::Empty) => break,
                    }
                }
                tc_vec
            }
        };

        for tc in tcs.iter() {
            tc_processor::exec(&mut sorter, &arm, tc);
        }

        // ---- SEQUENCE COMPLETION ----

        sorter.poll();

        // ---- STATUS ----

        if let Some(period) = status_save_period {
            if last_status_save.elapsed() >= period {
                session::save_with_timestamp("status/arm_status.json", arm.get_status());
                last_status_save = Instant::now();
            }
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = cycle_start_instant.elapsed();

        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
            ),
        }
    }

    // ---- SHUTDOWN ----

    if sorter.is_sorting() {
        info!("Waiting for the current sequence to finish");
    }
    sorter.wait_idle();

    info!("Sort statistics: {:?}", sorter.stats());
    session::save("sort_stats.json", sorter.stats());

    arm.shutdown();

    info!("End of execution");
    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Arm event listener, saves finished sequences into the session.
fn record_event(event: &ArmEvent) {
    match event {
        ArmEvent::SequenceFinished(report) => {
            session::save_with_timestamp("sequences/sequence.json", report.clone())
        }
        ArmEvent::HardwareUnavailable(e) => {
            session::save_with_timestamp("faults/hardware_unavailable.json", e.clone())
        }
        ArmEvent::EmergencyStop => session::save_with_timestamp(
            "faults/emergency_stop.json",
            session::get_elapsed_seconds(),
        ),
        e => debug!("Arm event: {:?}", e),
    }
}

/// Start the thread reading operator commands from stdin.
fn spawn_operator_input(arm: ArmCtrl) -> Result<Receiver<OperatorInput>> {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("operator_input".into())
        .spawn(move || {
            let stdin = std::io::stdin();

            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("Could not read from stdin: {}", e);
                        break;
                    }
                };

                match line.trim() {
                    "" => continue,
                    "quit" | "exit" => break,
                    l => match Tc::from_operator_line(l) {
                        // Stops bypass the main loop, which may be busy with a motion
                        Ok(Tc::Arm(ArmCmd::Stop)) => arm.emergency_stop(),
                        Ok(tc) => {
                            if tx.send(OperatorInput::Tc(tc)).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Invalid command: {}", e),
                    },
                }
            }

            tx.send(OperatorInput::Quit).ok();
        })
        .wrap_err("Failed to start the operator input thread")?;

    Ok(rx)
}
