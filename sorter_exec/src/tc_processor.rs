//! # Telecommand processor module
//!
//! The telecommand processor handles TCs coming from any source.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, error, info, trace, warn};

// Internal
use comms_if::tc::{arm_ctrl::ArmCmd, Tc};
use sorter_lib::{
    arm_ctrl::{ArmCtrl, MotionError, StepReport},
    sorter::Sorter,
};
use util::session;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute a telecommand.
pub(crate) fn exec(sorter: &mut Sorter, arm: &ArmCtrl, tc: &Tc) {
    match tc {
        Tc::Heartbeat => trace!("Heartbeat"),
        Tc::Classification(c) => {
            let decision = sorter.on_classification(c);
            debug!("Classification {:?}: {:?}", c, decision);
        }
        Tc::Arm(cmd) => exec_arm_cmd(sorter, arm, cmd),
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn exec_arm_cmd(sorter: &mut Sorter, arm: &ArmCtrl, cmd: &ArmCmd) {
    debug!("Recieved arm command {:?}", cmd);

    match cmd {
        ArmCmd::Sort { defective } => {
            sorter.sort_now(*defective);
        }
        ArmCmd::Goto { position } => report_motion("Goto", arm.move_to(position)),
        ArmCmd::Home => report_motion("Home", arm.move_home()),
        ArmCmd::GripperOpen => report_motion("Gripper open", arm.gripper_open()),
        ArmCmd::GripperClose => report_motion("Gripper close", arm.gripper_close()),
        ArmCmd::Stop => arm.emergency_stop(),
        ArmCmd::Status => {
            let status = arm.get_status();
            info!(
                "Arm status: mode {:?}, position {}, gripper {}, simulation {}",
                status.mode, status.position, status.gripper, status.simulation
            );
            session::save_with_timestamp("status/arm_status.json", status);
        }
    }
}

fn report_motion(name: &str, result: Result<StepReport, MotionError>) {
    match result {
        Ok(report) => info!(
            "{} completed in {:.2} s",
            name,
            report.elapsed.as_secs_f64()
        ),
        Err(e) if e.is_retriable() => warn!("{} rejected: {}, try again shortly", name, e),
        Err(e) => error!("{} failed: {}", name, e),
    }
}
