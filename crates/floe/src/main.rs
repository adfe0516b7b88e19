//! Floe CLI: runs schedules, sensors and the job dispatcher, or a single job.

use std::process::ExitCode;

use floe::Config;
use floe_core::Application;

fn main() -> ExitCode {
    Application::<Config>::run()
}
