use clap::Parser;
use tokio::runtime::Builder;
use tracing::{debug, error};

use synthetic::trace;
use synthetic_launch::{Cli, LaunchPlan};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = trace::init(&cli.log, &cli.log_format) {
        eprintln!("logging setup failed: {err:#}");
    }
    debug!(?cli);

    if cli.check {
        if let Err(err) = cli.check_args() {
            eprintln!("invalid synthetic arguments: {err:#}");
            std::process::exit(2);
        }
    }

    let plan = LaunchPlan::build(&cli.numa_policy(), &cli.binary, &cli.args);
    if cli.dry_run {
        println!("{}", plan.command_line());
        return;
    }

    let rt = match Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to build runtime: {err:#}");
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        match plan.run().await {
            Ok(code) => code,
            Err(err) => {
                error!(?err, "launch failed");
                eprintln!("synthetic-launch: {err}");
                err.exit_code()
            }
        }
    });
    std::process::exit(code);
}
