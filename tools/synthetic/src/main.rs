use clap::Parser;
use tokio::runtime::Builder;
use tracing::{debug, error};

use synthetic::{Cli, Mode, Server, SyntheticConfig, run_load_test, trace};

const THREAD_NAME: &str = "synthetic-worker";

fn main() {
    let cli = Cli::parse();
    if let Err(err) = trace::init(&cli.log, &cli.log_format) {
        eprintln!("logging setup failed: {err:#}");
    }

    let config = match SyntheticConfig::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    debug!(?config);

    let rt = match Builder::new_multi_thread()
        .thread_name(THREAD_NAME)
        .worker_threads(config.threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to build runtime: {err:#}");
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        match config.mode {
            Mode::RuntimeClient => client(config).await,
            Mode::LinuxServer => server(config).await,
        }
    });
    std::process::exit(code);
}

async fn client(config: SyntheticConfig) -> i32 {
    let output_json = config.json;
    match run_load_test(config).await {
        Ok(report) => {
            if output_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("failed to serialize report: {err:#}");
                        return 2;
                    }
                }
            } else {
                print!("{}", report.human_summary());
            }

            if report.passed { 0 } else { 1 }
        }
        Err(err) => {
            error!(?err, "run failed");
            eprintln!("run failed: {err:#}");
            1
        }
    }
}

async fn server(config: SyntheticConfig) -> i32 {
    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("server setup failed: {err:#}");
            return 1;
        }
    };
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    match server.serve(shutdown).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("server failed: {err:#}");
            1
        }
    }
}
