// src/main.rs

use runstop::errors::Error;
use runstop::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("runstop error: {}", describe(&err));
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Error>() {
        Some(e) => e.user_message(),
        None => format!("{err:#}"),
    }
}
