//! Thin binary entrypoint for the Quire CLI.

use std::process;

#[tokio::main]
async fn main() {
    let exit_code = quire_cli::run().await;
    if exit_code != 0 {
        process::exit(exit_code);
    }
}
