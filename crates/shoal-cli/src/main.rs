#![forbid(unsafe_code)]
#![deny(clippy::all, rustdoc::broken_intra_doc_links)]

//! Thin entrypoint that delegates to the library for execution.

#[tokio::main]
async fn main() {
    let exit_code = shoal_cli::run().await;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
