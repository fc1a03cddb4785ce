#[tokio::main]
async fn main() {
    if let Err(err) = pgc_cli::run(std::env::args().collect()).await {
        eprintln!("Failed: {err:#}");
        std::process::exit(-1);
    }
}
