//! keepsake-web: direct messaging server binary.

#[tokio::main]
async fn main() {
    if let Err(e) = keepsake::web::run().await {
        eprintln!("keepsake-web: {e}");
        std::process::exit(1);
    }
}
