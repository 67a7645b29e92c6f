fn main() {
    if let Err(e) = gemhos_lib::run() {
        eprintln!("gemhos: {e}");
        std::process::exit(1);
    }
}
