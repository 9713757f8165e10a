fn main() {
    if let Err(err) = csv_columnar::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
