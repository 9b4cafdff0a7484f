fn main() {
    if let Err(error) = parley::cli::main() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
