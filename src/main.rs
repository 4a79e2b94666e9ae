fn main() {
    if let Err(err) = output_mapping::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
