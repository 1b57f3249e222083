fn main() {
    if let Err(err) = scratch_ledger::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
